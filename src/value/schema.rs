//! Schemas: named, typed positions of a relation (§3.3).

use super::atom::Atom;
use super::tuple::Tuple;
use serde::{Deserialize, Serialize};

/// A type predicate on a schema position. `Any` accepts every atom variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Integer,
    Float,
    String,
    Symbol,
    Id,
    Any,
}

impl DataType {
    pub fn matches(&self, atom: &Atom) -> bool {
        matches!(
            (self, atom),
            (DataType::Any, _)
                | (DataType::Boolean, Atom::Boolean(_))
                | (DataType::Integer, Atom::Integer(_))
                | (DataType::Float, Atom::Float(_))
                | (DataType::String, Atom::String(_))
                | (DataType::Symbol, Atom::Symbol(_))
                | (DataType::Id, Atom::Id(_))
        )
    }
}

/// One named, typed position of a `Schema`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
}

/// `R[x_1:t_1, ..., x_k:t_k]` — an immutable, arity-`k` relation schema with
/// unique variable names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    name: String,
    fields: Vec<Field>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("duplicate variable name {0:?} in schema")]
    DuplicateName(String),
    #[error("arity mismatch: schema {schema} has arity {expected}, tuple has arity {actual}")]
    ArityMismatch {
        schema: String,
        expected: usize,
        actual: usize,
    },
    #[error("value at position {position} ({value}) does not match declared type {expected:?}")]
    TypeMismatch {
        position: usize,
        value: String,
        expected: DataType,
    },
    #[error("unknown variable name {0:?}")]
    UnknownVariable(String),
}

impl Schema {
    /// Builds a schema; rejects duplicate variable names at construction,
    /// since every downstream position lookup assumes uniqueness.
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Result<Self, SchemaError> {
        let mut seen = std::collections::HashSet::new();
        for field in &fields {
            if !seen.insert(field.name.clone()) {
                return Err(SchemaError::DuplicateName(field.name.clone()));
            }
        }
        Ok(Schema {
            name: name.into(),
            fields,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Validates a tuple by arity and, for every position with a non-`Any`
    /// type, by the declared type predicate.
    pub fn validate(&self, tuple: &Tuple) -> Result<(), SchemaError> {
        if tuple.arity() != self.arity() {
            return Err(SchemaError::ArityMismatch {
                schema: self.name.clone(),
                expected: self.arity(),
                actual: tuple.arity(),
            });
        }
        for (i, field) in self.fields.iter().enumerate() {
            let atom = tuple.atom_at(i);
            if !field.data_type.matches(atom) {
                return Err(SchemaError::TypeMismatch {
                    position: i,
                    value: atom.to_string(),
                    expected: field.data_type,
                });
            }
        }
        Ok(())
    }

    /// `project(names)` — a sub-schema naming only the given positions, in
    /// the order given.
    pub fn project(&self, names: &[&str]) -> Result<Schema, SchemaError> {
        let mut fields = Vec::with_capacity(names.len());
        for &name in names {
            let pos = self
                .position_of(name)
                .ok_or_else(|| SchemaError::UnknownVariable(name.to_string()))?;
            fields.push(self.fields[pos].clone());
        }
        Schema::new(format!("{}.project", self.name), fields)
    }

    /// Indices of `names` within this schema, in the order given. Used to
    /// compile a projection / Diff key / Join output projection into
    /// `Tuple::project` indices once, ahead of the hot path.
    pub fn indices_of(&self, names: &[&str]) -> Result<Vec<usize>, SchemaError> {
        names
            .iter()
            .map(|&n| {
                self.position_of(n)
                    .ok_or_else(|| SchemaError::UnknownVariable(n.to_string()))
            })
            .collect()
    }

    /// Two schemas are compatible (for Union, Rename target checks) when
    /// they declare the same names and types in the same order.
    pub fn compatible_with(&self, other: &Schema) -> bool {
        self.fields == other.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(
            "Users",
            vec![
                Field {
                    name: "uid".into(),
                    data_type: DataType::Symbol,
                },
                Field {
                    name: "name".into(),
                    data_type: DataType::String,
                },
            ],
        )
        .unwrap()
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = Schema::new(
            "Bad",
            vec![
                Field {
                    name: "x".into(),
                    data_type: DataType::Any,
                },
                Field {
                    name: "x".into(),
                    data_type: DataType::Any,
                },
            ],
        )
        .unwrap_err();
        assert_eq!(err, SchemaError::DuplicateName("x".into()));
    }

    #[test]
    fn validates_arity_and_types() {
        let s = schema();
        let ok = Tuple::new(vec![Atom::symbol("u1"), Atom::string("Alice")]);
        assert!(s.validate(&ok).is_ok());

        let bad_arity = Tuple::new(vec![Atom::symbol("u1")]);
        assert!(matches!(
            s.validate(&bad_arity),
            Err(SchemaError::ArityMismatch { .. })
        ));

        let bad_type = Tuple::new(vec![Atom::integer(1), Atom::string("Alice")]);
        assert!(matches!(
            s.validate(&bad_type),
            Err(SchemaError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn project_and_indices_of_agree() {
        let s = schema();
        let sub = s.project(&["name"]).unwrap();
        assert_eq!(sub.arity(), 1);
        assert_eq!(s.indices_of(&["name", "uid"]).unwrap(), vec![1, 0]);
    }
}
