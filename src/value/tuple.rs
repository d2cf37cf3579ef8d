//! Tuples: fixed-arity sequences of atoms with lexicographic order and a
//! canonical, length-framed byte encoding used as tuple identity (§3.2).

use super::atom::Atom;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// An immutable ordered sequence of atoms of fixed arity.
///
/// Cheaply cloneable: the atom vector is wrapped in an `Arc` because tuples
/// flow through many operators' delta streams and support tables without
/// being mutated (§3.7 — tuples are shared-read-only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tuple {
    atoms: Arc<[Atom]>,
}

impl Tuple {
    pub fn new(atoms: Vec<Atom>) -> Self {
        Tuple {
            atoms: atoms.into(),
        }
    }

    pub fn arity(&self) -> usize {
        self.atoms.len()
    }

    pub fn atom_at(&self, i: usize) -> &Atom {
        &self.atoms[i]
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    /// Project to the given positions, in the order given (may repeat or
    /// permute positions; used by Project, Join output projection, and Diff
    /// key extraction).
    pub fn project(&self, indices: &[usize]) -> Tuple {
        let projected: Vec<Atom> = indices.iter().map(|&i| self.atoms[i].clone()).collect();
        Tuple::new(projected)
    }

    pub fn compare_to(&self, other: &Tuple) -> Ordering {
        for (a, b) in self.atoms.iter().zip(other.atoms.iter()) {
            let c = a.compare_to(b);
            if c != Ordering::Equal {
                return c;
            }
        }
        self.atoms.len().cmp(&other.atoms.len())
    }

    /// Concatenation of each atom's own length-framed encoding. Because each
    /// atom encoding is prefix-free (§3.1), concatenation is reversible:
    /// `u.to_bytes() == v.to_bytes()` iff `u == v`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for atom in self.atoms.iter() {
            out.extend_from_slice(&atom.to_bytes());
        }
        out
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.compare_to(other) == Ordering::Equal
    }
}

impl Eq for Tuple {}

impl PartialOrd for Tuple {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare_to(other))
    }
}

impl Ord for Tuple {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare_to(other)
    }
}

impl std::hash::Hash for Tuple {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state);
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, atom) in self.atoms.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{atom}")?;
        }
        write!(f, ")")
    }
}
