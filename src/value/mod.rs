//! # Value Layer
//!
//! Atoms (typed scalars) with a total order and canonical byte encoding,
//! fixed-arity Tuples built from them, and Schemas naming a relation's
//! positions. See `SPEC_FULL.md` §3 for the full contract.

mod atom;
mod schema;
mod tuple;

pub use atom::Atom;
pub use schema::{DataType, Field, Schema, SchemaError};
pub use tuple::Tuple;
