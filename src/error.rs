//! Error taxonomy (§7): validation errors (pre-registration), state errors
//! (runtime), provider errors, and internal invariants (which panic rather
//! than return — see individual modules for the `assert!`/`unreachable!`
//! sites that implement that half of the taxonomy).

use crate::value::SchemaError;
use thiserror::Error;

/// Pre-registration validation failures. These fail the call synchronously
/// and leave engine state untouched (§7 propagation policy).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("relation {0:?} is already defined")]
    DuplicateRelation(String),
    #[error("relation {0:?} is not defined")]
    UnknownRelation(String),
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("graph contains a cycle through node {0:?}")]
    Cycle(String),
    #[error("variable order is invalid: {0}")]
    InvalidVariableOrder(String),
    #[error("level group for variable {0:?} is empty")]
    EmptyLevelGroup(String),
    #[error("projection index {0} out of range for arity {1}")]
    InvalidProjectionIndex(usize, usize),
    #[error("union inputs have incompatible schemas")]
    IncompatibleUnionInputs,
    #[error("operator node {0:?} is not defined in the graph")]
    UnknownNode(String),
    #[error("query {0:?} declares no output nodes")]
    NoOutputNodes(String),
    #[error("provider {0:?} is not registered")]
    UnknownProvider(String),
    #[error("node {node} expects {expected} input edges but got {actual}")]
    NodeArityMismatch {
        node: usize,
        expected: usize,
        actual: usize,
    },
    #[error("diff key arity mismatch: left key has {left} positions, right key has {right}")]
    DiffKeyArityMismatch { left: usize, right: usize },
    #[error("provider {name:?} is registered as {registered} but node requires {required}")]
    ProviderKindMismatch {
        name: String,
        registered: &'static str,
        required: &'static str,
    },
}

/// Runtime state failures: synchronous, engine state unchanged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("query {0:?} has been deactivated")]
    Deactivated(String),
    #[error("subscription id {0:?} is already in use for this query")]
    DuplicateSubscription(String),
    #[error("end_transaction called without a matching begin_transaction")]
    NoActiveTransaction,
    #[error("begin_transaction called while a transaction is already open")]
    TransactionAlreadyOpen,
    #[error("query {0:?} is not registered")]
    UnknownQuery(String),
}

/// Failures raised inside a Compute provider's `delta_since`/`eval_many`.
/// Treated as a batch-level failure of the affected Compute node (§7): the
/// Batch Manager discards the in-flight delta for that graph and routes the
/// error through the subscriber-notification path instead of a normal one.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider {relation:?} failed: {message}")]
    Failed { relation: String, message: String },
    #[error(
        "provider {relation:?} is non-deterministic: eval_many disagreed with stored truth for an \
         unannounced flip"
    )]
    NonDeterministic { relation: String },
}

/// Top-level error returned by the Engine API (§6.1).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}
