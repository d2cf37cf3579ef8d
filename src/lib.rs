//! # Incremental Query Engine
//!
//! A core incremental relational query engine: base relations and derived
//! queries built from a small, closed set of dataflow operators (Scan,
//! Project, Union, Rename, Diff, Compute, Join), maintained incrementally
//! as deltas rather than recomputed from scratch on every change.
//!
//! The join operator is worst-case-optimal: n-ary joins are evaluated with
//! Leapfrog Triejoin (LFTJ), and incremental updates are propagated by
//! probing each changed input against the other atoms' tries instead of
//! re-running the join from scratch (LFTJ+).
//!
//! ## Layout
//!
//! - [`value`] — atoms, tuples, schemas: the typed data model.
//! - [`delta`] — normalized `(adds, removes)` pairs over a relation.
//! - [`trie`] — the per-level sorted-set index backing Join.
//! - [`operators`] — the seven dataflow node kinds.
//! - [`graph`] — validated query DAGs and their live execution.
//! - [`provider`] — the Compute node's external-data contract.
//! - [`batch`] — delta accumulation and transaction bracketing.
//! - [`config`] — engine-wide configuration.
//! - [`engine`] — the façade: relations, providers, queries, subscriptions.
//!
//! ## Example
//!
//! ```
//! use incremental_qe::engine::Engine;
//! use incremental_qe::value::{Atom, DataType, Field, Schema, Tuple};
//!
//! let engine = Engine::new();
//! engine
//!     .define_relation(
//!         Schema::new(
//!             "edge",
//!             vec![
//!                 Field { name: "x".into(), data_type: DataType::Integer },
//!                 Field { name: "y".into(), data_type: DataType::Integer },
//!             ],
//!         )
//!         .unwrap(),
//!     )
//!     .unwrap();
//!
//! let mut builder = engine.build_query();
//! let scan = builder.scan("edge").unwrap();
//! builder.output("edges", scan);
//! let handle = builder.register("edges_query").unwrap();
//!
//! engine.insert("edge", Tuple::new(vec![Atom::integer(1), Atom::integer(2)])).unwrap();
//! assert_eq!(handle.get_results().unwrap()["edges"].len(), 1);
//! ```

pub mod batch;
pub mod config;
pub mod delta;
pub mod engine;
pub mod error;
pub mod graph;
pub mod operators;
pub mod provider;
pub mod trie;
pub mod value;

pub use delta::Delta;
pub use engine::{Engine, Notification, QueryBuilder, QueryHandle, Statistics};
pub use error::{EngineError, ProviderError, StateError, ValidationError};
pub use graph::{NodeId, NodeKind, QueryGraph};
pub use value::{Atom, DataType, Field, Schema, Tuple};
