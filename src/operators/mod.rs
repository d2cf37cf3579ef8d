//! Operator layer (§4): the seven node kinds a `QueryGraph` is built from.
//!
//! Dispatch is a tagged enum rather than trait objects — the operator set is
//! closed and small, and matching on a fixed enum lets the graph runtime
//! avoid a vtable indirection on every tuple flowing through a hot batch
//! (§9 design note).

pub mod compute;
pub mod diff;
pub mod join;
pub mod project;
pub mod rename;
pub mod scan;
pub mod union;

pub use compute::ComputeState;
pub use diff::DiffState;
pub use join::{JoinAtomSpec, JoinState};
pub use project::ProjectState;
pub use rename::RenameState;
pub use scan::ScanState;
pub use union::UnionState;

use crate::delta::Delta;
use crate::error::ProviderError;
use crate::provider::Provider;

/// One node's behavior. Construction happens through each state's own
/// constructor (`ScanState::new`, `JoinState::new`, ...); this enum exists
/// purely to let the graph runtime hold a homogeneous `Vec<Operator>` and
/// dispatch a batch to whichever kind a given node is.
#[derive(Debug, Clone)]
pub enum Operator {
    Scan(ScanState),
    Project(ProjectState),
    Union(UnionState),
    Rename(RenameState),
    Diff(DiffState),
    Compute(ComputeState),
    Join(JoinState),
}

impl Operator {
    /// Number of graph-edge inputs this node expects in `process`'s `inputs`
    /// slice. Scan and an enumerable Compute have none — they are driven
    /// directly from outside the graph (`push_base_delta` / a provider poll
    /// folded into `process`).
    pub fn input_count(&self) -> usize {
        match self {
            Operator::Scan(_) => 0,
            Operator::Project(_) => 1,
            Operator::Union(u) => u.input_count(),
            Operator::Rename(_) => 1,
            Operator::Diff(_) => 2,
            Operator::Compute(ComputeState::Enumerable { .. }) => 0,
            Operator::Compute(ComputeState::Pointwise { .. }) => 1,
            Operator::Join(j) => j.input_labels().len(),
        }
    }

    /// Feeds a base-relation delta directly into a Scan node. Scan has no
    /// graph-edge inputs, so this bypasses `process`.
    pub fn push_base_delta(&mut self, delta: Delta) -> Delta {
        match self {
            Operator::Scan(s) => s.push_delta(delta),
            other => panic!("push_base_delta called on non-Scan operator {other:?}"),
        }
    }

    /// Processes one batch: `inputs[i]` is the normalized delta arriving on
    /// graph-edge `i`, in the node's declared input order. `provider` is
    /// required (and must match the Compute node's own flavor) exactly when
    /// this node is a `Compute` node; every other variant ignores it.
    pub fn process(&mut self, inputs: &[Delta], provider: Option<&Provider>) -> Result<Delta, ProviderError> {
        match self {
            Operator::Scan(_) => panic!("Scan has no graph inputs; use push_base_delta"),
            Operator::Project(p) => Ok(p.consume(&inputs[0])),
            Operator::Union(u) => Ok(u.consume_batch(inputs)),
            Operator::Rename(r) => Ok(r.consume(&inputs[0])),
            Operator::Diff(d) => Ok(d.consume_batch(&inputs[0], &inputs[1])),
            Operator::Compute(compute) => match (compute, provider) {
                (ComputeState::Enumerable { .. }, Some(Provider::Enumerable(ep))) => {
                    compute.process_enumerable(ep.as_ref())
                }
                (ComputeState::Pointwise { .. }, Some(Provider::Pointwise(pp))) => {
                    compute.process_pointwise(&inputs[0], pp.as_ref())
                }
                (ComputeState::Enumerable { relation, .. }, _) => {
                    panic!("Compute node for {relation:?} needs an EnumerableProvider")
                }
                (ComputeState::Pointwise { relation, .. }, _) => {
                    panic!("Compute node for {relation:?} needs a PointwiseProvider")
                }
            },
            Operator::Join(j) => Ok(j.consume_batch(inputs)),
        }
    }
}
