//! Rename (ρ) (§4.4): stateless schema-only relabeling. The tuple payload
//! is unchanged, so `consume` is the identity on deltas; in practice a
//! query planner can compile a Rename away entirely, but it is kept as a
//! real node so graph wiring never needs a special case for it.

use crate::delta::Delta;

#[derive(Debug, Clone, Default)]
pub struct RenameState;

impl RenameState {
    pub fn new() -> Self {
        RenameState
    }

    pub fn consume(&mut self, delta: &Delta) -> Delta {
        delta.clone()
    }
}
