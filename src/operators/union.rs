//! Union (∪) (§4.3): disjunction of >= 2 schema-compatible inputs, tracking
//! a per-tuple input-contribution count.

use crate::delta::Delta;
use crate::value::Tuple;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct UnionState {
    input_count: usize,
    counts: HashMap<Tuple, u64>,
}

impl UnionState {
    pub fn new(input_count: usize) -> Self {
        assert!(input_count >= 2, "Union requires at least 2 inputs");
        UnionState {
            input_count,
            counts: HashMap::new(),
        }
    }

    pub fn input_count(&self) -> usize {
        self.input_count
    }

    /// Processes one batch across all inputs. `inputs[i]` is input `i`'s
    /// delta for this batch (empty if it had no change). Each input's
    /// removes are applied before its adds, inputs are processed in slot
    /// order, and the accumulated per-input output deltas are merged
    /// (renormalized) before being returned, so a tuple flickering 0→1→0
    /// across distinct inputs within one batch cancels (§4.3).
    pub fn consume_batch(&mut self, inputs: &[Delta]) -> Delta {
        assert_eq!(inputs.len(), self.input_count, "Union got wrong number of input slots");
        let mut out = Delta::empty();
        for delta in inputs {
            for t in &delta.removes {
                let entry = self
                    .counts
                    .get_mut(t)
                    .unwrap_or_else(|| panic!("union invariant violated: remove with no supporting count for {t}"));
                *entry -= 1;
                if *entry == 0 {
                    self.counts.remove(t);
                    out.removes.insert(t.clone());
                }
            }
            for t in &delta.adds {
                let entry = self.counts.entry(t.clone()).or_insert(0);
                *entry += 1;
                if *entry == 1 {
                    out.adds.insert(t.clone());
                }
            }
        }
        out.normalize();
        out
    }
}
