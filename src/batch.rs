//! Dispatch layer (§2, §6.1): the Batch Manager accumulates and normalizes
//! incoming relational deltas per (graph, relation), coalescing add/remove
//! cancellations across every `insert`/`delete`/`update`/`apply_delta` call
//! made before the next `flush`. `Transaction` brackets many such calls
//! into a single flush by suppressing `flush_due` until `end_transaction`.

use crate::delta::Delta;
use crate::error::StateError;
use std::collections::HashMap;

/// Accumulates per-(graph, relation) deltas between flushes. Holds no
/// operator state itself — it is purely a normalize-and-coalesce staging
/// area in front of `GraphRuntime::flush` (§2 "dispatch layer").
#[derive(Debug, Default)]
pub struct BatchManager {
    pending: HashMap<String, HashMap<String, Delta>>,
    transaction_open: bool,
}

impl BatchManager {
    pub fn new() -> Self {
        BatchManager::default()
    }

    /// Merges `delta` into the accumulated pending delta for `(graph_id,
    /// relation)`, renormalizing so intra-batch 0→1→0 sequences cancel
    /// before they ever reach `GraphRuntime::flush` (I-D1, S3).
    pub fn enqueue(&mut self, graph_id: &str, relation: &str, delta: Delta) {
        let per_relation = self.pending.entry(graph_id.to_string()).or_default();
        per_relation
            .entry(relation.to_string())
            .or_insert_with(Delta::empty)
            .merge_in_place(&delta);
        per_relation.retain(|_, d| !d.is_empty());
    }

    /// Whether `begin_transaction`/`end_transaction` currently suppresses
    /// flushing (§5, §6.1).
    pub fn in_transaction(&self) -> bool {
        self.transaction_open
    }

    pub fn begin_transaction(&mut self) -> Result<(), StateError> {
        if self.transaction_open {
            return Err(StateError::TransactionAlreadyOpen);
        }
        self.transaction_open = true;
        Ok(())
    }

    pub fn end_transaction(&mut self) -> Result<(), StateError> {
        if !self.transaction_open {
            return Err(StateError::NoActiveTransaction);
        }
        self.transaction_open = false;
        Ok(())
    }

    /// Removes and returns the accumulated per-relation deltas for
    /// `graph_id`, or `None` if nothing is pending. The caller (`Engine`)
    /// owns re-queuing on failure via `restore`.
    pub fn take(&mut self, graph_id: &str) -> Option<HashMap<String, Delta>> {
        self.pending.remove(graph_id).filter(|m| !m.is_empty())
    }

    /// Every graph with at least one pending, non-empty relation delta.
    pub fn graphs_with_pending(&self) -> Vec<String> {
        self.pending
            .iter()
            .filter(|(_, deltas)| !deltas.is_empty())
            .map(|(graph_id, _)| graph_id.clone())
            .collect()
    }

    /// Re-queues a batch previously removed by `take` — used when a flush
    /// must be retried or was aborted before propagation began.
    pub fn restore(&mut self, graph_id: &str, deltas: HashMap<String, Delta>) {
        let per_relation = self.pending.entry(graph_id.to_string()).or_default();
        for (relation, delta) in deltas {
            per_relation
                .entry(relation)
                .or_insert_with(Delta::empty)
                .merge_in_place(&delta);
        }
    }

    /// `rollback()`: discards all batched but unflushed deltas for
    /// `graph_id` (or every graph, if `None`) without propagating them
    /// (§5 "cancellation granularity is at the transaction boundary").
    pub fn rollback(&mut self, graph_id: Option<&str>) {
        match graph_id {
            Some(id) => {
                self.pending.remove(id);
            }
            None => self.pending.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Atom, Tuple};

    fn t(v: i64) -> Tuple {
        Tuple::new(vec![Atom::integer(v)])
    }

    #[test]
    fn enqueue_merges_and_coalesces_within_a_graph() {
        let mut bm = BatchManager::new();
        bm.enqueue("g1", "R", Delta::add(t(1)));
        bm.enqueue("g1", "R", Delta::remove(t(1)));
        assert!(bm.take("g1").is_none());
    }

    #[test]
    fn transaction_reports_open_state() {
        let mut bm = BatchManager::new();
        assert!(!bm.in_transaction());
        bm.begin_transaction().unwrap();
        assert!(bm.in_transaction());
        assert!(matches!(
            bm.begin_transaction(),
            Err(StateError::TransactionAlreadyOpen)
        ));
        bm.end_transaction().unwrap();
        assert!(matches!(
            bm.end_transaction(),
            Err(StateError::NoActiveTransaction)
        ));
    }

    #[test]
    fn rollback_discards_pending_without_propagating() {
        let mut bm = BatchManager::new();
        bm.enqueue("g1", "R", Delta::add(t(1)));
        bm.rollback(Some("g1"));
        assert!(bm.take("g1").is_none());
    }

    #[test]
    fn take_is_scoped_per_graph() {
        let mut bm = BatchManager::new();
        bm.enqueue("g1", "R", Delta::add(t(1)));
        bm.enqueue("g2", "R", Delta::add(t(2)));
        let g1 = bm.take("g1").unwrap();
        assert_eq!(g1["R"].adds, [t(1)].into());
        assert!(bm.take("g2").is_some());
    }
}
