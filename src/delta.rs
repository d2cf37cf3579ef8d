//! Deltas: normalized `(adds, removes)` pairs over a relation (§3.4).
//!
//! Every delta that exits an operator satisfies I-D1: deduplicated and
//! cancellation-free (a tuple never appears in both `adds` and `removes`).

use crate::value::Tuple;
use std::collections::BTreeSet;

/// A set of distinct tuples, ordered by `Tuple`'s total order so that
/// iteration order is deterministic (useful for tests and for join atoms,
/// which additionally re-sort by VO prefix before probing).
pub type TupleSet = BTreeSet<Tuple>;

/// A normalized `(adds, removes)` pair over one relation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub adds: TupleSet,
    pub removes: TupleSet,
}

impl Delta {
    pub fn empty() -> Self {
        Delta::default()
    }

    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.removes.is_empty()
    }

    pub fn add(tuple: Tuple) -> Self {
        let mut d = Delta::empty();
        d.adds.insert(tuple);
        d
    }

    pub fn remove(tuple: Tuple) -> Self {
        let mut d = Delta::empty();
        d.removes.insert(tuple);
        d
    }

    pub fn from_sets(adds: TupleSet, removes: TupleSet) -> Self {
        let mut d = Delta { adds, removes };
        d.normalize();
        d
    }

    /// I-D1: dedup (guaranteed by `BTreeSet`) plus opposite cancellation —
    /// `adds := adds \ removes; removes := removes \ adds` (computed against
    /// the pre-cancellation sets, so a tuple present in both is removed from
    /// both, never just one).
    pub fn normalize(&mut self) {
        let both: Vec<Tuple> = self.adds.intersection(&self.removes).cloned().collect();
        for t in both {
            self.adds.remove(&t);
            self.removes.remove(&t);
        }
    }

    /// Merge two deltas: union each component, then renormalize so
    /// intra-batch 0→1→0 or 1→0→1 sequences cancel (S3).
    pub fn merge(mut self, other: Delta) -> Delta {
        self.adds.extend(other.adds);
        self.removes.extend(other.removes);
        self.normalize();
        self
    }

    pub fn merge_in_place(&mut self, other: &Delta) {
        self.adds.extend(other.adds.iter().cloned());
        self.removes.extend(other.removes.iter().cloned());
        self.normalize();
    }

    pub fn len(&self) -> usize {
        self.adds.len() + self.removes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Atom;

    fn t(v: i64) -> Tuple {
        Tuple::new(vec![Atom::integer(v)])
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut d = Delta::from_sets([t(1)].into(), [t(1), t(2)].into());
        let once = d.clone();
        d.normalize();
        assert_eq!(d, once);
    }

    #[test]
    fn cancellation_removes_tuple_from_both_sides() {
        let d = Delta::from_sets([t(2)].into(), [t(2)].into());
        assert!(d.is_empty());
        assert!(!d.adds.contains(&t(2)));
        assert!(!d.removes.contains(&t(2)));
    }

    #[test]
    fn merge_cancels_across_deltas() {
        let a = Delta::add(t(5));
        let b = Delta::remove(t(5));
        let merged = a.merge(b);
        assert!(merged.is_empty());
    }

    #[test]
    fn merge_is_set_union_when_no_overlap() {
        let a = Delta::add(t(1));
        let b = Delta::add(t(2));
        let merged = a.merge(b);
        assert_eq!(merged.adds.len(), 2);
    }
}
