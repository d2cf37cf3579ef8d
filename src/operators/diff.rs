//! Diff / anti-join (▷) (§4.5): `Left ▷_K Right` emits `l ∈ Left` with no
//! matching key in `Right`.

use crate::delta::Delta;
use crate::value::Tuple;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct DiffState {
    left_key_indices: Vec<usize>,
    right_key_indices: Vec<usize>,
    left: HashSet<Tuple>,
    right_support: HashMap<Tuple, u64>,
    left_by_key: HashMap<Tuple, HashSet<Tuple>>,
}

impl DiffState {
    pub fn new(left_key_indices: Vec<usize>, right_key_indices: Vec<usize>) -> Self {
        assert_eq!(
            left_key_indices.len(),
            right_key_indices.len(),
            "Diff key arity must match on both sides"
        );
        DiffState {
            left_key_indices,
            right_key_indices,
            left: HashSet::new(),
            right_support: HashMap::new(),
            left_by_key: HashMap::new(),
        }
    }

    fn key_l(&self, t: &Tuple) -> Tuple {
        t.project(&self.left_key_indices)
    }

    fn key_r(&self, t: &Tuple) -> Tuple {
        t.project(&self.right_key_indices)
    }

    pub fn is_supported(&self, key: &Tuple) -> bool {
        self.right_support.get(key).copied().unwrap_or(0) > 0
    }

    /// Processes one batch: `left` and `right` deltas for this graph edge,
    /// removes before adds within each side, right side processed the way
    /// §4.5 specifies (it drives bulk emissions over `left_by_key`).
    pub fn consume_batch(&mut self, left: &Delta, right: &Delta) -> Delta {
        let mut out = Delta::empty();

        for l in &left.removes {
            let k = self.key_l(l);
            if !self.is_supported(&k) {
                out.removes.insert(l.clone());
            }
            self.left.remove(l);
            if let Some(set) = self.left_by_key.get_mut(&k) {
                set.remove(l);
                if set.is_empty() {
                    self.left_by_key.remove(&k);
                }
            }
        }

        for r in &right.removes {
            let k = self.key_r(r);
            let entry = self
                .right_support
                .get_mut(&k)
                .unwrap_or_else(|| panic!("diff invariant violated: right remove with no support for key {k}"));
            *entry -= 1;
            if *entry == 0 {
                self.right_support.remove(&k);
                if let Some(ls) = self.left_by_key.get(&k) {
                    out.adds.extend(ls.iter().cloned());
                }
            }
        }

        for r in &right.adds {
            let k = self.key_r(r);
            let entry = self.right_support.entry(k.clone()).or_insert(0);
            *entry += 1;
            if *entry == 1 {
                if let Some(ls) = self.left_by_key.get(&k) {
                    out.removes.extend(ls.iter().cloned());
                }
            }
        }

        for l in &left.adds {
            let k = self.key_l(l);
            self.left.insert(l.clone());
            self.left_by_key.entry(k.clone()).or_default().insert(l.clone());
            if !self.is_supported(&k) {
                out.adds.insert(l.clone());
            }
        }

        out.normalize();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Atom;

    fn user(uid: &str) -> Tuple {
        Tuple::new(vec![Atom::symbol(uid), Atom::string(format!("name-{uid}"))])
    }

    fn order(oid: &str, uid: &str) -> Tuple {
        Tuple::new(vec![Atom::symbol(oid), Atom::symbol(uid), Atom::integer(100)])
    }

    #[test]
    fn s1_anti_join_with_support_counts() {
        // Users(uid,name), key index 0; Orders(oid,uid,amt), key index 1.
        let mut diff = DiffState::new(vec![0], vec![1]);

        let users = Delta::from_sets(
            [user("u1"), user("u2"), user("u3")].into(),
            [].into(),
        );
        let out = diff.consume_batch(&users, &Delta::empty());
        // No orders yet: every user currently unmatched -> all three emitted.
        assert_eq!(out.adds.len(), 3);

        let orders = Delta::add(order("o1", "u1")).merge(Delta::add(order("o2", "u2")));
        let out = diff.consume_batch(&Delta::empty(), &orders);
        assert_eq!(out.removes, [user("u1"), user("u2")].into());

        // Remove o1: u1 becomes unmatched again.
        let out = diff.consume_batch(&Delta::empty(), &Delta::remove(order("o1", "u1")));
        assert_eq!(out.adds, [user("u1")].into());
    }
}
