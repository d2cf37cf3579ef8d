//! Project (π) (§4.2): emits tuples projected to a subset of positions,
//! tracking a reference count per projected tuple since projection is
//! many-to-one (I-P1).

use crate::delta::Delta;
use crate::value::Tuple;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ProjectState {
    indices: Vec<usize>,
    counts: HashMap<Tuple, u64>,
}

impl ProjectState {
    pub fn new(indices: Vec<usize>) -> Self {
        ProjectState {
            indices,
            counts: HashMap::new(),
        }
    }

    pub fn get_count(&self, projected: &Tuple) -> u64 {
        self.counts.get(projected).copied().unwrap_or(0)
    }

    /// Removes before adds (§5 ordering). Emits `remove p` exactly on a
    /// 1→0 crossing and `add p` exactly on a 0→1 crossing (I-P1).
    pub fn consume(&mut self, delta: &Delta) -> Delta {
        let mut out = Delta::empty();
        for t in &delta.removes {
            let p = t.project(&self.indices);
            let entry = self
                .counts
                .get_mut(&p)
                .unwrap_or_else(|| panic!("project invariant violated: remove with no supporting count for {p}"));
            *entry -= 1;
            if *entry == 0 {
                self.counts.remove(&p);
                out.removes.insert(p);
            }
        }
        for t in &delta.adds {
            let p = t.project(&self.indices);
            let entry = self.counts.entry(p.clone()).or_insert(0);
            *entry += 1;
            if *entry == 1 {
                out.adds.insert(p);
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

    fn t(a: i64, b: i64) -> Tuple {
        Tuple::new(vec![Atom::integer(a), Atom::integer(b)])
    }

    fn p(a: i64) -> Tuple {
        Tuple::new(vec![Atom::integer(a)])
    }

    #[test]
    fn s2_projection_deduplication() {
        let mut proj = ProjectState::new(vec![0]);
        let out = proj.consume(&Delta::from_sets(
            [t(1, 100), t(1, 200), t(2, 300)].into(),
            [].into(),
        ));
        assert_eq!(out.adds, [p(1), p(2)].into());
        assert_eq!(proj.get_count(&p(1)), 2);
        assert_eq!(proj.get_count(&p(2)), 1);

        // Remove (1,100): output unchanged, count drops to 1.
        let out = proj.consume(&Delta::remove(t(1, 100)));
        assert!(out.is_empty());
        assert_eq!(proj.get_count(&p(1)), 1);

        // Remove (1,200): emits remove(1).
        let out = proj.consume(&Delta::remove(t(1, 200)));
        assert_eq!(out.removes, [p(1)].into());
        assert_eq!(proj.get_count(&p(1)), 0);
    }
}
