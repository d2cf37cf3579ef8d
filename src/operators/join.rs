//! Join — Leapfrog Triejoin / LFTJ+ (§4.7). The most substantial operator:
//! an n-ary worst-case-optimal join parameterized by a global Variable
//! Order (VO), maintained incrementally by probing each input delta
//! against the other atoms' current tries rather than recomputing from
//! scratch (LFTJ+, §4.7.2).

use crate::delta::Delta;
use crate::error::ValidationError;
use crate::trie::{LevelIterator, Trie};
use crate::value::{Atom, Tuple};
use std::collections::HashMap;

/// One atom's declared variable assignment, in its own tuple's position
/// order. `label` distinguishes multiple literal occurrences of the same
/// relation in a self-join (§4.7.3) — each occurrence gets its own
/// `JoinInput`/trie even though the graph may feed them from the same Scan.
#[derive(Debug, Clone)]
pub struct JoinAtomSpec {
    pub label: String,
    pub vars: Vec<String>,
}

impl JoinAtomSpec {
    pub fn new(label: impl Into<String>, vars: Vec<String>) -> Self {
        JoinAtomSpec {
            label: label.into(),
            vars,
        }
    }
}

#[derive(Debug, Clone)]
struct JoinInput {
    label: String,
    /// Positions, in VO order, of this atom's variables within its own
    /// incoming tuple — i.e. the permutation applied before indexing so the
    /// trie is keyed in VO-restricted order regardless of the atom's
    /// declared column order (§4.7.3 "Trie ordering").
    local_order: Vec<usize>,
    /// Global VO levels this atom participates in, ascending, one per
    /// entry of `local_order`.
    participates_at: Vec<usize>,
    trie: Trie,
}

impl JoinInput {
    /// Local trie level corresponding to `global_level`, valid only when
    /// this atom participates at that level.
    fn local_level_for(&self, global_level: usize) -> usize {
        self.participates_at.partition_point(|&g| g < global_level)
    }

    fn participates_at_level(&self, global_level: usize) -> bool {
        self.participates_at.binary_search(&global_level).is_ok()
    }

    fn local_prefix(&self, bound: &[Option<Atom>], local_level: usize) -> Vec<Atom> {
        self.participates_at[..local_level]
            .iter()
            .map(|&g| bound[g].clone().expect("prefix levels must be bound"))
            .collect()
    }

    fn vo_tuple(&self, t: &Tuple) -> Tuple {
        t.project(&self.local_order)
    }

    fn insert(&mut self, t: &Tuple) {
        let vo_t = self.vo_tuple(t);
        self.trie.insert(&vo_t);
    }

    fn remove(&mut self, t: &Tuple) {
        let vo_t = self.vo_tuple(t);
        self.trie.remove(&vo_t);
    }
}

#[derive(Debug, Clone)]
pub struct JoinState {
    vo: Vec<String>,
    inputs: Vec<JoinInput>,
    /// `level_groups[l]` = indices into `inputs` of every atom that
    /// constrains `vo[l]` (§4.7, `G_l`).
    level_groups: Vec<Vec<usize>>,
    output_levels: Vec<usize>,
    witness: HashMap<Tuple, u64>,
}

impl JoinState {
    /// Builds a join over `atoms`, validating that every atom's variables
    /// are drawn from `vo`, that `output_vars` names only VO variables, and
    /// that no VO level has an empty constraining group (§4.7.3).
    pub fn new(
        vo: Vec<String>,
        atoms: Vec<JoinAtomSpec>,
        output_vars: Vec<String>,
    ) -> Result<Self, ValidationError> {
        let mut inputs = Vec::with_capacity(atoms.len());
        for atom in &atoms {
            let mut local_order = Vec::new();
            let mut participates_at = Vec::new();
            for (level, var) in vo.iter().enumerate() {
                if let Some(pos) = atom.vars.iter().position(|v| v == var) {
                    local_order.push(pos);
                    participates_at.push(level);
                }
            }
            for var in &atom.vars {
                if !vo.contains(var) {
                    return Err(ValidationError::InvalidVariableOrder(format!(
                        "atom {:?} uses variable {:?} not present in the variable order",
                        atom.label, var
                    )));
                }
            }
            let arity = local_order.len();
            inputs.push(JoinInput {
                label: atom.label.clone(),
                local_order,
                participates_at,
                trie: Trie::new(arity),
            });
        }

        let mut level_groups = vec![Vec::new(); vo.len()];
        for (level, group) in level_groups.iter_mut().enumerate() {
            for (i, input) in inputs.iter().enumerate() {
                if input.participates_at_level(level) {
                    group.push(i);
                }
            }
        }
        for (level, group) in level_groups.iter().enumerate() {
            if group.is_empty() {
                return Err(ValidationError::EmptyLevelGroup(vo[level].clone()));
            }
        }

        let mut output_levels = Vec::with_capacity(output_vars.len());
        for name in &output_vars {
            let level = vo
                .iter()
                .position(|v| v == name)
                .ok_or_else(|| ValidationError::InvalidVariableOrder(format!(
                    "output variable {name:?} is not in the variable order"
                )))?;
            output_levels.push(level);
        }

        Ok(JoinState {
            vo,
            inputs,
            level_groups,
            output_levels,
            witness: HashMap::new(),
        })
    }

    pub fn variable_order(&self) -> &[String] {
        &self.vo
    }

    pub fn input_labels(&self) -> Vec<&str> {
        self.inputs.iter().map(|i| i.label.as_str()).collect()
    }

    fn level_group(&self, level: usize) -> &[usize] {
        &self.level_groups[level]
    }

    fn build_output(&self, bound: &[Option<Atom>]) -> Tuple {
        Tuple::new(
            self.output_levels
                .iter()
                .map(|&l| bound[l].clone().expect("witness fully bound at output time"))
                .collect(),
        )
    }

    fn make_iter(&self, input_idx: usize, level: usize, bound: &[Option<Atom>]) -> LevelIterator<'_> {
        let input = &self.inputs[input_idx];
        let local_level = input.local_level_for(level);
        let prefix = input.local_prefix(bound, local_level);
        input.trie.level_iter(local_level, &prefix)
    }

    /// Recursive leapfrog descent (§4.7.1), modified per §4.7.2 to treat a
    /// level already fixed by the probed atom's own bound prefix as a
    /// membership check against the *other* atoms rather than a fresh
    /// intersection (atom `exclude_idx`'s own trie is never consulted,
    /// avoiding double-counting the tuple being added/removed).
    fn probe_level(
        &self,
        exclude_idx: usize,
        level: usize,
        bound: &mut Vec<Option<Atom>>,
        witnesses: &mut Vec<Tuple>,
    ) {
        if level == self.vo.len() {
            witnesses.push(self.build_output(bound.as_slice()));
            return;
        }

        if let Some(fixed) = bound[level].clone() {
            for &j in self.level_group(level) {
                if j == exclude_idx {
                    continue;
                }
                let mut it = self.make_iter(j, level, bound.as_slice());
                it.seek_ge(&fixed);
                if it.key() != Some(&fixed) {
                    return;
                }
            }
            self.probe_level(exclude_idx, level + 1, bound, witnesses);
            return;
        }

        let group: Vec<usize> = self
            .level_group(level)
            .iter()
            .copied()
            .filter(|&j| j != exclude_idx)
            .collect();
        if group.is_empty() {
            return;
        }
        let mut iters: Vec<LevelIterator<'_>> = group
            .iter()
            .map(|&j| self.make_iter(j, level, bound.as_slice()))
            .collect();
        if iters.iter().any(LevelIterator::at_end) {
            return;
        }
        loop {
            let max_key = iters
                .iter()
                .map(|it| it.key().expect("checked not at_end").clone())
                .max()
                .expect("group is non-empty");
            for it in iters.iter_mut() {
                it.seek_ge(&max_key);
            }
            if iters.iter().any(LevelIterator::at_end) {
                return;
            }
            if iters.iter().all(|it| it.key() == Some(&max_key)) {
                bound[level] = Some(max_key.clone());
                self.probe_level(exclude_idx, level + 1, bound, witnesses);
                bound[level] = None;
                iters[0].next();
                if iters[0].at_end() {
                    return;
                }
            }
        }
    }

    /// Derives the bound prefix implied by `t` on input `idx` and enumerates
    /// every completion that `t` participates in (excluding `idx`'s own
    /// trie), returning the output-projected witness tuples.
    fn completions_for(&self, idx: usize, t: &Tuple) -> Vec<Tuple> {
        let input = &self.inputs[idx];
        let mut bound: Vec<Option<Atom>> = vec![None; self.vo.len()];
        for (j, &pos) in input.local_order.iter().enumerate() {
            let g = input.participates_at[j];
            bound[g] = Some(t.atom_at(pos).clone());
        }
        let mut witnesses = Vec::new();
        self.probe_level(idx, 0, &mut bound, &mut witnesses);
        witnesses
    }

    /// I-J2: `witness[o]` counts distinct full-join witnesses supporting
    /// `o`; emit only on a 0<->1 crossing, matching I-J1 after the whole
    /// batch settles.
    fn apply_witness(&mut self, o: Tuple, is_add: bool, out: &mut Delta) {
        if is_add {
            let entry = self.witness.entry(o.clone()).or_insert(0);
            *entry += 1;
            if *entry == 1 {
                out.adds.insert(o);
            }
        } else {
            let entry = self
                .witness
                .get_mut(&o)
                .unwrap_or_else(|| panic!("join invariant violated: remove witness with no support for {o}"));
            *entry -= 1;
            if *entry == 0 {
                self.witness.remove(&o);
                out.removes.insert(o);
            }
        }
    }

    /// Processes one batch: `inputs[i]` is atom `i`'s delta for this batch.
    /// Atoms are committed in slot order, each fully (its own removes then
    /// adds, per §5) before the next atom's delta is processed — the
    /// standard sequential single-relation-delta technique, which commutes
    /// to the same final witness table regardless of atom order as long as
    /// each atom's delta is fully committed before the next starts.
    pub fn consume_batch(&mut self, inputs: &[Delta]) -> Delta {
        assert_eq!(inputs.len(), self.inputs.len(), "Join got wrong number of input slots");
        let mut out = Delta::empty();

        for idx in 0..self.inputs.len() {
            let delta = &inputs[idx];
            if delta.is_empty() {
                continue;
            }

            let mut removes: Vec<&Tuple> = delta.removes.iter().collect();
            let mut adds: Vec<&Tuple> = delta.adds.iter().collect();
            removes.sort_by_key(|t| self.inputs[idx].vo_tuple(t).to_bytes());
            adds.sort_by_key(|t| self.inputs[idx].vo_tuple(t).to_bytes());

            for t in removes {
                let witnesses = self.completions_for(idx, t);
                for o in witnesses {
                    self.apply_witness(o, false, &mut out);
                }
                self.inputs[idx].remove(t);
            }
            for t in adds {
                let witnesses = self.completions_for(idx, t);
                self.inputs[idx].insert(t);
                for o in witnesses {
                    self.apply_witness(o, true, &mut out);
                }
            }
        }

        out.normalize();
        out
    }
}
