//! Compute (§4.6): a node fed by an `EnumerableProvider` (behaves like a
//! Scan over the provider's current set) or a `PointwiseProvider` (a
//! predicate over upstream-derived candidates, with an optional
//! independent-flip channel).

use crate::delta::Delta;
use crate::error::ProviderError;
use crate::provider::{EnumerableProvider, PointwiseProvider, StateHandle};
use crate::value::Tuple;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub enum ComputeState {
    Enumerable {
        relation: String,
        last_handle: Option<StateHandle>,
    },
    Pointwise {
        relation: String,
        watch: HashSet<Tuple>,
        truth: HashMap<Tuple, bool>,
        last_handle: StateHandle,
    },
}

impl ComputeState {
    pub fn enumerable(relation: impl Into<String>) -> Self {
        ComputeState::Enumerable {
            relation: relation.into(),
            last_handle: None,
        }
    }

    pub fn pointwise(relation: impl Into<String>) -> Self {
        ComputeState::Pointwise {
            relation: relation.into(),
            watch: HashSet::new(),
            truth: HashMap::new(),
            last_handle: 0,
        }
    }

    pub fn relation(&self) -> &str {
        match self {
            ComputeState::Enumerable { relation, .. } => relation,
            ComputeState::Pointwise { relation, .. } => relation,
        }
    }

    /// Drives an enumerable-backed node forward one flush. On the first
    /// call (cold start), pulls the full `enumerate()`; afterwards pulls
    /// only `delta_since(last_handle)` (I-C1).
    pub fn process_enumerable(
        &mut self,
        provider: &dyn EnumerableProvider,
    ) -> Result<Delta, ProviderError> {
        let ComputeState::Enumerable { relation, last_handle } = self else {
            panic!("process_enumerable called on a Pointwise ComputeState");
        };
        match last_handle {
            None => {
                let initial = provider.enumerate()?;
                *last_handle = Some(provider.current_handle());
                tracing::debug!(relation = %relation, count = initial.len(), "compute cold start");
                Ok(Delta::from_sets(initial.into_iter().collect(), Default::default()))
            }
            Some(handle) => {
                let (delta, new_handle) = provider.delta_since(*handle)?;
                *last_handle = Some(new_handle);
                Ok(delta)
            }
        }
    }

    /// Drives a pointwise-backed node forward one flush, given the
    /// upstream delta of candidate tuples for this batch (removes before
    /// adds per §5, then flips are consulted if supported) (I-C1).
    pub fn process_pointwise(
        &mut self,
        upstream: &Delta,
        provider: &dyn PointwiseProvider,
    ) -> Result<Delta, ProviderError> {
        let ComputeState::Pointwise {
            relation,
            watch,
            truth,
            last_handle,
        } = self
        else {
            panic!("process_pointwise called on an Enumerable ComputeState");
        };

        let mut out = Delta::empty();

        for t in &upstream.removes {
            if truth.remove(t) == Some(true) {
                out.removes.insert(t.clone());
            }
            watch.remove(t);
        }

        let mut new_candidates = HashSet::new();
        for t in &upstream.adds {
            watch.insert(t.clone());
            new_candidates.insert(t.clone());
        }
        if !new_candidates.is_empty() {
            let true_set = provider.eval_many(&new_candidates)?;
            for t in &new_candidates {
                let is_true = true_set.contains(t);
                truth.insert(t.clone(), is_true);
                if is_true {
                    out.adds.insert(t.clone());
                }
            }
        }

        if provider.supports_flips() {
            let (true_flips, false_flips, new_handle) =
                provider.flips_since(*last_handle, watch)?;
            if !true_flips.is_disjoint(&false_flips) {
                return Err(ProviderError::NonDeterministic {
                    relation: relation.clone(),
                });
            }
            *last_handle = new_handle;
            for t in true_flips.intersection(watch) {
                if truth.get(t).copied().unwrap_or(false) {
                    continue;
                }
                truth.insert(t.clone(), true);
                out.adds.insert(t.clone());
            }
            for t in false_flips.intersection(watch) {
                if !truth.get(t).copied().unwrap_or(false) {
                    continue;
                }
                truth.insert(t.clone(), false);
                out.removes.insert(t.clone());
            }
        }

        out.normalize();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Atom;
    use std::sync::Mutex;

    fn t(p: &str, v: i64) -> Tuple {
        Tuple::new(vec![Atom::symbol(p), Atom::integer(v)])
    }

    struct FixedEnumerable {
        calls: Mutex<u32>,
    }

    impl EnumerableProvider for FixedEnumerable {
        fn enumerate(&self) -> Result<HashSet<Tuple>, ProviderError> {
            Ok([t("p1", 10), t("p2", 20)].into_iter().collect())
        }

        fn delta_since(&self, _handle: StateHandle) -> Result<(Delta, StateHandle), ProviderError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            Ok((
                Delta::from_sets([t("p3", 30)].into(), [t("p1", 10)].into()),
                *calls as StateHandle,
            ))
        }

        fn current_handle(&self) -> StateHandle {
            0
        }
    }

    #[test]
    fn s6_enumerable_cold_start_then_delta() {
        let provider = FixedEnumerable { calls: Mutex::new(0) };
        let mut state = ComputeState::enumerable("prices");

        let cold = state.process_enumerable(&provider).unwrap();
        assert_eq!(cold.adds, [t("p1", 10), t("p2", 20)].into());

        let next = state.process_enumerable(&provider).unwrap();
        assert_eq!(next.adds, [t("p3", 30)].into());
        assert_eq!(next.removes, [t("p1", 10)].into());
    }

    struct AlwaysTrue;
    impl PointwiseProvider for AlwaysTrue {
        fn eval_many(&self, candidates: &HashSet<Tuple>) -> Result<HashSet<Tuple>, ProviderError> {
            Ok(candidates.clone())
        }
    }

    #[test]
    fn pointwise_emits_add_for_true_candidates_and_remove_on_drop() {
        let provider = AlwaysTrue;
        let mut state = ComputeState::pointwise("watched");
        let out = state
            .process_pointwise(&Delta::add(t("p1", 1)), &provider)
            .unwrap();
        assert_eq!(out.adds, [t("p1", 1)].into());

        let out = state
            .process_pointwise(&Delta::remove(t("p1", 1)), &provider)
            .unwrap();
        assert_eq!(out.removes, [t("p1", 1)].into());
    }

    struct FlippingProvider;
    impl PointwiseProvider for FlippingProvider {
        fn eval_many(&self, _candidates: &HashSet<Tuple>) -> Result<HashSet<Tuple>, ProviderError> {
            Ok(HashSet::new())
        }
        fn supports_flips(&self) -> bool {
            true
        }
        fn flips_since(
            &self,
            handle: StateHandle,
            watched: &HashSet<Tuple>,
        ) -> Result<(HashSet<Tuple>, HashSet<Tuple>, StateHandle), ProviderError> {
            Ok((watched.clone(), HashSet::new(), handle + 1))
        }
    }

    #[test]
    fn flip_to_true_emits_add_only_once() {
        let provider = FlippingProvider;
        let mut state = ComputeState::pointwise("flags");
        state
            .process_pointwise(&Delta::add(t("p1", 1)), &provider)
            .unwrap();
        let out = state.process_pointwise(&Delta::empty(), &provider).unwrap();
        assert_eq!(out.adds, [t("p1", 1)].into());
        // Second flip round with truth already 1: no re-emission.
        let out = state.process_pointwise(&Delta::empty(), &provider).unwrap();
        assert!(out.is_empty());
    }

    struct NonDeterministicProvider;
    impl PointwiseProvider for NonDeterministicProvider {
        fn eval_many(&self, _candidates: &HashSet<Tuple>) -> Result<HashSet<Tuple>, ProviderError> {
            Ok(HashSet::new())
        }
        fn supports_flips(&self) -> bool {
            true
        }
        fn flips_since(
            &self,
            handle: StateHandle,
            watched: &HashSet<Tuple>,
        ) -> Result<(HashSet<Tuple>, HashSet<Tuple>, StateHandle), ProviderError> {
            Ok((watched.clone(), watched.clone(), handle + 1))
        }
    }

    #[test]
    fn contradictory_flips_are_rejected() {
        let provider = NonDeterministicProvider;
        let mut state = ComputeState::pointwise("flags");
        state
            .process_pointwise(&Delta::add(t("p1", 1)), &provider)
            .unwrap();
        let err = state.process_pointwise(&Delta::empty(), &provider).unwrap_err();
        assert!(matches!(err, ProviderError::NonDeterministic { .. }));
    }
}
