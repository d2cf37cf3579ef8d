//! Compute provider contract (§4.6, §6.4): external collaborators that feed
//! a `Compute` node either as an enumerable observable set or as a
//! pointwise predicate over candidate tuples.

use crate::delta::Delta;
use crate::error::ProviderError;
use crate::value::Tuple;
use std::collections::HashSet;

/// Opaque, provider-assigned cursor into its own change stream. Must be
/// monotonically non-decreasing across calls for a given provider (§6.4).
pub type StateHandle = u64;

/// An enumerable provider owns an external, observable set and can report
/// what changed since a previously-issued handle.
pub trait EnumerableProvider: Send + Sync {
    /// Full current enumeration, used for cold start.
    fn enumerate(&self) -> Result<HashSet<Tuple>, ProviderError>;

    /// Changes since `handle`, plus the new handle to store for next time.
    fn delta_since(&self, handle: StateHandle) -> Result<(Delta, StateHandle), ProviderError>;

    /// The provider's current handle (used to seed cold start).
    fn current_handle(&self) -> StateHandle;
}

/// A pointwise provider is a predicate over candidate tuples supplied by
/// upstream, optionally able to report independent truth flips.
pub trait PointwiseProvider: Send + Sync {
    /// Evaluate the predicate over exactly the given candidates.
    fn eval_many(&self, candidates: &HashSet<Tuple>) -> Result<HashSet<Tuple>, ProviderError>;

    /// Whether this provider can report flips independent of upstream
    /// deltas. Default: no.
    fn supports_flips(&self) -> bool {
        false
    }

    /// Tuples among `watched` whose truth flipped since `handle`, split
    /// into newly-true and newly-false, plus the new handle. Only called
    /// when `supports_flips()` is true.
    fn flips_since(
        &self,
        handle: StateHandle,
        watched: &HashSet<Tuple>,
    ) -> Result<(HashSet<Tuple>, HashSet<Tuple>, StateHandle), ProviderError> {
        let _ = watched;
        Ok((HashSet::new(), HashSet::new(), handle))
    }
}

/// A registered provider, tagged by which contract it implements.
pub enum Provider {
    Enumerable(std::sync::Arc<dyn EnumerableProvider>),
    Pointwise(std::sync::Arc<dyn PointwiseProvider>),
}
