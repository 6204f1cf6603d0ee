//! Pluggable breaker state backend
//!
//! The breaker state is logically process-wide but physically best-effort in
//! a multi-instance edge topology. This seam lets the in-memory store be
//! swapped for a shared external store (a key-value cache with
//! get/compare-and-swap) without touching the classifier, state machine, or
//! reporter, which all stay pure over snapshots.

use parking_lot::Mutex;

use crate::failsafe::BreakerSnapshot;

/// Serialized access to the shared breaker state.
///
/// `update` runs a read-modify-write as one atomic step with respect to other
/// callers; concurrent mutations must never lose counter increments.
pub trait StateStore: Send + Sync {
    /// Read the current state
    fn snapshot(&self) -> BreakerSnapshot;

    /// Mutate the state under the store's serialization guarantee and return
    /// the state after the mutation
    fn update(&self, f: &mut dyn FnMut(&mut BreakerSnapshot)) -> BreakerSnapshot;
}

/// In-process store: a single mutex around the snapshot
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<BreakerSnapshot>,
}

impl MemoryStateStore {
    /// Create a store with a fresh (closed, zeroed) snapshot
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn snapshot(&self) -> BreakerSnapshot {
        *self.inner.lock()
    }

    fn update(&self, f: &mut dyn FnMut(&mut BreakerSnapshot)) -> BreakerSnapshot {
        let mut guard = self.inner.lock();
        f(&mut guard);
        *guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failsafe::CircuitStatus;

    #[test]
    fn test_fresh_store_starts_closed_and_zeroed() {
        let store = MemoryStateStore::new();
        let snapshot = store.snapshot();

        assert_eq!(snapshot.status, CircuitStatus::Closed);
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.consecutive_errors, 0);
    }

    #[test]
    fn test_update_returns_post_mutation_state() {
        let store = MemoryStateStore::new();

        let after = store.update(&mut |state| {
            state.total_requests += 1;
            state.consecutive_errors += 1;
        });

        assert_eq!(after.total_requests, 1);
        assert_eq!(after.consecutive_errors, 1);
        assert_eq!(store.snapshot(), after);
    }
}
