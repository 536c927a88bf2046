//! Ordinal fault injection for transport steps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use teep_core::TransportError;

#[derive(Debug, Default)]
struct Counters {
    /// Transport steps taken so far (connect, send, receive).
    steps: AtomicU64,
    /// Absolute step number that fails next; 0 when disarmed.
    fail_on: AtomicU64,
}

/// Shared handle: clones observe and arm the same counters.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    inner: Arc<Counters>,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `k`-th subsequent step (1-based) fail once.
    pub fn fail_at(&self, k: u64) {
        let now = self.inner.steps.load(Ordering::SeqCst);
        let target = if k == 0 { 0 } else { now + k };
        self.inner.fail_on.store(target, Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.inner.fail_on.store(0, Ordering::SeqCst);
    }

    pub fn steps(&self) -> u64 {
        self.inner.steps.load(Ordering::SeqCst)
    }

    /// Count one step and fail it if it is the armed one.
    pub fn check(&self) -> Result<(), TransportError> {
        let step = self.inner.steps.fetch_add(1, Ordering::SeqCst) + 1;
        match self.inner.fail_on.compare_exchange(step, 0, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => Err(TransportError::Injected(step)),
            Err(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fails_exactly_once_at_the_armed_step() {
        let plan = FaultPlan::new();
        plan.check().unwrap();
        plan.fail_at(2);
        assert!(plan.check().is_ok());
        assert_eq!(plan.check(), Err(TransportError::Injected(3)));
        assert!(plan.check().is_ok());
        assert_eq!(plan.steps(), 4);
    }

    #[test]
    fn disarm_and_zero_mean_no_fault() {
        let plan = FaultPlan::new();
        plan.fail_at(1);
        plan.disarm();
        assert!(plan.check().is_ok());
        plan.fail_at(0);
        assert!(plan.check().is_ok());
    }

    #[test]
    fn clones_share_state() {
        let plan = FaultPlan::new();
        let handle = plan.clone();
        handle.fail_at(1);
        assert!(plan.check().is_err());
        assert_eq!(handle.steps(), 1);
    }
}
