//! Invariant checking for lifecycle tests.
//!
//! Invariants are properties that must hold after every settled transition,
//! whatever sequence of requests led there. Tests capture a
//! [`LifecycleSnapshot`] and run a registry of [`Invariant`] checks against
//! it.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! let snapshot = LifecycleSnapshot::capture(&controller, &fixture);
//! registry.assert_all(&snapshot, "after lock");
//! ```

mod checks;
mod snapshot;

pub use checks::{
    InitStepsRunOnce, JobLoopAfterSubsystems, SecretGatedByLock, StopOrderReversesStart,
    SubsystemsStoppedWhenLocked,
};
pub use snapshot::LifecycleSnapshot;

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property that must hold for every settled snapshot.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against a snapshot.
    fn check(&self, state: &LifecycleSnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Create a registry with every lifecycle invariant.
    ///
    /// Includes:
    /// - [`SecretGatedByLock`]: no secret is issued unless unlocked
    /// - [`SubsystemsStoppedWhenLocked`]: nothing runs while locked
    /// - [`StopOrderReversesStart`]: last started is first stopped
    /// - [`InitStepsRunOnce`]: first-unlock steps succeed at most once
    /// - [`JobLoopAfterSubsystems`]: the job loop begins after every start
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(SecretGatedByLock);
        registry.add(SubsystemsStoppedWhenLocked);
        registry.add(StopOrderReversesStart);
        registry.add(InitStepsRunOnce);
        registry.add(JobLoopAfterSubsystems);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants against the given state.
    ///
    /// Returns `Ok(())` if all invariants hold, or all violations found.
    pub fn check_all(&self, state: &LifecycleSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &LifecycleSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use latchkey_core::LockState;

    use super::*;
    use crate::Call;

    fn settled(lock_state: LockState, calls: Vec<Call>) -> LifecycleSnapshot {
        LifecycleSnapshot {
            lock_state,
            secret_available: false,
            secret_present: false,
            subsystems: vec![("a", false), ("b", false)],
            job_loop_running: false,
            calls,
        }
    }

    #[test]
    fn standard_registry_has_invariants() {
        let registry = InvariantRegistry::standard();
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn clean_history_passes() {
        let calls = vec![
            Call::Start("a"),
            Call::Start("b"),
            Call::BeginLoop,
            Call::Stop("b"),
            Call::Stop("a"),
        ];
        assert!(InvariantRegistry::standard().check_all(&settled(LockState::Locked, calls)).is_ok());
    }

    #[test]
    fn out_of_order_stop_is_reported() {
        let calls = vec![Call::Start("a"), Call::Start("b"), Call::Stop("a"), Call::Stop("b")];
        let violations = InvariantRegistry::standard()
            .check_all(&settled(LockState::Locked, calls))
            .unwrap_err();

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].invariant, "stop_order_reverses_start");
    }

    #[test]
    fn secret_issued_while_locked_is_reported() {
        let mut snapshot = settled(LockState::Locked, Vec::new());
        snapshot.secret_available = true;

        let violations = InvariantRegistry::standard().check_all(&snapshot).unwrap_err();
        assert_eq!(violations[0].invariant, "secret_gated_by_lock");
    }
}
