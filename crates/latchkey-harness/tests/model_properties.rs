//! Property-based tests for the reference lifecycle model.
//!
//! The model is the oracle for controller tests, so its own guarantees are
//! checked first: no secret is issued while locked, and resident key bytes
//! never outlive the grace window of the lock that sealed them.

use latchkey_core::{LifecycleConfig, LockState};
use latchkey_harness::{ExpectedUnlock, ModelLifecycle, Operation};
use proptest::prelude::*;

fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        3 => any::<bool>().prop_map(|valid| Operation::Unlock { valid }),
        2 => Just(Operation::Lock),
        1 => Just(Operation::LockEvent),
        2 => Just(Operation::Foreground),
        2 => Just(Operation::Background),
        3 => (0u16..2500).prop_map(|millis| Operation::Advance { millis }),
        1 => Just(Operation::Terminate),
    ]
}

proptest! {
    #[test]
    fn prop_secret_only_available_while_unlocked(
        ops in prop::collection::vec(operation_strategy(), 1..80),
    ) {
        let mut model = ModelLifecycle::new(&LifecycleConfig::default());
        for op in ops {
            model.apply(op);
            let state = model.observable();
            prop_assert_eq!(state.secret_available, state.lock_state == LockState::Unlocked);
            if state.secret_available {
                prop_assert!(state.secret_present);
            }
        }
    }

    #[test]
    fn prop_secret_cleared_after_grace(
        ops in prop::collection::vec(operation_strategy(), 1..80),
    ) {
        let mut model = ModelLifecycle::new(&LifecycleConfig::default());
        for op in ops {
            model.apply(op);
        }

        if model.observable().lock_state == LockState::Locked {
            model.apply(Operation::Advance { millis: 1000 });
            prop_assert!(!model.observable().secret_present);
        }
    }

    #[test]
    fn prop_unlock_only_runs_from_locked(
        ops in prop::collection::vec(operation_strategy(), 1..80),
    ) {
        let mut model = ModelLifecycle::new(&LifecycleConfig::default());
        for op in ops {
            let before = model.observable().lock_state;
            if let Some(outcome) = model.apply(op) {
                prop_assert_eq!(
                    outcome == ExpectedUnlock::AlreadyUnlocked,
                    before == LockState::Unlocked
                );
            }
        }
    }
}
