//! Model-based property tests for the controller.
//!
//! Arbitrary operation sequences are applied to a real controller over the
//! recording fakes and to the sequential [`ModelLifecycle`]. After every
//! operation the observable states must match and every standard invariant
//! must hold.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use latchkey_app::{Controller, UnlockOutcome};
use latchkey_core::{LockReason, Passphrase, UnlockError};
use latchkey_harness::{
    Call, ExpectedUnlock, Fixture, InvariantRegistry, LifecycleSnapshot, ModelLifecycle,
    ObservableState, Operation, SimEnv, VALID_PASSPHRASE,
};
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

fn observe(controller: &Controller<SimEnv>, fixture: &Fixture) -> ObservableState {
    ObservableState {
        lock_state: controller.lock_state(),
        visibility: controller.visibility(),
        secret_available: controller.secret_store().is_available(),
        secret_present: controller.secret_store().is_present(),
        initialized: controller.is_initialized(),
        resumes: fixture.log.count(&Call::WarmCaches),
        pauses: fixture.log.count(&Call::EndVisibleTracking),
    }
}

/// Let spawned tasks run without advancing the clock.
async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

async fn apply(
    controller: &Controller<SimEnv>,
    op: Operation,
) -> Result<Option<ExpectedUnlock>, TestCaseError> {
    let outcome = match op {
        Operation::Unlock { valid } => {
            let passphrase = if valid { VALID_PASSPHRASE } else { "wrong" };
            Some(match controller.unlock(Passphrase::from(passphrase)).await {
                Ok(UnlockOutcome::Unlocked) => ExpectedUnlock::Unlocked,
                Ok(UnlockOutcome::AlreadyUnlocked) => ExpectedUnlock::AlreadyUnlocked,
                Err(UnlockError::InvalidPassphrase) => ExpectedUnlock::Rejected,
                Err(other) => return Err(TestCaseError::fail(format!("unlock failed: {other}"))),
            })
        },
        Operation::Lock => {
            controller.lock(LockReason::UserRequested).await;
            None
        },
        Operation::LockEvent => {
            controller.lock_events().send(LockReason::Timeout);
            None
        },
        Operation::Foreground => {
            controller.on_foreground();
            None
        },
        Operation::Background => {
            controller.on_background();
            None
        },
        Operation::Advance { millis } => {
            tokio::time::sleep(Duration::from_millis(u64::from(millis))).await;
            None
        },
        Operation::Terminate => {
            controller.terminate().await;
            None
        },
    };
    settle().await;
    Ok(outcome)
}

fn run(ops: Vec<Operation>) -> Result<(), TestCaseError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap();

    runtime.block_on(async move {
        let fixture = Fixture::new();
        let controller = fixture.launch().await.unwrap();
        let mut model = ModelLifecycle::new(&latchkey_core::LifecycleConfig::default());
        let registry = InvariantRegistry::standard();

        for (index, op) in ops.into_iter().enumerate() {
            let actual = apply(&controller, op).await?;
            let expected = model.apply(op);

            prop_assert_eq!(actual, expected, "op {}: {:?}", index, op);
            prop_assert_eq!(
                observe(&controller, &fixture),
                model.observable(),
                "op {}: {:?}",
                index,
                op
            );

            let snapshot = LifecycleSnapshot::capture(&controller, &fixture);
            if let Err(violations) = registry.check_all(&snapshot) {
                return Err(TestCaseError::fail(format!("op {index}: {op:?}: {violations:?}")));
            }
        }
        Ok(())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_controller_matches_model(ops in prop::collection::vec(operation_strategy(), 1..40)) {
        run(ops)?;
    }
}
