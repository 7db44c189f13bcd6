//! Standard lifecycle invariants.

use std::collections::HashMap;

use latchkey_core::LockState;

use super::{Invariant, InvariantResult, LifecycleSnapshot, Violation};
use crate::Call;

/// The secret store issues the secret only while unlocked.
pub struct SecretGatedByLock;

impl Invariant for SecretGatedByLock {
    fn name(&self) -> &'static str {
        "secret_gated_by_lock"
    }

    fn check(&self, state: &LifecycleSnapshot) -> InvariantResult {
        if state.secret_available && state.lock_state != LockState::Unlocked {
            return Err(Violation {
                invariant: self.name(),
                message: format!("secret available while {}", state.lock_state),
            });
        }
        Ok(())
    }
}

/// No subsystem is running once a lock has settled.
pub struct SubsystemsStoppedWhenLocked;

impl Invariant for SubsystemsStoppedWhenLocked {
    fn name(&self) -> &'static str {
        "subsystems_stopped_when_locked"
    }

    fn check(&self, state: &LifecycleSnapshot) -> InvariantResult {
        let running = state.running();
        if state.lock_state == LockState::Locked && !running.is_empty() {
            return Err(Violation {
                invariant: self.name(),
                message: format!("running while locked: {running:?}"),
            });
        }
        Ok(())
    }
}

/// Every stop undoes the most recent unmatched start.
///
/// Replays the call log against a stack: starts push, stops must pop the
/// same subsystem.
pub struct StopOrderReversesStart;

impl Invariant for StopOrderReversesStart {
    fn name(&self) -> &'static str {
        "stop_order_reverses_start"
    }

    fn check(&self, state: &LifecycleSnapshot) -> InvariantResult {
        let mut started = Vec::new();
        for (index, call) in state.calls.iter().enumerate() {
            match call {
                Call::Start(name) => started.push(*name),
                Call::Stop(name) => {
                    let expected = started.pop();
                    if expected != Some(*name) {
                        return Err(Violation {
                            invariant: self.name(),
                            message: format!(
                                "call {index}: stopped {name}, expected {}",
                                expected.unwrap_or("nothing")
                            ),
                        });
                    }
                },
                _ => {},
            }
        }
        Ok(())
    }
}

/// Each first-unlock step succeeds at most once per process.
pub struct InitStepsRunOnce;

impl Invariant for InitStepsRunOnce {
    fn name(&self) -> &'static str {
        "init_steps_run_once"
    }

    fn check(&self, state: &LifecycleSnapshot) -> InvariantResult {
        let mut successes = HashMap::new();
        for call in &state.calls {
            if let Call::Init { step, succeeded: true } = call {
                let count = successes.entry(*step).or_insert(0usize);
                *count += 1;
                if *count > 1 {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("{step} succeeded {count} times"),
                    });
                }
            }
        }
        Ok(())
    }
}

/// The job loop begins only after every subsystem of that unlock started.
///
/// Work enqueued by a subsystem during its own startup must reach a queue
/// that is already buffering.
pub struct JobLoopAfterSubsystems;

impl Invariant for JobLoopAfterSubsystems {
    fn name(&self) -> &'static str {
        "job_loop_after_subsystems"
    }

    fn check(&self, state: &LifecycleSnapshot) -> InvariantResult {
        let expected = state.subsystems.len();
        let mut starts = 0;
        for (index, call) in state.calls.iter().enumerate() {
            match call {
                Call::Start(_) => starts += 1,
                Call::BeginLoop => {
                    if starts != expected {
                        return Err(Violation {
                            invariant: self.name(),
                            message: format!(
                                "call {index}: job loop began after {starts} of {expected} starts"
                            ),
                        });
                    }
                    starts = 0;
                },
                _ => {},
            }
        }
        Ok(())
    }
}
