//! Observable lifecycle state for invariant checking.
//!
//! Snapshots must be captured between transitions (after an `unlock`,
//! `lock` or `terminate` call has returned). Mid-sequence state is
//! deliberately inconsistent: `lock` publishes `Locked` before it stops
//! anything.

use latchkey_app::Controller;
use latchkey_core::{Environment, LockState, Subsystem};

use crate::{Call, Fixture};

/// Snapshot of a controller and its fakes.
#[derive(Debug, Clone)]
pub struct LifecycleSnapshot {
    /// Published lock state
    pub lock_state: LockState,
    /// Whether the secret store would issue the secret
    pub secret_available: bool,
    /// Whether key bytes are resident, sealed or not
    pub secret_present: bool,
    /// `(name, running)` per subsystem, in start order
    pub subsystems: Vec<(&'static str, bool)>,
    /// Whether the job loop is running
    pub job_loop_running: bool,
    /// Every collaborator call so far
    pub calls: Vec<Call>,
}

impl LifecycleSnapshot {
    /// Capture the current state of `controller` and `fixture`.
    pub fn capture<E: Environment>(controller: &Controller<E>, fixture: &Fixture) -> Self {
        Self {
            lock_state: controller.lock_state(),
            secret_available: controller.secret_store().is_available(),
            secret_present: controller.secret_store().is_present(),
            subsystems: fixture.subsystems().iter().map(|s| (s.name(), s.is_running())).collect(),
            job_loop_running: fixture.job_queue.is_running(),
            calls: fixture.log.snapshot(),
        }
    }

    /// Names of running subsystems.
    pub fn running(&self) -> Vec<&'static str> {
        self.subsystems.iter().filter(|(_, running)| *running).map(|(name, _)| *name).collect()
    }
}
