//! Shared record of every collaborator call.
//!
//! All fakes in a [`crate::Fixture`] append to one [`CallLog`], so tests and
//! invariants can check cross-collaborator ordering (job loop begins after
//! the last subsystem start, secret cleared after the queue drained).

#![allow(clippy::disallowed_types, reason = "Synchronous append-only log")]

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use latchkey_core::{DrainOutcome, InitStep, Job, PeriodicTask};

/// A collaborator call observed by the harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// Security provider installation.
    InstallProvider(&'static str),
    /// Passphrase verification attempt.
    Verify,
    /// First-unlock step.
    Init {
        /// Step run
        step: InitStep,
        /// Whether it succeeded
        succeeded: bool,
    },
    /// Subsystem start.
    Start(&'static str),
    /// Subsystem stop.
    Stop(&'static str),
    /// Periodic task registration.
    Schedule(PeriodicTask),
    /// Job enqueued.
    Enqueue(Job),
    /// Job loop started.
    BeginLoop,
    /// Job queue shutdown requested.
    Shutdown {
        /// Drain window requested
        timeout: Duration,
    },
    /// Job queue shutdown finished.
    ShutdownComplete(DrainOutcome),
    /// Remote config refresh hook.
    RefreshRemoteConfig,
    /// Cache warm-up hook.
    WarmCaches,
    /// Visible-state tracking started.
    BeginVisibleTracking,
    /// Visible-state tracking stopped.
    EndVisibleTracking,
    /// Build expiry check.
    CheckBuildExpiry,
    /// Call session stop.
    StopCallSession,
    /// Process memory wipe.
    Wipe {
        /// Whether a blocking wipe was requested
        blocking: bool,
    },
}

/// Thread-safe, cloneable call recorder.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    fn calls(&self) -> MutexGuard<'_, Vec<Call>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a call.
    pub fn record(&self, call: Call) {
        self.calls().push(call);
    }

    /// Copy of every call so far, in order.
    pub fn snapshot(&self) -> Vec<Call> {
        self.calls().clone()
    }

    /// Forget every recorded call.
    pub fn clear(&self) {
        self.calls().clear();
    }

    /// Number of calls equal to `call`.
    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    /// Number of calls matching `predicate`.
    pub fn count_where(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| predicate(c)).count()
    }

    /// Index of the first call equal to `call`.
    pub fn position(&self, call: &Call) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    /// Index of the last call equal to `call`.
    pub fn last_position(&self, call: &Call) -> Option<usize> {
        self.calls().iter().rposition(|c| c == call)
    }

    /// Subsystem names passed to `start`, in call order.
    pub fn starts(&self) -> Vec<&'static str> {
        self.calls()
            .iter()
            .filter_map(|c| match c {
                Call::Start(name) => Some(*name),
                _ => None,
            })
            .collect()
    }

    /// Subsystem names passed to `stop`, in call order.
    pub fn stops(&self) -> Vec<&'static str> {
        self.calls()
            .iter()
            .filter_map(|c| match c {
                Call::Stop(name) => Some(*name),
                _ => None,
            })
            .collect()
    }
}
