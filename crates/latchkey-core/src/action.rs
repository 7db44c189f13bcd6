//! Lifecycle side-effects.
//!
//! [`LifecycleAction`] values are instructions produced by
//! [`crate::Lifecycle`] for the controller to execute, in order, against the
//! collaborators.

use std::{fmt, time::Duration};

/// Index of a subsystem in a [`crate::SubsystemRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubsystemId(pub usize);

/// One-time initialization steps run on the first successful unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitStep {
    /// Wire application dependencies.
    Dependencies,
    /// First-ever launch bootstrap (identity keys, install version).
    FirstLaunch,
    /// One-time application migrations.
    Migrations,
}

impl InitStep {
    /// All steps in execution order.
    pub const ALL: [Self; 3] = [Self::Dependencies, Self::FirstLaunch, Self::Migrations];

    fn bit(self) -> u8 {
        match self {
            Self::Dependencies => 0b001,
            Self::FirstLaunch => 0b010,
            Self::Migrations => 0b100,
        }
    }
}

impl fmt::Display for InitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dependencies => f.write_str("dependencies"),
            Self::FirstLaunch => f.write_str("first-launch"),
            Self::Migrations => f.write_str("migrations"),
        }
    }
}

/// Completed subset of [`InitStep`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitProgress(u8);

impl InitProgress {
    /// Whether `step` has completed.
    pub fn is_done(self, step: InitStep) -> bool {
        self.0 & step.bit() != 0
    }

    /// Mark `step` as completed.
    pub fn mark(&mut self, step: InitStep) {
        self.0 |= step.bit();
    }

    /// Whether every step has completed.
    pub fn is_complete(self) -> bool {
        InitStep::ALL.iter().all(|step| self.is_done(*step))
    }
}

/// Actions produced by the lifecycle state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Disarm the pending drain of an earlier lock.
    CancelDrain {
        /// Lock generation whose drain is cancelled
        generation: u64,
    },

    /// Hand the freshly verified secret to the secret store (sealed).
    InstallSecret,

    /// Run a first-unlock initialization step.
    Initialize(InitStep),

    /// Start a registered subsystem.
    StartSubsystem(SubsystemId),

    /// Register periodic maintenance with the host scheduler.
    SchedulePeriodicTasks,

    /// Begin the job queue's processing loop.
    BeginJobLoop,

    /// Subscribe to the lock event source.
    RegisterLockEvents,

    /// Run the foreground-resume step if the application is visible now.
    ResumeIfVisible,

    /// Start issuing the master secret to readers.
    UnsealSecret,

    /// Stop issuing the master secret to new readers.
    SealSecret,

    /// Stop any active call or streaming session.
    StopCallSession,

    /// Stop a registered subsystem.
    StopSubsystem(SubsystemId),

    /// Unsubscribe from the lock event source.
    UnregisterLockEvents,

    /// Arm the delayed drain for the lock with this generation.
    ScheduleDrain {
        /// Lock generation that issued the drain
        generation: u64,
        /// Grace delay before the drain runs
        delay: Duration,
    },

    /// Shut the job queue down, forcing it after `timeout`.
    ShutdownJobQueue {
        /// Bounded drain window
        timeout: Duration,
    },

    /// Overwrite and release the master secret.
    ClearSecret,

    /// Ask for a process-wide secure memory wipe.
    RequestMemoryWipe {
        /// Whether the wipe should complete before returning
        blocking: bool,
    },

    /// Foreground-resume step.
    ForegroundResume,

    /// Background-pause step.
    BackgroundPause,
}
