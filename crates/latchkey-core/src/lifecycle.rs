//! Lock/unlock lifecycle state machine.
//!
//! [`Lifecycle`] decides *what* happens on every transition and in which
//! order. It is a pure state machine: methods consume transition requests and
//! return [`LifecycleAction`]s for the controller to execute. It performs no
//! I/O and never sleeps, so every ordering guarantee can be tested without a
//! runtime.
//!
//! # Transitions
//!
//! | From      | Request | To        | Actions                                    |
//! |-----------|---------|-----------|--------------------------------------------|
//! | Locked    | unlock  | Unlocking | install secret, init (once), start, resume |
//! | Unlocking | finish  | Unlocked  | unseal secret                              |
//! | Unlocked  | lock    | Locked    | seal, stop (reverse), schedule drain       |
//! | Unlocking | unlock  | Unlocking | none (ignored)                             |
//! | Unlocked  | unlock  | Unlocked  | none (ignored)                             |
//! | Locked    | lock    | Locked    | none (ignored)                             |
//!
//! # Drain generations
//!
//! Every lock increments a generation and schedules a drain tagged with it.
//! The drain only yields work if it is still the pending drain of the current
//! lock. An unlock cancels the pending drain, so a timer from an earlier lock
//! can never wipe a secret installed by a later unlock.

use std::time::Duration;

use tracing::{debug, trace};

use crate::{
    action::{InitProgress, InitStep, LifecycleAction, SubsystemId},
    config::LifecycleConfig,
    state::{LockState, Visibility},
};

/// Lifecycle state machine.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    /// Current lock state.
    state: LockState,
    /// Generation of the most recent lock.
    generation: u64,
    /// Generation whose drain is armed but has not run. `None` if no drain is
    /// pending.
    pending_drain: Option<u64>,
    /// Completed first-unlock steps.
    init: InitProgress,
    /// Subsystems in start order.
    subsystems: Vec<SubsystemId>,
    grace_delay: Duration,
    drain_timeout: Duration,
    blocking_wipe: bool,
}

impl Lifecycle {
    /// Create a machine in [`LockState::Locked`].
    pub fn new(subsystems: Vec<SubsystemId>, config: &LifecycleConfig) -> Self {
        Self {
            state: LockState::Locked,
            generation: 0,
            pending_drain: None,
            init: InitProgress::default(),
            subsystems,
            grace_delay: config.grace_delay,
            drain_timeout: config.drain_timeout,
            blocking_wipe: config.blocking_wipe,
        }
    }

    /// Current lock state.
    pub fn state(&self) -> LockState {
        self.state
    }

    /// Generation of the most recent lock (0 before the first lock).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Generation of the armed drain. `None` if no drain is pending.
    pub fn pending_drain(&self) -> Option<u64> {
        self.pending_drain
    }

    /// Whether every first-unlock step has completed.
    pub fn is_initialized(&self) -> bool {
        self.init.is_complete()
    }

    /// Completed first-unlock steps.
    pub fn init_progress(&self) -> InitProgress {
        self.init
    }

    /// Begin an unlock whose passphrase has already been verified.
    ///
    /// Returns `None` (ignored) unless the machine is `Locked`. Otherwise
    /// transitions to `Unlocking` and returns the unlock sequence:
    ///
    /// 1. Cancel the pending drain and clear the stale secret, if any
    /// 2. Install the verified secret
    /// 3. First-unlock steps not yet completed
    /// 4. Start subsystems in registration order
    /// 5. Schedule periodic tasks
    /// 6. Begin the job loop (after every subsystem that may enqueue on
    ///    startup, before anything that enqueues routinely)
    /// 7. Register for lock events
    /// 8. Resume if visible
    pub fn begin_unlock(&mut self) -> Option<Vec<LifecycleAction>> {
        if self.state != LockState::Locked {
            debug!(state = %self.state, "unlock ignored");
            return None;
        }

        self.state = LockState::Unlocking;

        let mut actions = Vec::with_capacity(self.subsystems.len() + 10);
        if let Some(generation) = self.pending_drain.take() {
            actions.push(LifecycleAction::CancelDrain { generation });
            actions.push(LifecycleAction::ClearSecret);
        }
        actions.push(LifecycleAction::InstallSecret);
        actions.extend(
            InitStep::ALL
                .into_iter()
                .filter(|step| !self.init.is_done(*step))
                .map(LifecycleAction::Initialize),
        );
        actions.extend(self.subsystems.iter().copied().map(LifecycleAction::StartSubsystem));
        actions.push(LifecycleAction::SchedulePeriodicTasks);
        actions.push(LifecycleAction::BeginJobLoop);
        actions.push(LifecycleAction::RegisterLockEvents);
        actions.push(LifecycleAction::ResumeIfVisible);

        Some(actions)
    }

    /// Record the outcome of a first-unlock step.
    ///
    /// Failed steps stay pending and are emitted again by the next unlock.
    pub fn record_init(&mut self, step: InitStep, succeeded: bool) {
        if succeeded {
            self.init.mark(step);
        }
    }

    /// Complete an unlock: `Unlocking -> Unlocked`.
    ///
    /// Returns the actions to run once the state is published, or `None` if
    /// no unlock was in flight.
    pub fn finish_unlock(&mut self) -> Option<Vec<LifecycleAction>> {
        if self.state != LockState::Unlocking {
            return None;
        }
        self.state = LockState::Unlocked;
        Some(vec![LifecycleAction::UnsealSecret])
    }

    /// Begin a lock.
    ///
    /// Returns `None` (ignored) unless the machine is `Unlocked`. Otherwise
    /// transitions to `Locked`, starts a new generation and returns:
    ///
    /// 1. Seal the secret (readers see it absent from here on)
    /// 2. Stop any call session
    /// 3. Stop subsystems in reverse registration order
    /// 4. Unregister from lock events
    /// 5. Schedule the drain for this generation after the grace delay
    pub fn begin_lock(&mut self) -> Option<Vec<LifecycleAction>> {
        if self.state != LockState::Unlocked {
            debug!(state = %self.state, "lock ignored");
            return None;
        }

        self.state = LockState::Locked;
        self.generation = self.generation.wrapping_add(1);
        self.pending_drain = Some(self.generation);

        let mut actions = Vec::with_capacity(self.subsystems.len() + 4);
        actions.push(LifecycleAction::SealSecret);
        actions.push(LifecycleAction::StopCallSession);
        actions.extend(self.subsystems.iter().rev().copied().map(LifecycleAction::StopSubsystem));
        actions.push(LifecycleAction::UnregisterLockEvents);
        actions.push(LifecycleAction::ScheduleDrain {
            generation: self.generation,
            delay: self.grace_delay,
        });

        Some(actions)
    }

    /// The drain timer for `generation` fired.
    ///
    /// Returns no actions if the drain is stale (cancelled by an unlock,
    /// superseded, or already run). Otherwise disarms it and returns the
    /// bounded job queue shutdown, the secret wipe, and the memory wipe.
    pub fn drain_due(&mut self, generation: u64) -> Vec<LifecycleAction> {
        if self.state != LockState::Locked || self.pending_drain != Some(generation) {
            trace!(generation, pending = ?self.pending_drain, "stale drain discarded");
            return Vec::new();
        }
        self.pending_drain = None;
        self.drain_actions(self.blocking_wipe)
    }

    /// Process teardown: reach `Locked` and wipe immediately.
    ///
    /// Locks if unlocked (without scheduling a drain), runs any pending drain
    /// now, and always ends with a blocking memory wipe.
    pub fn teardown(&mut self) -> Vec<LifecycleAction> {
        let mut actions = Vec::new();

        if let Some(lock_actions) = self.begin_lock() {
            actions.extend(
                lock_actions
                    .into_iter()
                    .filter(|a| !matches!(a, LifecycleAction::ScheduleDrain { .. })),
            );
        } else if let Some(generation) = self.pending_drain {
            actions.push(LifecycleAction::CancelDrain { generation });
        }

        if self.pending_drain.take().is_some() {
            actions.extend(self.drain_actions(true));
        } else {
            actions.push(LifecycleAction::ClearSecret);
            actions.push(LifecycleAction::RequestMemoryWipe { blocking: true });
        }

        actions
    }

    fn drain_actions(&self, blocking: bool) -> Vec<LifecycleAction> {
        vec![
            LifecycleAction::ShutdownJobQueue { timeout: self.drain_timeout },
            LifecycleAction::ClearSecret,
            LifecycleAction::RequestMemoryWipe { blocking },
        ]
    }
}

/// Actions for a visibility change observed while in `lock`.
///
/// Duplicate notifications and any change while not `Unlocked` produce
/// nothing; the unlock sequence replays the current visibility itself.
pub fn visibility_actions(
    previous: Visibility,
    next: Visibility,
    lock: LockState,
) -> Vec<LifecycleAction> {
    if previous == next || lock != LockState::Unlocked {
        return Vec::new();
    }
    match next {
        Visibility::Foreground => vec![LifecycleAction::ForegroundResume],
        Visibility::Background => vec![LifecycleAction::BackgroundPause],
    }
}
