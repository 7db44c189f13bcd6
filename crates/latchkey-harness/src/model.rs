//! Reference model for model-based controller testing.
//!
//! [`ModelLifecycle`] is the oracle: the observable state a correct
//! controller must reach after each [`Operation`], computed without any
//! concurrency. Tests apply the same operations to the model and to a real
//! controller over a [`crate::Fixture`] and compare [`ObservableState`]s.

use std::time::Duration;

use arbitrary::Arbitrary;
use latchkey_core::{LifecycleConfig, LockState, Visibility};

/// Operations applied to both the model and the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub enum Operation {
    /// Unlock request.
    Unlock {
        /// Whether the correct passphrase is supplied.
        valid: bool,
    },
    /// Direct lock request.
    Lock,
    /// Lock request through the lock event source.
    LockEvent,
    /// Host reports the application visible.
    Foreground,
    /// Host reports the application hidden.
    Background,
    /// Let virtual time pass.
    Advance {
        /// Milliseconds to advance.
        millis: u16,
    },
    /// Process teardown.
    Terminate,
}

/// Expected outcome of an unlock operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedUnlock {
    /// The sequence ran.
    Unlocked,
    /// The controller was not locked.
    AlreadyUnlocked,
    /// Verification failed.
    Rejected,
}

/// Observable state compared between model and controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableState {
    /// Lock state
    pub lock_state: LockState,
    /// Visibility
    pub visibility: Visibility,
    /// Whether the secret store issues the secret
    pub secret_available: bool,
    /// Whether key bytes are resident
    pub secret_present: bool,
    /// Whether every first-unlock step completed
    pub initialized: bool,
    /// Foreground-resume steps run so far
    pub resumes: usize,
    /// Background-pause steps run so far
    pub pauses: usize,
}

/// Sequential reference implementation of the lifecycle.
///
/// Assumes every collaborator succeeds and that the job queue drains
/// instantly.
#[derive(Debug, Clone)]
pub struct ModelLifecycle {
    lock_state: LockState,
    visibility: Visibility,
    secret_present: bool,
    initialized: bool,
    resumes: usize,
    pauses: usize,
    clock: Duration,
    drain_due: Option<Duration>,
    grace_delay: Duration,
}

impl ModelLifecycle {
    /// Fresh process state.
    pub fn new(config: &LifecycleConfig) -> Self {
        Self {
            lock_state: LockState::Locked,
            visibility: Visibility::Background,
            secret_present: false,
            initialized: false,
            resumes: 0,
            pauses: 0,
            clock: Duration::ZERO,
            drain_due: None,
            grace_delay: config.grace_delay,
        }
    }

    /// Apply an operation. Returns the expected unlock outcome for
    /// [`Operation::Unlock`], `None` otherwise.
    pub fn apply(&mut self, op: Operation) -> Option<ExpectedUnlock> {
        match op {
            Operation::Unlock { valid } => return Some(self.unlock(valid)),
            Operation::Lock | Operation::LockEvent => self.lock(),
            Operation::Foreground => self.visibility_changed(Visibility::Foreground),
            Operation::Background => self.visibility_changed(Visibility::Background),
            Operation::Advance { millis } => self.advance(Duration::from_millis(u64::from(millis))),
            Operation::Terminate => {
                self.lock_state = LockState::Locked;
                self.secret_present = false;
                self.drain_due = None;
            },
        }
        None
    }

    fn unlock(&mut self, valid: bool) -> ExpectedUnlock {
        if self.lock_state != LockState::Locked {
            return ExpectedUnlock::AlreadyUnlocked;
        }
        if !valid {
            return ExpectedUnlock::Rejected;
        }
        self.lock_state = LockState::Unlocked;
        self.secret_present = true;
        self.initialized = true;
        self.drain_due = None;
        if self.visibility == Visibility::Foreground {
            self.resumes += 1;
        }
        ExpectedUnlock::Unlocked
    }

    fn lock(&mut self) {
        if self.lock_state == LockState::Unlocked {
            self.lock_state = LockState::Locked;
            self.drain_due = Some(self.clock + self.grace_delay);
        }
    }

    fn visibility_changed(&mut self, next: Visibility) {
        let previous = std::mem::replace(&mut self.visibility, next);
        if previous == next || self.lock_state != LockState::Unlocked {
            return;
        }
        match next {
            Visibility::Foreground => self.resumes += 1,
            Visibility::Background => self.pauses += 1,
        }
    }

    fn advance(&mut self, by: Duration) {
        self.clock += by;
        if self.drain_due.is_some_and(|due| due <= self.clock) {
            self.drain_due = None;
            self.secret_present = false;
        }
    }

    /// Expected observable state.
    pub fn observable(&self) -> ObservableState {
        ObservableState {
            lock_state: self.lock_state,
            visibility: self.visibility,
            secret_available: self.lock_state == LockState::Unlocked,
            secret_present: self.secret_present,
            initialized: self.initialized,
            resumes: self.resumes,
            pauses: self.pauses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_keeps_secret_resident_until_grace_elapses() {
        let mut model = ModelLifecycle::new(&LifecycleConfig::default());
        assert_eq!(model.apply(Operation::Unlock { valid: true }), Some(ExpectedUnlock::Unlocked));

        model.apply(Operation::Lock);
        assert!(model.observable().secret_present);
        assert!(!model.observable().secret_available);

        model.apply(Operation::Advance { millis: 999 });
        assert!(model.observable().secret_present);
        model.apply(Operation::Advance { millis: 1 });
        assert!(!model.observable().secret_present);
    }

    #[test]
    fn visibility_while_locked_is_replayed_by_unlock() {
        let mut model = ModelLifecycle::new(&LifecycleConfig::default());
        model.apply(Operation::Foreground);
        assert_eq!(model.observable().resumes, 0);

        model.apply(Operation::Unlock { valid: true });
        assert_eq!(model.observable().resumes, 1);

        model.apply(Operation::Foreground);
        assert_eq!(model.observable().resumes, 1);
    }
}
