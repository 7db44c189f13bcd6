//! Process-wide lifecycle state.
//!
//! [`LockState`] and [`Visibility`] are the only shared mutable fields of the
//! lifecycle. Lock transitions are serialized by the controller's transition
//! guard; readers that must never block (visibility handlers, status queries)
//! go through the lock-free [`StateCell`] instead.
//!
//! # State Machine
//!
//! ```text
//!            unlock (verified)            sequence complete
//! ┌────────┐ ───────────────> ┌───────────┐ ───────────────> ┌──────────┐
//! │ Locked │                  │ Unlocking │                  │ Unlocked │
//! └────────┘ <─────────────────────────────────────────────── └──────────┘
//!                                 lock
//! ```

use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

/// Lock state of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockState {
    /// No master secret is available. Subsystems are stopped.
    Locked,
    /// An unlock sequence is in flight.
    Unlocking,
    /// Master secret is resident and subsystems are running.
    Unlocked,
}

impl LockState {
    fn to_u8(self) -> u8 {
        match self {
            Self::Locked => 0,
            Self::Unlocking => 1,
            Self::Unlocked => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Unlocking,
            2 => Self::Unlocked,
            _ => Self::Locked,
        }
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locked => f.write_str("locked"),
            Self::Unlocking => f.write_str("unlocking"),
            Self::Unlocked => f.write_str("unlocked"),
        }
    }
}

/// Whether the application is visible to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Application is in the foreground.
    Foreground,
    /// Application is hidden.
    Background,
}

impl Visibility {
    fn to_u8(self) -> u8 {
        match self {
            Self::Background => 0,
            Self::Foreground => 1,
        }
    }

    fn from_u8(value: u8) -> Self {
        if value == 1 { Self::Foreground } else { Self::Background }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Foreground => f.write_str("foreground"),
            Self::Background => f.write_str("background"),
        }
    }
}

/// Lock-free published copy of [`LockState`] and [`Visibility`].
///
/// Both live in one atomic word, so a visibility edge and a lock state
/// publish are totally ordered: each edge is observed against exactly one
/// lock state. Only the controller publishes lock states, and only while
/// holding the transition guard. Visibility is written by the host's
/// lifecycle callbacks.
#[derive(Debug)]
pub struct StateCell {
    word: AtomicU8,
}

/// Lock state in the low two bits, visibility in bit 2.
const VISIBILITY_SHIFT: u8 = 2;
const LOCK_MASK: u8 = 0b11;

fn pack(lock: LockState, visibility: Visibility) -> u8 {
    lock.to_u8() | (visibility.to_u8() << VISIBILITY_SHIFT)
}

fn unpack(word: u8) -> (LockState, Visibility) {
    (LockState::from_u8(word & LOCK_MASK), Visibility::from_u8(word >> VISIBILITY_SHIFT))
}

impl StateCell {
    /// Process-start state: `Locked`, `Background`.
    pub fn new() -> Self {
        Self { word: AtomicU8::new(pack(LockState::Locked, Visibility::Background)) }
    }

    fn load(&self) -> (LockState, Visibility) {
        unpack(self.word.load(Ordering::Acquire))
    }

    fn update(&self, f: impl Fn(LockState, Visibility) -> u8) -> (LockState, Visibility) {
        let (Ok(previous) | Err(previous)) =
            self.word.fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let (lock, visibility) = unpack(word);
                Some(f(lock, visibility))
            });
        unpack(previous)
    }

    /// Most recently published lock state.
    pub fn lock_state(&self) -> LockState {
        self.load().0
    }

    /// Publish a new lock state and return the visibility at that instant.
    ///
    /// Visibility edges recorded before the publish saw the old lock state;
    /// edges recorded after it see `state`.
    pub fn publish(&self, state: LockState) -> Visibility {
        self.update(|_, visibility| pack(state, visibility)).1
    }

    /// Current visibility.
    pub fn visibility(&self) -> Visibility {
        self.load().1
    }

    /// Record a visibility change.
    ///
    /// Returns the previous visibility and the lock state the change was
    /// recorded against. Recording the value already held leaves the cell
    /// unchanged, which callers use to detect duplicate host notifications.
    pub fn record_visibility(&self, visibility: Visibility) -> (Visibility, LockState) {
        let (lock, previous) = self.update(|lock, _| pack(lock, visibility));
        (previous, lock)
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
