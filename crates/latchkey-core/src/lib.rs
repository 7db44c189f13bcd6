//! Lock/unlock lifecycle core for Latchkey
//!
//! Pure types and the lifecycle state machine that decides which side-effects
//! run on every lock transition, and in which order. Nothing here performs
//! I/O or sleeps, which makes the ordering guarantees testable without a
//! runtime.
//!
//! # Components
//!
//! - [`Lifecycle`]: lock/unlock state machine producing [`LifecycleAction`]s
//! - [`SecretStore`]: zeroizing holder of the resident [`MasterSecret`]
//! - [`SubsystemRegistry`]: ordered set of [`Subsystem`]s
//! - [`Collaborators`]: the interfaces the controller drives
//! - [`StateCell`]: lock-free published lock state and visibility

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod action;
mod collaborators;
mod config;
pub mod env;
mod error;
mod lifecycle;
mod secret;
mod state;
mod subsystem;

pub use action::{InitProgress, InitStep, LifecycleAction, SubsystemId};
pub use collaborators::{
    AppHooks, Bootstrap, Collaborators, DrainOutcome, Job, JobQueue, LockReason, MemoryWiper,
    PassphraseVerifier, PeriodicTask, Scheduler, SecurityProvider,
};
pub use config::{DEFAULT_DRAIN_TIMEOUT, DEFAULT_GRACE_DELAY, DEFAULT_PASSPHRASE, LifecycleConfig};
pub use env::Environment;
pub use error::{ProviderError, SecretStoreError, StartupError, SubsystemError, UnlockError};
pub use lifecycle::{Lifecycle, visibility_actions};
pub use secret::{MasterSecret, Passphrase, SecretStore};
pub use state::{LockState, StateCell, Visibility};
pub use subsystem::{Subsystem, SubsystemRegistry};
