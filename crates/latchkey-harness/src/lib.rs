//! Deterministic test harness for the Latchkey lifecycle.
//!
//! Recording fakes for every collaborator, a [`SimEnv`] on tokio's virtual
//! clock, and a [`Fixture`] wiring them into a controller. All fakes share
//! one [`CallLog`], so tests can assert ordering across collaborators.
//!
//! # Model-Based Testing
//!
//! The `model` module provides a sequential reference lifecycle. Operations
//! are applied to both the model and a real controller, and their
//! observable states are compared.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks properties that must hold after every
//! settled transition. Use [`InvariantRegistry::standard()`] for the full
//! set.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod call_log;
pub mod fakes;
pub mod fixture;
pub mod invariants;
pub mod model;
pub mod sim_env;

pub use call_log::{Call, CallLog};
pub use fakes::{
    FakeBootstrap, FakeHooks, FakeJobQueue, FakeProvider, FakeScheduler, FakeSubsystem,
    FakeVerifier, FakeWiper, SECRET_BYTES, VALID_PASSPHRASE,
};
pub use fixture::{EXPIRING_SWEEPER, Fixture, RETRIEVAL, VIEW_ONCE_SWEEPER};
pub use invariants::{
    InitStepsRunOnce, Invariant, InvariantRegistry, InvariantResult, JobLoopAfterSubsystems,
    LifecycleSnapshot, SecretGatedByLock, StopOrderReversesStart, SubsystemsStoppedWhenLocked,
    Violation,
};
pub use model::{ExpectedUnlock, ModelLifecycle, ObservableState, Operation};
pub use sim_env::SimEnv;
