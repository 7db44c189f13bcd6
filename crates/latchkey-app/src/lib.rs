//! Lifecycle controller for Latchkey
//!
//! Drives the pure [`latchkey_core::Lifecycle`] machine against real
//! collaborators: subsystems, the job queue, the secret store, and the host's
//! scheduler and hooks. The same controller runs in production and under the
//! deterministic harness; only the [`latchkey_core::Environment`] and the
//! collaborator implementations differ.
//!
//! # Components
//!
//! - [`Controller`]: transition guard, action execution, scheduled drain
//! - [`LockEvents`]: out-of-band lock requests (timeouts, screen off)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod controller;
mod events;

pub use controller::{Controller, UnlockOutcome};
pub use events::LockEvents;
