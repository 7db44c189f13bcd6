//! Error types for the lifecycle core.
//!
//! Errors follow the lifecycle's propagation policy:
//!
//! - [`StartupError`]: fatal. A required security provider failed to install
//!   and the application must not start in a degraded mode.
//! - [`UnlockError`]: surfaced to the unlock caller. The application stays
//!   locked and nothing was started.
//! - [`SubsystemError`]: recoverable. Logged by the controller, never
//!   surfaced from a lock or unlock sequence.
//! - [`SecretStoreError`]: a lifecycle bug (unlock without intervening lock).

use thiserror::Error;

use crate::action::InitStep;

/// Errors returned to the caller of an unlock request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnlockError {
    /// Passphrase did not decrypt the master secret.
    #[error("invalid passphrase")]
    InvalidPassphrase,

    /// Key material decrypted but is unusable.
    #[error("unrecoverable key material: {0}")]
    UnrecoverableKey(String),

    /// The unlock sequence task terminated abnormally (panicked).
    ///
    /// The lifecycle state may still have reached `Unlocked`; query the
    /// controller before retrying.
    #[error("unlock sequence interrupted: {0}")]
    Interrupted(String),
}

impl UnlockError {
    /// Returns true if retrying with a different passphrase may succeed.
    ///
    /// Unrecoverable key material will fail for every passphrase.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InvalidPassphrase)
    }
}

/// Fatal errors during application startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartupError {
    /// A required security provider could not be installed.
    #[error("failed to install required security provider {provider}: {reason}")]
    ProviderInstallation {
        /// Provider name
        provider: &'static str,
        /// Installation failure reason
        reason: String,
    },
}

/// Failure reported by a security provider installation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct ProviderError {
    /// Why the provider could not be installed
    pub reason: String,
}

impl ProviderError {
    /// Create a provider error from any displayable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

/// Recoverable failure of a single lifecycle step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubsystemError {
    /// Subsystem failed to start.
    #[error("failed to start {name}: {reason}")]
    Start {
        /// Subsystem name
        name: &'static str,
        /// Failure reason
        reason: String,
    },

    /// Subsystem failed to stop cleanly.
    #[error("failed to stop {name}: {reason}")]
    Stop {
        /// Subsystem name
        name: &'static str,
        /// Failure reason
        reason: String,
    },

    /// One-time initialization step failed. It is retried on the next
    /// unlock.
    #[error("first-unlock step {step} failed: {reason}")]
    Init {
        /// Step that failed
        step: InitStep,
        /// Failure reason
        reason: String,
    },
}

/// Errors from [`crate::SecretStore`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretStoreError {
    /// A secret is already resident. It must be cleared first.
    #[error("master secret already set")]
    AlreadySet,
}
