//! Runtime error types.

use latchkey_core::StartupError;
use thiserror::Error;

/// Errors that can occur while assembling or running the production runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration error (zero interval, unusable passphrase, etc.).
    ///
    /// Fatal. Fix the arguments and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Controller refused to launch.
    #[error("startup failed: {0}")]
    Startup(#[from] StartupError),

    /// Master secret could not be sealed at provisioning time.
    #[error("failed to seal master secret: {0}")]
    Seal(#[from] SealError),

    /// Terminal I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from sealing a master secret under a passphrase.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SealError {
    /// Refused to seal zero bytes of key material.
    #[error("master secret is empty")]
    EmptySecret,

    /// OS random source failed.
    #[error("os random source unavailable: {0}")]
    Random(String),

    /// AEAD rejected the input.
    #[error("encryption failed: {0}")]
    Encryption(String),
}

impl SealError {
    /// Returns true if the failure came from the environment rather than the
    /// input, so sealing again may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Random(_))
    }
}
