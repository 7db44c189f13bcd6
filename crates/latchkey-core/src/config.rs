//! Lifecycle configuration.

use std::time::Duration;

/// Delay between the synchronous part of a lock and the job queue drain.
pub const DEFAULT_GRACE_DELAY: Duration = Duration::from_secs(1);

/// Maximum time the job queue is given to drain before it is forced down.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Passphrase used to seal the master secret when the passphrase lock is
/// disabled.
pub const DEFAULT_PASSPHRASE: &str = "unencrypted";

/// Lifecycle configuration
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Grace delay before the post-lock drain runs
    pub grace_delay: Duration,
    /// Bounded drain window for the job queue
    pub drain_timeout: Duration,
    /// Whether the post-lock memory wipe blocks until complete
    pub blocking_wipe: bool,
    /// Whether the user must enter a passphrase to unlock. When disabled,
    /// launch unlocks with [`Self::default_passphrase`].
    pub passphrase_lock: bool,
    /// Passphrase used when the passphrase lock is disabled
    pub default_passphrase: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            grace_delay: DEFAULT_GRACE_DELAY,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            blocking_wipe: true,
            passphrase_lock: true,
            default_passphrase: DEFAULT_PASSPHRASE.to_string(),
        }
    }
}
