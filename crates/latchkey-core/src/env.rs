//! Environment abstraction for deterministic testing.
//!
//! Decouples the controller's timeline from wall time. Production uses the
//! system clock and tokio timers; simulation uses tokio's paused virtual clock
//! so grace delays and drain timeouts complete instantly and reproducibly.

use std::time::Duration;

/// Abstract environment providing time and sleeping.
///
/// # Invariants
///
/// - `now()` never goes backwards
/// - `sleep()` completes no earlier than `now() + duration`
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`, while simulation
    /// environments use virtual time.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only the controller's scheduled work sleeps; the lifecycle state
    /// machine itself never does.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;
}
