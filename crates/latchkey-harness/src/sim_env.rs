//! Simulated environment on tokio's clock.
//!
//! Under `#[tokio::test(start_paused = true)]` the clock only moves when
//! every task is idle, jumping straight to the next timer. Grace delays and
//! drain windows then elapse instantly and in a reproducible order.

use std::time::Duration;

use latchkey_core::Environment;

/// Environment backed by `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimEnv;

impl SimEnv {
    /// Create a simulated environment.
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SimEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}
