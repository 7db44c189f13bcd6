//! Host callbacks for the standalone binary.
//!
//! The real effects of these hooks (remote config fetch, caches, call
//! teardown, database migrations) belong to the host application. Here they
//! log, and build expiry is tracked so `status` can report it.

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::SystemTime,
};

use latchkey_core::{AppHooks, Bootstrap, InitStep, SubsystemError};
use tracing::{debug, info, warn};

/// Hooks that log each callback.
#[derive(Debug)]
pub struct TracingHooks {
    expires_at: Option<SystemTime>,
    deprecated: AtomicBool,
}

impl TracingHooks {
    /// Create hooks for a build that expires at `expires_at`, if ever.
    pub fn new(expires_at: Option<SystemTime>) -> Self {
        Self { expires_at, deprecated: AtomicBool::new(false) }
    }

    /// Whether an expiry check found this build expired.
    pub fn is_deprecated(&self) -> bool {
        self.deprecated.load(Ordering::Relaxed)
    }
}

impl AppHooks for TracingHooks {
    fn refresh_remote_config(&self) {
        debug!("remote config refresh requested");
    }

    fn warm_caches(&self) {
        debug!("warming caches");
    }

    fn begin_visible_tracking(&self) {
        debug!("visible tracking started");
    }

    fn end_visible_tracking(&self) {
        debug!("visible tracking stopped");
    }

    #[allow(clippy::disallowed_methods)]
    fn check_build_expiry(&self) {
        let Some(expires_at) = self.expires_at else {
            return;
        };
        if SystemTime::now() >= expires_at && !self.deprecated.swap(true, Ordering::Relaxed) {
            warn!("build expired, client marked deprecated");
        }
    }

    fn stop_call_session(&self) {
        debug!("call session stop requested");
    }
}

/// First-unlock bootstrap that logs each step.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingBootstrap;

impl Bootstrap for TracingBootstrap {
    fn run(&self, step: InitStep) -> Result<(), SubsystemError> {
        info!(%step, "first-unlock step");
        Ok(())
    }
}
