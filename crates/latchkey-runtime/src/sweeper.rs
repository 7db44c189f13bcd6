//! Expiring-message and view-once sweepers.
//!
//! Both sweepers delete content whose lifetime ended. They only run while
//! unlocked because deleting requires the storage key.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use latchkey_core::{Subsystem, SubsystemError};
use tracing::info;

use crate::worker::PeriodicWorker;

/// Default sweep cadence.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// What a sweeper deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SweeperKind {
    /// Disappearing messages past their timer.
    ExpiringMessages,
    /// View-once media that has been viewed.
    ViewOnce,
}

impl SweeperKind {
    /// Subsystem name.
    pub fn name(self) -> &'static str {
        match self {
            Self::ExpiringMessages => "expiring-sweeper",
            Self::ViewOnce => "view-once-sweeper",
        }
    }
}

impl fmt::Display for SweeperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Periodically runs a sweep callback that returns how many items it
/// deleted.
#[derive(Debug)]
pub struct Sweeper {
    kind: SweeperKind,
    worker: PeriodicWorker,
}

impl Sweeper {
    /// Create a stopped sweeper.
    pub fn new(
        kind: SweeperKind,
        interval: Duration,
        sweep: impl Fn() -> usize + Send + Sync + 'static,
    ) -> Self {
        let tick = Arc::new(move || {
            let expired = sweep();
            if expired > 0 {
                info!(sweeper = %kind, expired, "swept");
            }
        });
        Self { kind, worker: PeriodicWorker::new(kind.name(), interval, tick) }
    }

    /// What this sweeper deletes.
    pub fn kind(&self) -> SweeperKind {
        self.kind
    }

    /// Whether the sweep task is alive.
    pub async fn is_running(&self) -> bool {
        self.worker.is_running().await
    }
}

#[async_trait]
impl Subsystem for Sweeper {
    fn name(&self) -> &'static str {
        self.kind.name()
    }

    async fn start(&self) -> Result<(), SubsystemError> {
        self.worker.start().await
    }

    async fn stop(&self) -> Result<(), SubsystemError> {
        self.worker.stop().await
    }
}
