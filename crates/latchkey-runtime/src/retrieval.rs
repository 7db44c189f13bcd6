//! Message retrieval connection.
//!
//! Keeps fetching incoming messages while the application is unlocked. The
//! transport is supplied as a poll callback returning how many messages it
//! fetched. This subsystem owns only the cadence and the start/stop
//! contract.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use latchkey_core::{Subsystem, SubsystemError};
use tracing::debug;

use crate::worker::PeriodicWorker;

/// Subsystem name.
pub const RETRIEVAL: &str = "retrieval";

/// Default poll cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Polls for incoming messages on a fixed cadence.
#[derive(Debug)]
pub struct RetrievalConnection {
    worker: PeriodicWorker,
    fetched: Arc<AtomicU64>,
}

impl RetrievalConnection {
    /// Create a stopped connection that runs `poll` every `interval`.
    pub fn new(interval: Duration, poll: impl Fn() -> usize + Send + Sync + 'static) -> Self {
        let fetched = Arc::new(AtomicU64::new(0));
        let total = Arc::clone(&fetched);
        let tick = Arc::new(move || {
            let count = poll();
            if count > 0 {
                total.fetch_add(count as u64, Ordering::Relaxed);
                debug!(count, "fetched messages");
            }
        });

        Self { worker: PeriodicWorker::new(RETRIEVAL, interval, tick), fetched }
    }

    /// Messages fetched since creation.
    pub fn fetched(&self) -> u64 {
        self.fetched.load(Ordering::Relaxed)
    }

    /// Whether the poll task is alive.
    pub async fn is_connected(&self) -> bool {
        self.worker.is_running().await
    }
}

#[async_trait]
impl Subsystem for RetrievalConnection {
    fn name(&self) -> &'static str {
        RETRIEVAL
    }

    async fn start(&self) -> Result<(), SubsystemError> {
        self.worker.start().await
    }

    async fn stop(&self) -> Result<(), SubsystemError> {
        self.worker.stop().await
    }
}
