//! Interval-driven background worker.
//!
//! [`PeriodicWorker`] is the engine under the retrieval connection and the
//! sweepers. It runs a callback on a tokio task at a fixed interval. Stopping
//! signals the task through a `watch` channel and joins it, so once `stop`
//! returns the callback never fires again.

use std::{fmt, sync::Arc, time::Duration};

use latchkey_core::SubsystemError;
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, trace};

/// Shortest accepted tick interval. `tokio::time::interval` rejects zero.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Callback run on every tick.
pub type Tick = Arc<dyn Fn() + Send + Sync>;

struct Running {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// A named task ticking at a fixed interval.
pub struct PeriodicWorker {
    name: &'static str,
    interval: Duration,
    tick: Tick,
    running: Mutex<Option<Running>>,
}

impl PeriodicWorker {
    /// Create a stopped worker. Intervals below [`MIN_INTERVAL`] are raised
    /// to it.
    pub fn new(name: &'static str, interval: Duration, tick: Tick) -> Self {
        Self { name, interval: interval.max(MIN_INTERVAL), tick, running: Mutex::new(None) }
    }

    /// Worker name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Tick interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawn the ticking task. A no-op while already running.
    ///
    /// # Errors
    ///
    /// `SubsystemError::Start` when called outside a tokio runtime.
    pub async fn start(&self) -> Result<(), SubsystemError> {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            trace!(worker = self.name, "already running");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SubsystemError::Start { name: self.name, reason: e.to_string() })?;

        let (stop, stop_rx) = watch::channel(false);
        let handle = runtime.spawn(run(self.name, self.interval, Arc::clone(&self.tick), stop_rx));
        *running = Some(Running { stop, handle });

        debug!(worker = self.name, interval = ?self.interval, "worker started");
        Ok(())
    }

    /// Signal the task to stop and wait for it to exit. A no-op while
    /// stopped.
    ///
    /// # Errors
    ///
    /// `SubsystemError::Stop` if the task panicked. The worker is stopped
    /// either way.
    pub async fn stop(&self) -> Result<(), SubsystemError> {
        let Some(Running { stop, handle }) = self.running.lock().await.take() else {
            trace!(worker = self.name, "already stopped");
            return Ok(());
        };

        // A send error means the task already exited.
        let _ = stop.send(true);
        let joined = handle.await;
        debug!(worker = self.name, "worker stopped");

        joined.map_err(|e| SubsystemError::Stop { name: self.name, reason: e.to_string() })
    }

    /// Whether the ticking task is alive.
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.as_ref().is_some_and(|r| !r.handle.is_finished())
    }
}

impl fmt::Debug for PeriodicWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicWorker")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

async fn run(name: &'static str, interval: Duration, tick: Tick, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            },
            _ = ticker.tick() => {
                trace!(worker = name, "tick");
                tick();
            },
        }
    }
}
