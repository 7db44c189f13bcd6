//! Worker-backed job queue.
//!
//! Jobs are buffered in a FIFO until [`JobQueue::begin_loop`] spawns the
//! worker task. Shutdown lets the worker drain the buffer for a bounded
//! window, then aborts it. A job interrupted by the abort goes back to the
//! front of the buffer so the next loop runs it again.
//!
//! A job already waiting in the buffer is not queued a second time, so the
//! buffer holds at most one entry per [`Job`] kind while the loop is down.

#![allow(clippy::disallowed_types, reason = "Short synchronous critical sections only")]

use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use latchkey_core::{DrainOutcome, Job, JobQueue, SubsystemError};
use tokio::{sync::Notify, task::JoinHandle};
use tracing::{debug, info, trace, warn};

const NAME: &str = "job-queue";

/// Executes one job.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run `job` to completion.
    async fn run(&self, job: Job);
}

/// Runner that only logs. Used by the binary, where the jobs' real
/// effects live outside this workspace.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingJobRunner;

#[async_trait]
impl JobRunner for LoggingJobRunner {
    async fn run(&self, job: Job) {
        info!(?job, "job ran");
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Job>,
    in_flight: Option<Job>,
    closing: bool,
    worker: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<QueueState>,
    wake: Notify,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// FIFO job queue processed by one tokio task.
pub struct WorkerJobQueue {
    runner: Arc<dyn JobRunner>,
    shared: Arc<Shared>,
}

impl WorkerJobQueue {
    /// Create a queue whose loop has not begun.
    pub fn new(runner: Arc<dyn JobRunner>) -> Self {
        Self { runner, shared: Arc::new(Shared::default()) }
    }

    /// Jobs not yet completed, including one in flight.
    pub fn pending(&self) -> usize {
        let state = self.shared.state();
        state.pending.len() + usize::from(state.in_flight.is_some())
    }

    /// Whether the worker task is alive.
    pub fn is_running(&self) -> bool {
        self.shared.state().worker.as_ref().is_some_and(|w| !w.is_finished())
    }
}

impl fmt::Debug for WorkerJobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerJobQueue")
            .field("pending", &self.pending())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl JobQueue for WorkerJobQueue {
    fn enqueue(&self, job: Job) {
        {
            let mut state = self.shared.state();
            if state.pending.contains(&job) {
                trace!(?job, "already pending, coalesced");
                return;
            }
            state.pending.push_back(job);
        }
        self.shared.wake.notify_one();
        trace!(?job, "enqueued");
    }

    fn begin_loop(&self) -> Result<(), SubsystemError> {
        let mut state = self.shared.state();
        state.closing = false;
        if state.worker.as_ref().is_some_and(|w| !w.is_finished()) {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SubsystemError::Start { name: NAME, reason: e.to_string() })?;
        state.worker =
            Some(runtime.spawn(work(Arc::clone(&self.shared), Arc::clone(&self.runner))));

        debug!(buffered = state.pending.len(), "job loop started");
        Ok(())
    }

    async fn shutdown(&self, timeout: Duration) -> DrainOutcome {
        let worker = {
            let mut state = self.shared.state();
            state.closing = true;
            state.worker.take()
        };
        let Some(mut worker) = worker else {
            return DrainOutcome::Drained;
        };
        self.shared.wake.notify_one();

        if tokio::time::timeout(timeout, &mut worker).await.is_ok() {
            debug!("job queue drained");
            return DrainOutcome::Drained;
        }

        worker.abort();
        // Cancellation is the expected outcome here.
        let _ = worker.await;

        let mut state = self.shared.state();
        if let Some(job) = state.in_flight.take()
            && !state.pending.contains(&job)
        {
            state.pending.push_front(job);
        }
        let pending = state.pending.len();
        warn!(pending, "job queue shutdown forced");
        DrainOutcome::Forced { pending }
    }
}

async fn work(shared: Arc<Shared>, runner: Arc<dyn JobRunner>) {
    loop {
        let next = {
            let mut state = shared.state();
            match state.pending.pop_front() {
                Some(job) => {
                    state.in_flight = Some(job);
                    Some(job)
                },
                None if state.closing => return,
                None => None,
            }
        };

        match next {
            Some(job) => {
                runner.run(job).await;
                shared.state().in_flight = None;
            },
            None => shared.wake.notified().await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// Records completed jobs, taking `cost` per job.
    #[derive(Default)]
    struct SlowRunner {
        cost: Duration,
        done: Mutex<Vec<Job>>,
    }

    impl SlowRunner {
        fn done(&self) -> Vec<Job> {
            self.done.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobRunner for SlowRunner {
        async fn run(&self, job: Job) {
            tokio::time::sleep(self.cost).await;
            self.done.lock().unwrap().push(job);
        }
    }

    const DISTINCT: [Job; 5] = [
        Job::RoutineProfileRefresh,
        Job::RoutineGroupMaintenance,
        Job::ContactSync,
        Job::SignedPreKeyRotation,
        Job::DirectoryRefresh,
    ];

    fn queue(cost: Duration) -> (WorkerJobQueue, Arc<SlowRunner>) {
        let runner = Arc::new(SlowRunner { cost, done: Mutex::default() });
        (WorkerJobQueue::new(runner.clone()), runner)
    }

    #[tokio::test(start_paused = true)]
    async fn buffers_until_loop_begins() {
        let (queue, runner) = queue(Duration::from_millis(10));

        queue.enqueue(Job::ContactSync);
        queue.enqueue(Job::DirectoryRefresh);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(runner.done().is_empty());
        assert_eq!(queue.pending(), 2);

        queue.begin_loop().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runner.done(), [Job::ContactSync, Job::DirectoryRefresh]);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_within_window() {
        let (queue, runner) = queue(Duration::from_millis(100));
        queue.begin_loop().unwrap();
        for job in DISTINCT {
            queue.enqueue(job);
        }

        let outcome = queue.shutdown(Duration::from_secs(10)).await;

        assert_eq!(outcome, DrainOutcome::Drained);
        assert_eq!(runner.done().len(), 5);
        assert!(!queue.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_forces_after_window_and_keeps_work() {
        let (queue, runner) = queue(Duration::from_secs(4));
        queue.begin_loop().unwrap();
        for job in DISTINCT {
            queue.enqueue(job);
        }

        let outcome = queue.shutdown(Duration::from_secs(10)).await;

        // Two jobs finish by t=8s; the third is interrupted at t=10s.
        assert_eq!(outcome, DrainOutcome::Forced { pending: 3 });
        assert_eq!(runner.done().len(), 2);
        assert!(!queue.is_running());
        assert_eq!(queue.pending(), 3);

        queue.begin_loop().unwrap();
        tokio::time::sleep(Duration::from_secs(13)).await;
        assert_eq!(runner.done().len(), 5, "restarted loop runs the leftover jobs");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_without_loop_is_drained() {
        let (queue, _) = queue(Duration::ZERO);
        queue.enqueue(Job::ContactSync);

        assert_eq!(queue.shutdown(Duration::from_secs(1)).await, DrainOutcome::Drained);
        assert_eq!(queue.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_pending_job_is_coalesced() {
        let (queue, runner) = queue(Duration::from_millis(1));

        for _ in 0..100 {
            queue.enqueue(Job::LocalBackup);
            queue.enqueue(Job::DirectoryRefresh);
        }
        assert_eq!(queue.pending(), 2);

        queue.begin_loop().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runner.done(), [Job::LocalBackup, Job::DirectoryRefresh]);

        queue.enqueue(Job::LocalBackup);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runner.done().len(), 3, "a completed job can be queued again");
    }

    #[tokio::test(start_paused = true)]
    async fn begin_loop_is_idempotent() {
        let (queue, runner) = queue(Duration::from_millis(1));
        queue.begin_loop().unwrap();
        queue.begin_loop().unwrap();
        queue.enqueue(Job::ContactSync);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runner.done(), [Job::ContactSync]);
    }
}
