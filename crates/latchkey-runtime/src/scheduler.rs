//! Periodic task scheduler on tokio timers.
//!
//! Each registered [`PeriodicTask`] gets its own interval task that enqueues
//! the task's job on the job queue. Registration is replace-on-duplicate, so
//! the unlock sequence can register every task on every unlock.

#![allow(clippy::disallowed_types, reason = "Short synchronous critical sections only")]

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use latchkey_core::{JobQueue, PeriodicTask, Scheduler};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, warn};

/// How often each periodic task fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePlan {
    /// Signed pre-key rotation check
    pub signed_pre_key_rotation: Duration,
    /// Directory refresh
    pub directory_refresh: Duration,
    /// Local backup
    pub local_backup: Duration,
    /// Sender certificate rotation
    pub sender_certificate_rotation: Duration,
}

impl SchedulePlan {
    /// Period of `task`.
    pub fn period(&self, task: PeriodicTask) -> Duration {
        match task {
            PeriodicTask::SignedPreKeyRotation => self.signed_pre_key_rotation,
            PeriodicTask::DirectoryRefresh => self.directory_refresh,
            PeriodicTask::LocalBackup => self.local_backup,
            PeriodicTask::SenderCertificateRotation => self.sender_certificate_rotation,
        }
    }
}

impl Default for SchedulePlan {
    fn default() -> Self {
        const HOUR: Duration = Duration::from_secs(60 * 60);
        Self {
            signed_pre_key_rotation: HOUR * 48,
            directory_refresh: HOUR * 12,
            local_backup: HOUR * 24,
            sender_certificate_rotation: HOUR * 24,
        }
    }
}

/// Scheduler that enqueues each task's job on a fixed period.
///
/// The first run of a task happens one period after registration. Dropping
/// the scheduler cancels every registration.
pub struct TokioScheduler {
    queue: Arc<dyn JobQueue>,
    plan: SchedulePlan,
    tasks: Mutex<HashMap<PeriodicTask, JoinHandle<()>>>,
}

impl TokioScheduler {
    /// Create a scheduler with nothing registered.
    pub fn new(queue: Arc<dyn JobQueue>, plan: SchedulePlan) -> Self {
        Self { queue, plan, tasks: Mutex::new(HashMap::new()) }
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<PeriodicTask, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether `task` has a live registration.
    pub fn is_scheduled(&self, task: PeriodicTask) -> bool {
        self.tasks().get(&task).is_some_and(|handle| !handle.is_finished())
    }

    /// Cancel every registration.
    pub fn cancel_all(&self) {
        for (task, handle) in self.tasks().drain() {
            handle.abort();
            debug!(?task, "periodic task cancelled");
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, task: PeriodicTask) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(?task, "no runtime, periodic task not scheduled");
            return;
        };

        let period = self.plan.period(task).max(Duration::from_millis(1));
        let queue = Arc::clone(&self.queue);
        let handle = runtime.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                queue.enqueue(task.job());
            }
        });

        if let Some(previous) = self.tasks().insert(task, handle) {
            previous.abort();
        }
        debug!(?task, ?period, "periodic task scheduled");
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("plan", &self.plan)
            .field("scheduled", &self.tasks().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;
    use latchkey_core::{DrainOutcome, Job, SubsystemError};

    use super::*;

    #[derive(Default)]
    struct Collecting(Mutex<Vec<Job>>);

    impl Collecting {
        fn jobs(&self) -> Vec<Job> {
            self.0.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JobQueue for Collecting {
        fn enqueue(&self, job: Job) {
            self.0.lock().unwrap().push(job);
        }

        fn begin_loop(&self) -> Result<(), SubsystemError> {
            Ok(())
        }

        async fn shutdown(&self, _timeout: Duration) -> DrainOutcome {
            DrainOutcome::Drained
        }
    }

    fn plan(period: Duration) -> SchedulePlan {
        SchedulePlan {
            signed_pre_key_rotation: period,
            directory_refresh: period,
            local_backup: period,
            sender_certificate_rotation: period,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn enqueues_job_each_period() {
        let queue = Arc::new(Collecting::default());
        let scheduler = TokioScheduler::new(queue.clone(), plan(Duration::from_secs(60)));

        scheduler.schedule(PeriodicTask::LocalBackup);
        assert!(scheduler.is_scheduled(PeriodicTask::LocalBackup));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(queue.jobs().is_empty(), "first run is one period out");

        tokio::time::sleep(Duration::from_secs(62)).await;
        assert_eq!(queue.jobs(), [Job::LocalBackup, Job::LocalBackup]);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_registration() {
        let queue = Arc::new(Collecting::default());
        let scheduler = TokioScheduler::new(queue.clone(), plan(Duration::from_secs(60)));

        for _ in 0..3 {
            scheduler.schedule(PeriodicTask::DirectoryRefresh);
        }
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(queue.jobs(), [Job::DirectoryRefresh]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_stops_every_task() {
        let queue = Arc::new(Collecting::default());
        let scheduler = TokioScheduler::new(queue.clone(), plan(Duration::from_secs(1)));

        for task in PeriodicTask::ALL {
            scheduler.schedule(task);
        }
        scheduler.cancel_all();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(queue.jobs().is_empty());
        assert!(!scheduler.is_scheduled(PeriodicTask::SignedPreKeyRotation));
    }

    #[test]
    fn default_plan_is_daily_or_slower_except_directory() {
        let plan = SchedulePlan::default();
        assert!(plan.period(PeriodicTask::DirectoryRefresh) < plan.period(PeriodicTask::LocalBackup));
        assert_eq!(
            plan.period(PeriodicTask::SignedPreKeyRotation),
            Duration::from_secs(2 * 24 * 60 * 60)
        );
    }
}
