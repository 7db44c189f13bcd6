//! End-to-end lifecycle over the production collaborators.
//!
//! Runs the real controller with the real worker subsystems, job queue,
//! scheduler, sealed-secret verifier and scrubber on tokio's paused clock.
//! The oracle is what each collaborator reports about itself.

#![allow(clippy::unwrap_used)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use latchkey_app::UnlockOutcome;
use latchkey_core::{
    Job, LifecycleConfig, LockReason, LockState, MasterSecret, Passphrase, PeriodicTask,
    UnlockError,
};
use latchkey_runtime::{
    JobRunner, Runtime, RuntimeConfig, RuntimeError, SchedulePlan, SealedSecret,
    verifier::MASTER_SECRET_LEN,
};

const PASSPHRASE: &str = "correct horse battery staple";

#[derive(Default)]
struct Recording(Mutex<Vec<Job>>);

#[async_trait]
impl JobRunner for Recording {
    async fn run(&self, job: Job) {
        self.0.lock().unwrap().push(job);
    }
}

fn sealed(passphrase: &str) -> SealedSecret {
    let secret = MasterSecret::new(vec![0x33; MASTER_SECRET_LEN]);
    SealedSecret::seal_with(&Passphrase::from(passphrase), &secret, [1; 32], [2; 24]).unwrap()
}

fn config(lifecycle: LifecycleConfig) -> RuntimeConfig {
    RuntimeConfig {
        lifecycle,
        poll_interval: Duration::from_secs(1),
        sweep_interval: Duration::from_secs(1),
        schedule: SchedulePlan {
            signed_pre_key_rotation: Duration::from_secs(60),
            directory_refresh: Duration::from_secs(60),
            local_backup: Duration::from_secs(60),
            sender_certificate_rotation: Duration::from_secs(60),
        },
        build_expires_at: None,
    }
}

fn runtime() -> (Runtime, Arc<Recording>) {
    let runner = Arc::new(Recording::default());
    let runtime =
        Runtime::assemble(config(LifecycleConfig::default()), sealed(PASSPHRASE), runner.clone())
            .unwrap();
    (runtime, runner)
}

#[tokio::test(start_paused = true)]
async fn unlock_starts_everything_and_lock_stops_it() {
    let (runtime, _) = runtime();
    let controller = runtime.launch().await.unwrap();
    assert_eq!(controller.lock_state(), LockState::Locked);

    let outcome = controller.unlock(Passphrase::from(PASSPHRASE)).await.unwrap();

    assert_eq!(outcome, UnlockOutcome::Unlocked);
    assert!(runtime.retrieval.is_connected().await);
    assert!(runtime.expiring.is_running().await);
    assert!(runtime.view_once.is_running().await);
    assert!(runtime.job_queue.is_running());
    for task in PeriodicTask::ALL {
        assert!(runtime.scheduler.is_scheduled(task));
    }
    assert_eq!(controller.secret_store().with_secret(|s| s.expose()[0]), Some(0x33));

    controller.lock(LockReason::UserRequested).await;

    assert!(!controller.secret_store().is_available());
    assert!(!runtime.retrieval.is_connected().await);
    assert!(!runtime.expiring.is_running().await);
    assert!(!runtime.view_once.is_running().await);
    assert!(runtime.job_queue.is_running(), "queue drains after the grace delay");

    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert!(!runtime.job_queue.is_running());
    assert!(!controller.secret_store().is_present());
    assert_eq!(runtime.scrubber.completed(), 1);
}

#[tokio::test(start_paused = true)]
async fn wrong_passphrase_starts_nothing() {
    let (runtime, _) = runtime();
    let controller = runtime.launch().await.unwrap();

    let err = controller.unlock(Passphrase::from("wrong")).await.unwrap_err();

    assert_eq!(err, UnlockError::InvalidPassphrase);
    assert_eq!(controller.lock_state(), LockState::Locked);
    assert!(!runtime.retrieval.is_connected().await);
    assert!(!runtime.job_queue.is_running());
}

#[tokio::test(start_paused = true)]
async fn scheduled_jobs_run_through_the_queue() {
    let (runtime, runner) = runtime();
    let controller = runtime.launch().await.unwrap();
    controller.unlock(Passphrase::from(PASSPHRASE)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;

    let jobs = runner.0.lock().unwrap().clone();
    assert!(jobs.contains(&Job::SignedPreKeyRotation));
    assert!(jobs.contains(&Job::LocalBackup));
}

#[tokio::test(start_paused = true)]
async fn periodic_jobs_stay_bounded_while_locked() {
    let (runtime, runner) = runtime();
    let controller = runtime.launch().await.unwrap();
    controller.unlock(Passphrase::from(PASSPHRASE)).await.unwrap();
    controller.lock(LockReason::UserRequested).await;
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(!runtime.job_queue.is_running());
    assert_eq!(runtime.job_queue.pending(), 0);

    for _ in 0..100 {
        tokio::time::sleep(Duration::from_secs(60)).await;
    }

    assert_eq!(controller.lock_state(), LockState::Locked);
    assert!(runtime.job_queue.pending() <= PeriodicTask::ALL.len());

    runner.0.lock().unwrap().clear();
    controller.unlock(Passphrase::from(PASSPHRASE)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let jobs = runner.0.lock().unwrap().clone();
    let backups = jobs.iter().filter(|job| **job == Job::LocalBackup).count();
    assert_eq!(backups, 1, "buffered backups run once, not as a burst");
}

#[tokio::test(start_paused = true)]
async fn foreground_resume_enqueues_routine_jobs() {
    let (runtime, runner) = runtime();
    let controller = runtime.launch().await.unwrap();
    controller.unlock(Passphrase::from(PASSPHRASE)).await.unwrap();

    controller.on_foreground();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let jobs = runner.0.lock().unwrap().clone();
    assert!(jobs.contains(&Job::RoutineProfileRefresh));
    assert!(jobs.contains(&Job::ContactSync));
}

#[tokio::test(start_paused = true)]
async fn disabled_passphrase_lock_unlocks_at_launch() {
    let lifecycle = LifecycleConfig { passphrase_lock: false, ..LifecycleConfig::default() };
    let runtime = Runtime::assemble(
        config(lifecycle.clone()),
        sealed(&lifecycle.default_passphrase),
        Arc::new(Recording::default()),
    )
    .unwrap();

    let controller = runtime.launch().await.unwrap();

    assert_eq!(controller.lock_state(), LockState::Unlocked);
    assert!(controller.is_initialized());
    assert!(runtime.retrieval.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn terminate_wipes_without_grace() {
    let (runtime, _) = runtime();
    let controller = runtime.launch().await.unwrap();
    controller.unlock(Passphrase::from(PASSPHRASE)).await.unwrap();

    controller.terminate().await;

    assert_eq!(controller.lock_state(), LockState::Locked);
    assert!(!controller.secret_store().is_present());
    assert!(!runtime.job_queue.is_running());
    assert!(!runtime.retrieval.is_connected().await);
    assert_eq!(runtime.scrubber.completed(), 1);
}

#[test]
fn zero_cadence_is_rejected() {
    let mut bad = config(LifecycleConfig::default());
    bad.poll_interval = Duration::ZERO;

    let err = Runtime::assemble(bad, sealed("p"), Arc::new(Recording::default())).unwrap_err();

    assert!(matches!(err, RuntimeError::Config(_)));
}
