//! Recording collaborator fakes.
//!
//! Every fake appends to a shared [`CallLog`] and exposes knobs for failure
//! injection. Timing-sensitive fakes sleep on tokio's clock, so under a
//! paused runtime they complete in virtual time.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::{
    collections::HashSet,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tracing::debug;
use latchkey_core::{
    AppHooks, Bootstrap, DrainOutcome, InitStep, Job, JobQueue, MasterSecret, MemoryWiper,
    Passphrase, PassphraseVerifier, PeriodicTask, ProviderError, Scheduler, SecurityProvider,
    Subsystem, SubsystemError, UnlockError,
};

use crate::{Call, CallLog};

/// Passphrase accepted by [`FakeVerifier::new`].
pub const VALID_PASSPHRASE: &str = "correct horse battery staple";

/// Key bytes returned by a successful [`FakeVerifier`] unlock.
pub const SECRET_BYTES: [u8; 32] = [0x5A; 32];

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Subsystem that records `start`/`stop` and tracks whether it is running.
#[derive(Debug)]
pub struct FakeSubsystem {
    name: &'static str,
    log: CallLog,
    running: AtomicBool,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    start_delay: Mutex<Duration>,
}

impl FakeSubsystem {
    /// Create a stopped subsystem.
    pub fn new(name: &'static str, log: CallLog) -> Self {
        Self {
            name,
            log,
            running: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            start_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Make `start` take `delay` of (virtual) time before it returns.
    pub fn set_start_delay(&self, delay: Duration) {
        *locked(&self.start_delay) = delay;
    }

    /// Make `start` fail without starting.
    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Make `stop` report an error. The subsystem still stops.
    pub fn fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    /// Whether the subsystem is started.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Subsystem for FakeSubsystem {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn start(&self) -> Result<(), SubsystemError> {
        self.log.record(Call::Start(self.name));
        let delay = *locked(&self.start_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_start.load(Ordering::SeqCst) {
            debug!(subsystem = self.name, "injecting start failure");
            return Err(SubsystemError::Start { name: self.name, reason: "injected".into() });
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), SubsystemError> {
        self.log.record(Call::Stop(self.name));
        self.running.store(false, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(SubsystemError::Stop { name: self.name, reason: "injected".into() });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct QueueState {
    pending: Vec<Job>,
    running: bool,
    job_duration: Duration,
    hang: bool,
}

/// Job queue whose jobs only make progress while it is being drained.
///
/// Each pending job takes `job_duration` of (virtual) time during
/// `shutdown`, so tests control exactly whether a drain completes within
/// its window.
#[derive(Debug)]
pub struct FakeJobQueue {
    log: CallLog,
    state: Mutex<QueueState>,
}

impl FakeJobQueue {
    /// Create an idle queue whose jobs complete instantly.
    pub fn new(log: CallLog) -> Self {
        Self { log, state: Mutex::new(QueueState::default()) }
    }

    /// Time each pending job takes to finish during a drain.
    pub fn set_job_duration(&self, duration: Duration) {
        locked(&self.state).job_duration = duration;
    }

    /// Make `shutdown` never return.
    pub fn hang_on_shutdown(&self, hang: bool) {
        locked(&self.state).hang = hang;
    }

    /// Jobs not yet completed.
    pub fn pending(&self) -> usize {
        locked(&self.state).pending.len()
    }

    /// Whether the processing loop is running.
    pub fn is_running(&self) -> bool {
        locked(&self.state).running
    }
}

#[async_trait]
impl JobQueue for FakeJobQueue {
    fn enqueue(&self, job: Job) {
        self.log.record(Call::Enqueue(job));
        locked(&self.state).pending.push(job);
    }

    fn begin_loop(&self) -> Result<(), SubsystemError> {
        self.log.record(Call::BeginLoop);
        locked(&self.state).running = true;
        Ok(())
    }

    async fn shutdown(&self, timeout: Duration) -> DrainOutcome {
        self.log.record(Call::Shutdown { timeout });
        let (pending, job_duration, hang) = {
            let state = locked(&self.state);
            (state.pending.len(), state.job_duration, state.hang)
        };

        if hang {
            debug!("job queue shutdown hanging");
            std::future::pending::<()>().await;
        }

        let work = job_duration.saturating_mul(u32::try_from(pending).unwrap_or(u32::MAX));
        let outcome = if work <= timeout {
            if !work.is_zero() {
                tokio::time::sleep(work).await;
            }
            locked(&self.state).pending.clear();
            DrainOutcome::Drained
        } else {
            tokio::time::sleep(timeout).await;
            let finished = (timeout.as_nanos() / job_duration.as_nanos()) as usize;
            let mut state = locked(&self.state);
            let finished = finished.min(state.pending.len());
            state.pending.drain(..finished);
            DrainOutcome::Forced { pending: state.pending.len() }
        };

        locked(&self.state).running = false;
        self.log.record(Call::ShutdownComplete(outcome));
        outcome
    }
}

/// Verifier accepting exactly one passphrase.
#[derive(Debug)]
pub struct FakeVerifier {
    log: CallLog,
    accepted: String,
    delay: Mutex<Duration>,
    unrecoverable: AtomicBool,
}

impl FakeVerifier {
    /// Accept [`VALID_PASSPHRASE`].
    pub fn new(log: CallLog) -> Self {
        Self::accepting(VALID_PASSPHRASE, log)
    }

    /// Accept `passphrase`.
    pub fn accepting(passphrase: &str, log: CallLog) -> Self {
        Self {
            log,
            accepted: passphrase.to_string(),
            delay: Mutex::new(Duration::ZERO),
            unrecoverable: AtomicBool::new(false),
        }
    }

    /// Time verification takes (key derivation cost).
    pub fn set_delay(&self, delay: Duration) {
        *locked(&self.delay) = delay;
    }

    /// Report unusable key material for every passphrase.
    pub fn set_unrecoverable(&self, unrecoverable: bool) {
        self.unrecoverable.store(unrecoverable, Ordering::SeqCst);
    }
}

#[async_trait]
impl PassphraseVerifier for FakeVerifier {
    async fn verify(&self, passphrase: &Passphrase) -> Result<MasterSecret, UnlockError> {
        self.log.record(Call::Verify);

        let delay = *locked(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.unrecoverable.load(Ordering::SeqCst) {
            return Err(UnlockError::UnrecoverableKey("truncated key material".into()));
        }
        if passphrase.expose() != self.accepted {
            return Err(UnlockError::InvalidPassphrase);
        }
        Ok(MasterSecret::new(SECRET_BYTES.to_vec()))
    }
}

/// Scheduler that records registrations.
#[derive(Debug)]
pub struct FakeScheduler {
    log: CallLog,
    scheduled: Mutex<HashSet<PeriodicTask>>,
}

impl FakeScheduler {
    /// Create a scheduler with nothing registered.
    pub fn new(log: CallLog) -> Self {
        Self { log, scheduled: Mutex::new(HashSet::new()) }
    }

    /// Whether `task` is registered.
    pub fn is_scheduled(&self, task: PeriodicTask) -> bool {
        locked(&self.scheduled).contains(&task)
    }
}

impl Scheduler for FakeScheduler {
    fn schedule(&self, task: PeriodicTask) {
        self.log.record(Call::Schedule(task));
        locked(&self.scheduled).insert(task);
    }
}

/// Hooks that only record.
#[derive(Debug)]
pub struct FakeHooks {
    log: CallLog,
}

impl FakeHooks {
    /// Create recording hooks.
    pub fn new(log: CallLog) -> Self {
        Self { log }
    }
}

impl AppHooks for FakeHooks {
    fn refresh_remote_config(&self) {
        self.log.record(Call::RefreshRemoteConfig);
    }

    fn warm_caches(&self) {
        self.log.record(Call::WarmCaches);
    }

    fn begin_visible_tracking(&self) {
        self.log.record(Call::BeginVisibleTracking);
    }

    fn end_visible_tracking(&self) {
        self.log.record(Call::EndVisibleTracking);
    }

    fn check_build_expiry(&self) {
        self.log.record(Call::CheckBuildExpiry);
    }

    fn stop_call_session(&self) {
        self.log.record(Call::StopCallSession);
    }
}

/// Bootstrap with per-step failure injection.
#[derive(Debug)]
pub struct FakeBootstrap {
    log: CallLog,
    failing: Mutex<HashSet<InitStep>>,
}

impl FakeBootstrap {
    /// Create a bootstrap where every step succeeds.
    pub fn new(log: CallLog) -> Self {
        Self { log, failing: Mutex::new(HashSet::new()) }
    }

    /// Make `step` fail until [`Self::heal`].
    pub fn fail(&self, step: InitStep) {
        locked(&self.failing).insert(step);
    }

    /// Let `step` succeed again.
    pub fn heal(&self, step: InitStep) {
        locked(&self.failing).remove(&step);
    }
}

impl Bootstrap for FakeBootstrap {
    fn run(&self, step: InitStep) -> Result<(), SubsystemError> {
        let succeeded = !locked(&self.failing).contains(&step);
        self.log.record(Call::Init { step, succeeded });
        if succeeded {
            Ok(())
        } else {
            Err(SubsystemError::Init { step, reason: "injected".into() })
        }
    }
}

/// Wiper that records requests.
#[derive(Debug)]
pub struct FakeWiper {
    log: CallLog,
}

impl FakeWiper {
    /// Create a recording wiper.
    pub fn new(log: CallLog) -> Self {
        Self { log }
    }
}

impl MemoryWiper for FakeWiper {
    fn request_wipe(&self, blocking: bool) {
        self.log.record(Call::Wipe { blocking });
    }
}

/// Security provider with a fixed installation result.
#[derive(Debug)]
pub struct FakeProvider {
    name: &'static str,
    required: bool,
    fails: bool,
    log: CallLog,
}

impl FakeProvider {
    /// Provider that installs successfully.
    pub fn installing(name: &'static str, required: bool, log: CallLog) -> Self {
        Self { name, required, fails: false, log }
    }

    /// Provider whose installation fails.
    pub fn failing(name: &'static str, required: bool, log: CallLog) -> Self {
        Self { name, required, fails: true, log }
    }
}

impl SecurityProvider for FakeProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn required(&self) -> bool {
        self.required
    }

    fn install(&self) -> Result<(), ProviderError> {
        self.log.record(Call::InstallProvider(self.name));
        if self.fails { Err(ProviderError::new("injected")) } else { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slow_queue_is_forced_after_timeout() {
        let log = CallLog::new();
        let queue = FakeJobQueue::new(log.clone());
        queue.set_job_duration(Duration::from_secs(5));
        for _ in 0..3 {
            queue.enqueue(Job::LocalBackup);
        }
        queue.begin_loop().ok();

        let outcome = queue.shutdown(Duration::from_secs(10)).await;

        assert_eq!(outcome, DrainOutcome::Forced { pending: 1 });
        assert!(!queue.is_running());
        assert_eq!(log.count(&Call::ShutdownComplete(outcome)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fast_queue_drains() {
        let queue = FakeJobQueue::new(CallLog::new());
        queue.set_job_duration(Duration::from_millis(100));
        queue.enqueue(Job::ContactSync);

        assert_eq!(queue.shutdown(Duration::from_secs(10)).await, DrainOutcome::Drained);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn subsystem_stop_is_idempotent_even_when_failing() {
        let subsystem = FakeSubsystem::new("retrieval", CallLog::new());
        subsystem.start().await.ok();
        subsystem.fail_stop(true);

        assert!(subsystem.stop().await.is_err());
        assert!(!subsystem.is_running());
        assert!(subsystem.stop().await.is_err());
        assert!(!subsystem.is_running());
    }

    #[tokio::test]
    async fn verifier_distinguishes_failures() {
        let verifier = FakeVerifier::new(CallLog::new());

        assert!(verifier.verify(&Passphrase::from(VALID_PASSPHRASE)).await.is_ok());
        assert_eq!(
            verifier.verify(&Passphrase::from("nope")).await.err(),
            Some(UnlockError::InvalidPassphrase)
        );

        verifier.set_unrecoverable(true);
        assert!(matches!(
            verifier.verify(&Passphrase::from(VALID_PASSPHRASE)).await,
            Err(UnlockError::UnrecoverableKey(_))
        ));
    }
}
