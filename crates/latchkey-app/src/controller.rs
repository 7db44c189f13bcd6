//! Lifecycle controller.
//!
//! [`Controller`] executes the [`Lifecycle`] machine's actions against the
//! [`Collaborators`]. Every lock transition runs under one transition guard:
//!
//! - Requests queue on the guard in arrival order. A lock that arrives while
//!   an unlock is in flight runs after it, never interleaved.
//! - Once a request holds the guard its sequence runs on its own task.
//!   Dropping the caller's future does not cancel it.
//! - The post-lock drain is a task owned by the controller. It takes the
//!   guard when it fires, and it is aborted by the next unlock. The drain is
//!   tagged with its lock generation, so a timer that slips past the abort
//!   still cannot clear a newer secret.
//!
//! Visibility handlers never take the guard. They record the edge in the
//! published [`StateCell`] and run the resume/pause step only if the edge
//! landed while unlocked. Edges that landed while unlocking are replayed by
//! the unlock sequence, so each edge is acted on by exactly one side.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use latchkey_core::{
    Collaborators, DrainOutcome, Environment, Job, Lifecycle, LifecycleAction, LifecycleConfig,
    LockReason, LockState, MasterSecret, Passphrase, PeriodicTask, SecretStore, SecurityProvider,
    StartupError, StateCell, UnlockError, Visibility, visibility_actions,
};
use tokio::{
    sync::{Mutex, OwnedMutexGuard, broadcast},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::LockEvents;

/// Extra time a job queue gets beyond its own drain window before the
/// controller stops waiting for it.
const SHUTDOWN_SLACK: Duration = Duration::from_millis(500);

/// Routine work enqueued by the foreground-resume step.
const RESUME_JOBS: [Job; 3] =
    [Job::RoutineProfileRefresh, Job::RoutineGroupMaintenance, Job::ContactSync];

type BoxTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Result of a successful unlock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// This request ran the unlock sequence.
    Unlocked,
    /// The application was not locked when the request got its turn. Nothing
    /// was verified or started.
    AlreadyUnlocked,
}

/// Lock/unlock lifecycle controller.
///
/// Cheap to clone; clones share the same lifecycle.
pub struct Controller<E: Environment> {
    inner: Arc<Inner<E>>,
}

impl<E: Environment> Clone for Controller<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct Inner<E> {
    env: E,
    collaborators: Collaborators,
    /// Published lock state and visibility, read without the guard.
    cell: StateCell,
    /// Mirrors `Lifecycle::is_initialized` for guard-free reads.
    initialized: AtomicBool,
    passphrase_lock: AtomicBool,
    events: LockEvents,
    /// Transition guard.
    sequencer: Arc<Mutex<Sequencer>>,
}

/// State only touched while holding the transition guard.
struct Sequencer {
    machine: Lifecycle,
    drain: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

/// Per-sequence values threaded through action execution.
#[derive(Default)]
struct Scratch {
    /// Verified secret waiting for `InstallSecret`.
    secret: Option<MasterSecret>,
    /// Visibility observed by `ResumeIfVisible`.
    resumed_from: Option<Visibility>,
}

impl<E: Environment> Controller<E> {
    /// Install security providers and create a locked controller.
    ///
    /// If the passphrase lock is disabled, unlocks immediately with the
    /// configured default passphrase. A rejected default passphrase leaves
    /// the controller locked and re-enables the passphrase lock instead of
    /// failing.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - `StartupError::ProviderInstallation` if a required provider fails.
    ///   Nothing is started and no controller is returned.
    pub async fn launch(
        config: LifecycleConfig,
        collaborators: Collaborators,
        env: E,
    ) -> Result<Self, StartupError> {
        install_providers(&collaborators.providers)?;

        let machine = Lifecycle::new(collaborators.subsystems.start_order(), &config);
        let controller = Self {
            inner: Arc::new(Inner {
                env,
                collaborators,
                cell: StateCell::new(),
                initialized: AtomicBool::new(false),
                passphrase_lock: AtomicBool::new(config.passphrase_lock),
                events: LockEvents::new(),
                sequencer: Arc::new(Mutex::new(Sequencer {
                    machine,
                    drain: None,
                    listener: None,
                })),
            }),
        };

        info!(
            subsystems = ?controller.inner.collaborators.subsystems,
            passphrase_lock = config.passphrase_lock,
            "lifecycle controller launched"
        );

        if !config.passphrase_lock {
            let passphrase = Passphrase::new(config.default_passphrase);
            if let Err(e) = controller.unlock(passphrase).await {
                warn!(error = %e, "default passphrase rejected, enabling passphrase lock");
                controller.inner.passphrase_lock.store(true, Ordering::Release);
            }
        }

        Ok(controller)
    }

    /// Verify `passphrase` and run the unlock sequence.
    ///
    /// Waits behind any in-flight transition. Returns
    /// [`UnlockOutcome::AlreadyUnlocked`] without verifying if the
    /// application is not locked by then.
    ///
    /// # Errors
    ///
    /// - `UnlockError::InvalidPassphrase` or `UnlockError::UnrecoverableKey`
    ///   from verification. The application stays locked and nothing is
    ///   started.
    /// - `UnlockError::Interrupted` if the sequence task panicked.
    pub async fn unlock(&self, passphrase: Passphrase) -> Result<UnlockOutcome, UnlockError> {
        let guard = self.inner.acquire().await;
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move { inner.unlock(guard, passphrase).await })
            .await
            .map_err(|e| UnlockError::Interrupted(e.to_string()))?
    }

    /// Run the lock sequence.
    ///
    /// Waits behind any in-flight transition and is a no-op unless unlocked.
    /// Returns once the secret is sealed and subsystems are stopped; the job
    /// queue drain and secret wipe follow after the grace delay.
    pub async fn lock(&self, reason: LockReason) {
        let guard = self.inner.acquire().await;
        let inner = Arc::clone(&self.inner);

        if let Err(e) = tokio::spawn(async move { inner.lock(guard, reason).await }).await {
            error!(error = %e, "lock sequence interrupted");
        }
    }

    /// Process teardown: lock if needed, then drain and wipe immediately
    /// with a blocking memory wipe.
    pub async fn terminate(&self) {
        let guard = self.inner.acquire().await;
        let inner = Arc::clone(&self.inner);

        if let Err(e) = tokio::spawn(async move { inner.terminate(guard).await }).await {
            error!(error = %e, "teardown interrupted");
        }
    }

    /// Host notification: the application became visible.
    pub fn on_foreground(&self) {
        self.inner.visibility_changed(Visibility::Foreground);
    }

    /// Host notification: the application was hidden.
    pub fn on_background(&self) {
        self.inner.visibility_changed(Visibility::Background);
    }

    /// Published lock state.
    pub fn lock_state(&self) -> LockState {
        self.inner.cell.lock_state()
    }

    /// Last recorded visibility.
    pub fn visibility(&self) -> Visibility {
        self.inner.cell.visibility()
    }

    /// Store holding the master secret while unlocked.
    pub fn secret_store(&self) -> &Arc<SecretStore> {
        &self.inner.collaborators.secrets
    }

    /// Whether every first-unlock step has completed.
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// Whether unlocking requires a user passphrase.
    pub fn passphrase_lock_enabled(&self) -> bool {
        self.inner.passphrase_lock.load(Ordering::Acquire)
    }

    /// Lock event source this controller listens on while unlocked.
    pub fn lock_events(&self) -> LockEvents {
        self.inner.events.clone()
    }
}

impl<E> std::fmt::Debug for Controller<E>
where
    E: Environment,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("lock_state", &self.lock_state())
            .field("visibility", &self.visibility())
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

fn install_providers(providers: &[Arc<dyn SecurityProvider>]) -> Result<(), StartupError> {
    for provider in providers {
        match provider.install() {
            Ok(()) => debug!(provider = provider.name(), "security provider installed"),
            Err(e) if provider.required() => {
                error!(provider = provider.name(), error = %e, "required security provider failed");
                return Err(StartupError::ProviderInstallation {
                    provider: provider.name(),
                    reason: e.reason,
                });
            },
            Err(e) => warn!(
                provider = provider.name(),
                error = %e,
                "optional security provider not installed, may already be present"
            ),
        }
    }
    Ok(())
}

impl<E: Environment> Inner<E> {
    async fn acquire(&self) -> OwnedMutexGuard<Sequencer> {
        Arc::clone(&self.sequencer).lock_owned().await
    }

    async fn unlock(
        self: Arc<Self>,
        mut seq: OwnedMutexGuard<Sequencer>,
        passphrase: Passphrase,
    ) -> Result<UnlockOutcome, UnlockError> {
        if seq.machine.state() != LockState::Locked {
            debug!(state = %seq.machine.state(), "unlock ignored");
            return Ok(UnlockOutcome::AlreadyUnlocked);
        }

        let started = self.env.now();
        let secret = match self.collaborators.verifier.verify(&passphrase).await {
            Ok(secret) => secret,
            Err(e) => {
                warn!(error = %e, "unlock rejected");
                return Err(e);
            },
        };
        drop(passphrase);

        let Some(actions) = seq.machine.begin_unlock() else {
            return Ok(UnlockOutcome::AlreadyUnlocked);
        };
        self.cell.publish(LockState::Unlocking);
        info!("unlocking");

        let mut scratch = Scratch { secret: Some(secret), resumed_from: None };
        for action in actions {
            self.execute(&mut seq, action, &mut scratch).await;
        }

        let mut visible_at_unlock = None;
        if let Some(actions) = seq.machine.finish_unlock() {
            visible_at_unlock = Some(self.cell.publish(LockState::Unlocked));
            for action in actions {
                self.execute(&mut seq, action, &mut scratch).await;
            }
        }

        // Edges recorded while unlocking were ignored by the handlers; replay
        // their net effect up to the publish. Later edges saw `Unlocked` and
        // were handled there.
        if let (Some(observed), Some(current)) = (scratch.resumed_from, visible_at_unlock) {
            for action in visibility_actions(observed, current, LockState::Unlocked) {
                self.execute(&mut seq, action, &mut scratch).await;
            }
        }

        info!(elapsed = ?(self.env.now() - started), "unlocked");
        Ok(UnlockOutcome::Unlocked)
    }

    async fn lock(self: Arc<Self>, mut seq: OwnedMutexGuard<Sequencer>, reason: LockReason) {
        let Some(actions) = seq.machine.begin_lock() else {
            debug!(%reason, state = %seq.machine.state(), "lock ignored");
            return;
        };
        self.cell.publish(LockState::Locked);

        let mut scratch = Scratch::default();
        for action in actions {
            self.execute(&mut seq, action, &mut scratch).await;
        }

        info!(%reason, generation = seq.machine.generation(), "locked");
    }

    async fn terminate(self: Arc<Self>, mut seq: OwnedMutexGuard<Sequencer>) {
        let actions = seq.machine.teardown();
        self.cell.publish(LockState::Locked);

        let mut scratch = Scratch::default();
        for action in actions {
            self.execute(&mut seq, action, &mut scratch).await;
        }

        info!("lifecycle torn down");
    }

    /// Lock on behalf of the lock event listener.
    ///
    /// Runs on its own task so the listener, which the lock sequence aborts,
    /// never executes the sequence itself.
    fn request_lock(self: &Arc<Self>, reason: LockReason) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let guard = inner.acquire().await;
            inner.lock(guard, reason).await;
        });
    }

    fn listen(self: Arc<Self>, mut events: broadcast::Receiver<LockReason>) -> BoxTask {
        Box::pin(async move {
            loop {
                match events.recv().await {
                    Ok(reason) => {
                        debug!(%reason, "lock event received");
                        self.request_lock(reason);
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "lock events lagged");
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn drain_after(self: Arc<Self>, generation: u64, delay: Duration) -> BoxTask {
        Box::pin(async move {
            self.env.sleep(delay).await;

            let mut seq = self.acquire().await;
            let actions = seq.machine.drain_due(generation);
            if actions.is_empty() {
                debug!(generation, "stale drain skipped");
                return;
            }

            debug!(generation, "post-lock drain");
            let mut scratch = Scratch::default();
            for action in actions {
                self.execute(&mut seq, action, &mut scratch).await;
            }
        })
    }

    fn visibility_changed(&self, next: Visibility) {
        let (previous, lock_state) = self.cell.record_visibility(next);
        let actions = visibility_actions(previous, next, lock_state);
        if actions.is_empty() {
            debug!(%previous, %next, %lock_state, "visibility recorded");
        }

        for action in actions {
            match action {
                LifecycleAction::ForegroundResume => self.foreground_resume(),
                LifecycleAction::BackgroundPause => self.background_pause(),
                other => debug!(action = ?other, "unexpected visibility action"),
            }
        }
    }

    fn foreground_resume(&self) {
        let c = &self.collaborators;
        c.hooks.refresh_remote_config();
        c.hooks.warm_caches();
        for job in RESUME_JOBS {
            c.job_queue.enqueue(job);
        }
        c.hooks.begin_visible_tracking();
        c.hooks.check_build_expiry();
        debug!("foreground resume");
    }

    fn background_pause(&self) {
        self.collaborators.hooks.end_visible_tracking();
        debug!("background pause");
    }

    async fn execute(
        self: &Arc<Self>,
        seq: &mut Sequencer,
        action: LifecycleAction,
        scratch: &mut Scratch,
    ) {
        let c = &self.collaborators;
        match action {
            LifecycleAction::CancelDrain { generation } => {
                if let Some(drain) = seq.drain.take() {
                    drain.abort();
                    debug!(generation, "pending drain cancelled");
                }
            },
            LifecycleAction::InstallSecret => {
                if let Some(secret) = scratch.secret.take()
                    && let Err(e) = c.secrets.set(secret)
                {
                    error!(error = %e, "master secret not installed");
                }
            },
            LifecycleAction::Initialize(step) => {
                let succeeded = match c.bootstrap.run(step) {
                    Ok(()) => {
                        debug!(%step, "first-unlock step complete");
                        true
                    },
                    Err(e) => {
                        warn!(%step, error = %e, "first-unlock step failed, retrying next unlock");
                        false
                    },
                };
                seq.machine.record_init(step, succeeded);
                self.initialized.store(seq.machine.is_initialized(), Ordering::Release);
            },
            LifecycleAction::StartSubsystem(id) => {
                if let Some(subsystem) = c.subsystems.get(id) {
                    match subsystem.start().await {
                        Ok(()) => debug!(subsystem = subsystem.name(), "started"),
                        Err(e) => warn!(subsystem = subsystem.name(), error = %e, "start failed"),
                    }
                }
            },
            LifecycleAction::SchedulePeriodicTasks => {
                for task in PeriodicTask::ALL {
                    c.scheduler.schedule(task);
                }
            },
            LifecycleAction::BeginJobLoop => {
                if let Err(e) = c.job_queue.begin_loop() {
                    warn!(error = %e, "job loop failed to begin");
                }
            },
            LifecycleAction::RegisterLockEvents => {
                let listener = tokio::spawn(Arc::clone(self).listen(self.events.subscribe()));
                if let Some(stale) = seq.listener.replace(listener) {
                    stale.abort();
                }
            },
            LifecycleAction::ResumeIfVisible => {
                let visibility = self.cell.visibility();
                scratch.resumed_from = Some(visibility);
                if visibility == Visibility::Foreground {
                    self.foreground_resume();
                }
            },
            LifecycleAction::UnsealSecret => c.secrets.unseal(),
            LifecycleAction::SealSecret => c.secrets.seal(),
            LifecycleAction::StopCallSession => c.hooks.stop_call_session(),
            LifecycleAction::StopSubsystem(id) => {
                if let Some(subsystem) = c.subsystems.get(id) {
                    match subsystem.stop().await {
                        Ok(()) => debug!(subsystem = subsystem.name(), "stopped"),
                        Err(e) => warn!(subsystem = subsystem.name(), error = %e, "stop failed"),
                    }
                }
            },
            LifecycleAction::UnregisterLockEvents => {
                if let Some(listener) = seq.listener.take() {
                    listener.abort();
                }
            },
            LifecycleAction::ScheduleDrain { generation, delay } => {
                let drain = tokio::spawn(Arc::clone(self).drain_after(generation, delay));
                if let Some(stale) = seq.drain.replace(drain) {
                    stale.abort();
                }
                debug!(generation, ?delay, "drain scheduled");
            },
            LifecycleAction::ShutdownJobQueue { timeout } => {
                let outcome = tokio::select! {
                    outcome = c.job_queue.shutdown(timeout) => outcome,
                    () = self.env.sleep(timeout + SHUTDOWN_SLACK) => DrainOutcome::Abandoned,
                };
                match outcome {
                    DrainOutcome::Drained => debug!("job queue drained"),
                    DrainOutcome::Forced { pending } => {
                        warn!(pending, ?timeout, "job queue drain timed out, forced shutdown");
                    },
                    DrainOutcome::Abandoned => {
                        warn!(?timeout, "job queue unresponsive, shutdown abandoned");
                    },
                }
            },
            LifecycleAction::ClearSecret => {
                if c.secrets.clear() {
                    debug!("master secret cleared");
                }
            },
            LifecycleAction::RequestMemoryWipe { blocking } => c.wiper.request_wipe(blocking),
            LifecycleAction::ForegroundResume => self.foreground_resume(),
            LifecycleAction::BackgroundPause => self.background_pause(),
        }
    }
}
