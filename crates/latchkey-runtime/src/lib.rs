//! Latchkey production runtime
//!
//! Production implementations of every collaborator the lifecycle controller
//! drives, wired together by [`Runtime`].
//!
//! # Components
//!
//! - [`SystemEnv`]: system clock and tokio timers
//! - [`RetrievalConnection`], [`Sweeper`]: periodic subsystems on a
//!   [`PeriodicWorker`]
//! - [`WorkerJobQueue`]: buffered FIFO job queue with a bounded drain
//! - [`TokioScheduler`]: periodic maintenance registration
//! - [`SealedSecret`]: passphrase verifier over an AEAD-sealed master secret
//! - [`HeapScrubber`]: best-effort memory wipe
//! - [`AeadSelfTest`], [`RustlsRing`]: launch-time security providers

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod command;
pub mod error;
pub mod hooks;
pub mod job_queue;
pub mod provider;
pub mod retrieval;
pub mod scheduler;
pub mod scrubber;
pub mod sweeper;
pub mod system_env;
pub mod verifier;
pub mod worker;

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

pub use command::{Command, CommandError};
pub use error::{RuntimeError, SealError};
pub use hooks::{TracingBootstrap, TracingHooks};
pub use job_queue::{JobRunner, LoggingJobRunner, WorkerJobQueue};
use latchkey_app::Controller;
use latchkey_core::{Collaborators, LifecycleConfig, SecretStore, SubsystemRegistry};
pub use provider::{AeadSelfTest, RustlsRing};
pub use retrieval::{DEFAULT_POLL_INTERVAL, RetrievalConnection};
pub use scheduler::{SchedulePlan, TokioScheduler};
pub use scrubber::HeapScrubber;
pub use sweeper::{DEFAULT_SWEEP_INTERVAL, Sweeper, SweeperKind};
pub use system_env::SystemEnv;
use tracing::info;
pub use verifier::SealedSecret;
pub use worker::PeriodicWorker;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Lifecycle timing and passphrase settings
    pub lifecycle: LifecycleConfig,
    /// Message retrieval poll cadence
    pub poll_interval: Duration,
    /// Expiring-message and view-once sweep cadence
    pub sweep_interval: Duration,
    /// Periodic maintenance cadence
    pub schedule: SchedulePlan,
    /// When this build stops being supported, if ever
    pub build_expires_at: Option<SystemTime>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            schedule: SchedulePlan::default(),
            build_expires_at: None,
        }
    }
}

impl RuntimeConfig {
    /// Reject settings the runtime cannot honor.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Config` for a zero cadence or a zero drain window
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.poll_interval.is_zero() {
            return Err(RuntimeError::Config("poll interval must be non-zero".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(RuntimeError::Config("sweep interval must be non-zero".into()));
        }
        if self.lifecycle.drain_timeout.is_zero() {
            return Err(RuntimeError::Config("drain timeout must be non-zero".into()));
        }
        Ok(())
    }
}

/// Every production collaborator, with typed handles kept for inspection.
#[derive(Debug)]
pub struct Runtime {
    config: RuntimeConfig,
    /// Message retrieval subsystem
    pub retrieval: Arc<RetrievalConnection>,
    /// Expiring-message sweeper subsystem
    pub expiring: Arc<Sweeper>,
    /// View-once sweeper subsystem
    pub view_once: Arc<Sweeper>,
    /// Background job queue
    pub job_queue: Arc<WorkerJobQueue>,
    /// Periodic maintenance scheduler
    pub scheduler: Arc<TokioScheduler>,
    /// Host hooks
    pub hooks: Arc<TracingHooks>,
    /// Memory wiper
    pub scrubber: Arc<HeapScrubber>,
    collaborators: Collaborators,
}

impl Runtime {
    /// Build the collaborators.
    ///
    /// Nothing is started. The standalone binary has no message transport or
    /// message store, so the retrieval poll and the sweeps find nothing.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Config` if `config` fails [`RuntimeConfig::validate`]
    pub fn assemble(
        config: RuntimeConfig,
        verifier: SealedSecret,
        runner: Arc<dyn JobRunner>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;

        let retrieval = Arc::new(RetrievalConnection::new(config.poll_interval, || 0));
        let expiring =
            Arc::new(Sweeper::new(SweeperKind::ExpiringMessages, config.sweep_interval, || 0));
        let view_once = Arc::new(Sweeper::new(SweeperKind::ViewOnce, config.sweep_interval, || 0));
        let job_queue = Arc::new(WorkerJobQueue::new(runner));
        let scheduler = Arc::new(TokioScheduler::new(job_queue.clone(), config.schedule));
        let hooks = Arc::new(TracingHooks::new(config.build_expires_at));
        let scrubber = Arc::new(HeapScrubber::default());

        let subsystems = SubsystemRegistry::new()
            .with(retrieval.clone())
            .with(expiring.clone())
            .with(view_once.clone());

        let collaborators = Collaborators {
            secrets: Arc::new(SecretStore::new()),
            verifier: Arc::new(verifier),
            job_queue: job_queue.clone(),
            subsystems,
            scheduler: scheduler.clone(),
            hooks: hooks.clone(),
            bootstrap: Arc::new(TracingBootstrap),
            wiper: scrubber.clone(),
            providers: vec![Arc::new(AeadSelfTest), Arc::new(RustlsRing)],
        };

        Ok(Self {
            config,
            retrieval,
            expiring,
            view_once,
            job_queue,
            scheduler,
            hooks,
            scrubber,
            collaborators,
        })
    }

    /// Configuration this runtime was assembled with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Install providers and create the controller on the system clock.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Startup` if a required security provider fails
    pub async fn launch(&self) -> Result<Controller<SystemEnv>, RuntimeError> {
        let controller = Controller::launch(
            self.config.lifecycle.clone(),
            self.collaborators.clone(),
            SystemEnv::new(),
        )
        .await?;

        info!(state = %controller.lock_state(), "runtime launched");
        Ok(controller)
    }
}
