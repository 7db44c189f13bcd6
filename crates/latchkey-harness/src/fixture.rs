//! Ready-made collaborator set for controller tests.

use std::sync::Arc;

use latchkey_app::Controller;
use latchkey_core::{
    Collaborators, LifecycleConfig, SecretStore, SecurityProvider, StartupError, Subsystem,
    SubsystemRegistry,
};

use crate::{
    CallLog, FakeBootstrap, FakeHooks, FakeJobQueue, FakeProvider, FakeScheduler, FakeSubsystem,
    FakeVerifier, FakeWiper, SimEnv,
};

/// Registered name of the message retrieval fake.
pub const RETRIEVAL: &str = "retrieval";
/// Registered name of the expiring-message sweeper fake.
pub const EXPIRING_SWEEPER: &str = "expiring-sweeper";
/// Registered name of the view-once sweeper fake.
pub const VIEW_ONCE_SWEEPER: &str = "view-once-sweeper";

/// Every fake collaborator, sharing one [`CallLog`].
///
/// Subsystems are registered as retrieval, expiring sweeper, view-once
/// sweeper, matching the production order.
#[derive(Debug)]
pub struct Fixture {
    /// Shared call log
    pub log: CallLog,
    /// Secret store handed to the controller
    pub secrets: Arc<SecretStore>,
    /// Passphrase verifier
    pub verifier: Arc<FakeVerifier>,
    /// Job queue
    pub job_queue: Arc<FakeJobQueue>,
    /// Message retrieval connection
    pub retrieval: Arc<FakeSubsystem>,
    /// Expiring-message sweeper
    pub expiring: Arc<FakeSubsystem>,
    /// View-once sweeper
    pub view_once: Arc<FakeSubsystem>,
    /// Periodic scheduler
    pub scheduler: Arc<FakeScheduler>,
    /// Application hooks
    pub hooks: Arc<FakeHooks>,
    /// First-unlock bootstrap
    pub bootstrap: Arc<FakeBootstrap>,
    /// Memory wiper
    pub wiper: Arc<FakeWiper>,
    /// Security providers, installed in order
    pub providers: Vec<Arc<FakeProvider>>,
}

impl Fixture {
    /// Create a fixture with no security providers.
    pub fn new() -> Self {
        let log = CallLog::new();
        Self {
            secrets: Arc::new(SecretStore::new()),
            verifier: Arc::new(FakeVerifier::new(log.clone())),
            job_queue: Arc::new(FakeJobQueue::new(log.clone())),
            retrieval: Arc::new(FakeSubsystem::new(RETRIEVAL, log.clone())),
            expiring: Arc::new(FakeSubsystem::new(EXPIRING_SWEEPER, log.clone())),
            view_once: Arc::new(FakeSubsystem::new(VIEW_ONCE_SWEEPER, log.clone())),
            scheduler: Arc::new(FakeScheduler::new(log.clone())),
            hooks: Arc::new(FakeHooks::new(log.clone())),
            bootstrap: Arc::new(FakeBootstrap::new(log.clone())),
            wiper: Arc::new(FakeWiper::new(log.clone())),
            providers: Vec::new(),
            log,
        }
    }

    /// Append a security provider.
    #[must_use]
    pub fn with_provider(mut self, provider: FakeProvider) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Subsystem fakes in start order.
    pub fn subsystems(&self) -> [&Arc<FakeSubsystem>; 3] {
        [&self.retrieval, &self.expiring, &self.view_once]
    }

    /// Collaborator context wired to the fakes.
    pub fn collaborators(&self) -> Collaborators {
        let subsystems = self
            .subsystems()
            .into_iter()
            .fold(SubsystemRegistry::new(), |registry, s| {
                registry.with(Arc::clone(s) as Arc<dyn Subsystem>)
            });

        Collaborators {
            secrets: Arc::clone(&self.secrets),
            verifier: self.verifier.clone(),
            job_queue: self.job_queue.clone(),
            subsystems,
            scheduler: self.scheduler.clone(),
            hooks: self.hooks.clone(),
            bootstrap: self.bootstrap.clone(),
            wiper: self.wiper.clone(),
            providers: self
                .providers
                .iter()
                .map(|p| Arc::clone(p) as Arc<dyn SecurityProvider>)
                .collect(),
        }
    }

    /// Launch a controller over the fakes with `config`.
    pub async fn launch_with(
        &self,
        config: LifecycleConfig,
    ) -> Result<Controller<SimEnv>, StartupError> {
        Controller::launch(config, self.collaborators(), SimEnv::new()).await
    }

    /// Launch a controller over the fakes with the default configuration.
    pub async fn launch(&self) -> Result<Controller<SimEnv>, StartupError> {
        self.launch_with(LifecycleConfig::default()).await
    }

    /// Number of subsystems currently running.
    pub fn running_subsystems(&self) -> usize {
        self.subsystems().iter().filter(|s| s.is_running()).count()
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}
