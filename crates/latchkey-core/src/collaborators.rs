//! Interfaces of the collaborators the lifecycle drives.
//!
//! Storage encryption, the job engine, message retrieval, and the host's
//! scheduler are all outside the lifecycle. It only needs the narrow
//! interfaces below. [`Collaborators`] bundles one implementation of each into
//! an explicitly constructed context, so every controller (and every test)
//! owns its own set instead of sharing process-wide singletons.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    action::InitStep,
    error::{ProviderError, SubsystemError, UnlockError},
    secret::{MasterSecret, Passphrase, SecretStore},
    subsystem::SubsystemRegistry,
};

/// Work items the lifecycle enqueues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    /// Fetch stale profiles.
    RoutineProfileRefresh,
    /// Routine group maintenance (migrations, member refresh).
    RoutineGroupMaintenance,
    /// Push a full contact sync to linked devices.
    ContactSync,
    /// Rotate the signed pre-key if it is due.
    SignedPreKeyRotation,
    /// Refresh the contact directory.
    DirectoryRefresh,
    /// Write a local backup.
    LocalBackup,
    /// Rotate the sender certificate.
    SenderCertificateRotation,
}

/// Periodic maintenance registered with the host scheduler on unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeriodicTask {
    /// Signed pre-key rotation check.
    SignedPreKeyRotation,
    /// Directory refresh.
    DirectoryRefresh,
    /// Local backup scheduling.
    LocalBackup,
    /// Sender certificate rotation.
    SenderCertificateRotation,
}

impl PeriodicTask {
    /// Every periodic task, in registration order.
    pub const ALL: [Self; 4] = [
        Self::SignedPreKeyRotation,
        Self::DirectoryRefresh,
        Self::LocalBackup,
        Self::SenderCertificateRotation,
    ];

    /// Job enqueued each time the task fires.
    pub fn job(self) -> Job {
        match self {
            Self::SignedPreKeyRotation => Job::SignedPreKeyRotation,
            Self::DirectoryRefresh => Job::DirectoryRefresh,
            Self::LocalBackup => Job::LocalBackup,
            Self::SenderCertificateRotation => Job::SenderCertificateRotation,
        }
    }
}

/// Why a lock was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockReason {
    /// Inactivity timeout elapsed.
    Timeout,
    /// User locked explicitly.
    UserRequested,
    /// Device screen turned off.
    ScreenOff,
    /// Process is being torn down.
    Teardown,
}

impl fmt::Display for LockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("timeout"),
            Self::UserRequested => f.write_str("user-requested"),
            Self::ScreenOff => f.write_str("screen-off"),
            Self::Teardown => f.write_str("teardown"),
        }
    }
}

/// Result of a bounded job queue shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// All queued work finished within the window.
    Drained,
    /// Window elapsed and the queue was stopped with work outstanding.
    Forced {
        /// Jobs that had not completed
        pending: usize,
    },
    /// Queue did not return from shutdown within the window. Its worker
    /// state is unknown and it is no longer awaited.
    Abandoned,
}

/// Background job queue.
///
/// Jobs enqueued before [`JobQueue::begin_loop`] are buffered, not lost.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job.
    fn enqueue(&self, job: Job);

    /// Start processing. Idempotent while running.
    fn begin_loop(&self) -> Result<(), SubsystemError>;

    /// Stop processing, letting queued work drain for at most `timeout`.
    ///
    /// Must return within `timeout` (plus scheduling slack) and must stop
    /// the loop on every path.
    async fn shutdown(&self, timeout: Duration) -> DrainOutcome;
}

/// Decrypts the master secret.
#[async_trait]
pub trait PassphraseVerifier: Send + Sync {
    /// Verify a passphrase and return the decrypted master secret.
    ///
    /// # Errors
    ///
    /// - `UnlockError::InvalidPassphrase` if the passphrase is wrong
    /// - `UnlockError::UnrecoverableKey` if the key material is unusable
    async fn verify(&self, passphrase: &Passphrase) -> Result<MasterSecret, UnlockError>;
}

/// Host-level periodic scheduler. Registration is fire-and-forget.
pub trait Scheduler: Send + Sync {
    /// Register `task`. Registering an already scheduled task replaces it.
    fn schedule(&self, task: PeriodicTask);
}

/// Application callbacks for visibility and lock transitions.
pub trait AppHooks: Send + Sync {
    /// Refresh remote feature configuration if stale.
    fn refresh_remote_config(&self);

    /// Warm read caches (recipients, conversation list).
    fn warm_caches(&self);

    /// Begin tracking UI-visible state (notification suppression for the
    /// open conversation).
    fn begin_visible_tracking(&self);

    /// Stop tracking UI-visible state.
    fn end_visible_tracking(&self);

    /// Mark the client deprecated if this build has expired.
    fn check_build_expiry(&self);

    /// Stop any active call or streaming session.
    fn stop_call_session(&self);
}

/// One-time initialization run on the first successful unlock.
pub trait Bootstrap: Send + Sync {
    /// Run `step`. Must tolerate re-entry after a previous partial failure.
    fn run(&self, step: InitStep) -> Result<(), SubsystemError>;
}

/// Process-wide secure memory wipe.
pub trait MemoryWiper: Send + Sync {
    /// Best-effort wipe. May be a no-op; must never fail.
    fn request_wipe(&self, blocking: bool);
}

/// Cryptographic provider installed at application startup.
pub trait SecurityProvider: Send + Sync {
    /// Provider name for logs and errors.
    fn name(&self) -> &'static str;

    /// Whether startup must abort if installation fails.
    fn required(&self) -> bool;

    /// Install the provider.
    fn install(&self) -> Result<(), ProviderError>;
}

/// Everything the controller drives, explicitly owned.
#[derive(Clone)]
pub struct Collaborators {
    /// Resident master secret
    pub secrets: Arc<SecretStore>,
    /// Passphrase verification
    pub verifier: Arc<dyn PassphraseVerifier>,
    /// Background job queue
    pub job_queue: Arc<dyn JobQueue>,
    /// Subsystems started on unlock, in start order
    pub subsystems: SubsystemRegistry,
    /// Periodic task scheduler
    pub scheduler: Arc<dyn Scheduler>,
    /// Application callbacks
    pub hooks: Arc<dyn AppHooks>,
    /// First-unlock initialization
    pub bootstrap: Arc<dyn Bootstrap>,
    /// Process-wide memory wipe
    pub wiper: Arc<dyn MemoryWiper>,
    /// Security providers, installed in order at launch
    pub providers: Vec<Arc<dyn SecurityProvider>>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("secrets", &self.secrets)
            .field("subsystems", &self.subsystems)
            .field("providers", &self.providers.iter().map(|p| p.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
