//! Latchkey lifecycle binary.
//!
//! Drives the lock/unlock lifecycle from line commands on stdin.
//!
//! # Usage
//!
//! ```bash
//! # Passphrase-protected, 1s grace, 10s drain window
//! latchkey --passphrase "correct horse battery staple"
//!
//! # Unlock at launch with the default passphrase
//! latchkey --no-passphrase-lock --log-level debug
//! ```
//!
//! Commands: `unlock <passphrase>`, `lock`, `fg`, `bg`, `status`, `quit`.
//! Ctrl-C and end of input terminate like `quit`.

use std::{sync::Arc, time::Duration};

use clap::Parser;
use latchkey_app::{Controller, UnlockOutcome};
use latchkey_core::{DEFAULT_PASSPHRASE, LifecycleConfig, LockReason, Passphrase};
use latchkey_runtime::{
    Command, LoggingJobRunner, Runtime, RuntimeConfig, SchedulePlan, SealedSecret, SystemEnv,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Latchkey lifecycle controller
#[derive(Parser, Debug)]
#[command(name = "latchkey")]
#[command(about = "Lock/unlock lifecycle controller for an encrypted messaging client")]
#[command(version)]
struct Args {
    /// Delay between a lock and the job queue drain, in milliseconds
    #[arg(long, default_value = "1000")]
    grace_ms: u64,

    /// Bounded job queue drain window, in milliseconds
    #[arg(long, default_value = "10000")]
    drain_timeout_ms: u64,

    /// Unlock at launch with the default passphrase
    #[arg(long)]
    no_passphrase_lock: bool,

    /// Passphrase the master secret is sealed under
    #[arg(long)]
    passphrase: Option<String>,

    /// Message retrieval poll cadence, in milliseconds
    #[arg(long, default_value = "30000")]
    poll_interval_ms: u64,

    /// Expiring-message and view-once sweep cadence, in milliseconds
    #[arg(long, default_value = "5000")]
    sweep_interval_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn config(&self) -> RuntimeConfig {
        RuntimeConfig {
            lifecycle: LifecycleConfig {
                grace_delay: Duration::from_millis(self.grace_ms),
                drain_timeout: Duration::from_millis(self.drain_timeout_ms),
                passphrase_lock: !self.no_passphrase_lock,
                ..LifecycleConfig::default()
            },
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
            schedule: SchedulePlan::default(),
            build_expires_at: None,
        }
    }

    /// Passphrase the master secret is provisioned under. Without the
    /// passphrase lock it must be the default one.
    fn sealing_passphrase(&self) -> Passphrase {
        match (&self.passphrase, self.no_passphrase_lock) {
            (Some(passphrase), false) => Passphrase::from(passphrase.as_str()),
            _ => Passphrase::from(DEFAULT_PASSPHRASE),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Latchkey starting");

    if args.passphrase.is_none() && !args.no_passphrase_lock {
        tracing::warn!("No passphrase given - sealing under the default passphrase");
    }

    let sealed = SealedSecret::generate(&args.sealing_passphrase())?;
    let runtime = Runtime::assemble(args.config(), sealed, Arc::new(LoggingJobRunner))?;
    let controller = runtime.launch().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            },
        };
        let Some(line) = line else {
            break;
        };

        match line.parse::<Command>() {
            Ok(Command::Quit) => break,
            Ok(command) => run(&controller, &runtime, command).await,
            Err(e) => tracing::warn!("{e}"),
        }
    }

    controller.terminate().await;
    tracing::info!("Latchkey stopped");

    Ok(())
}

async fn run(controller: &Controller<SystemEnv>, runtime: &Runtime, command: Command) {
    match command {
        Command::Unlock(passphrase) => match controller.unlock(passphrase).await {
            Ok(UnlockOutcome::Unlocked) => tracing::info!("Unlocked"),
            Ok(UnlockOutcome::AlreadyUnlocked) => tracing::info!("Already unlocked"),
            Err(e) => tracing::warn!(retryable = e.is_retryable(), "Unlock failed: {e}"),
        },
        Command::Lock => controller.lock(LockReason::UserRequested).await,
        Command::Foreground => controller.on_foreground(),
        Command::Background => controller.on_background(),
        Command::Status => tracing::info!(
            state = %controller.lock_state(),
            visibility = %controller.visibility(),
            initialized = controller.is_initialized(),
            secret_available = controller.secret_store().is_available(),
            secret_resident = controller.secret_store().is_present(),
            passphrase_lock = controller.passphrase_lock_enabled(),
            pending_jobs = runtime.job_queue.pending(),
            deprecated = runtime.hooks.is_deprecated(),
            "Status"
        ),
        Command::Quit => {},
    }
}
