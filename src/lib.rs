//! # shedlock
//!
//! Makes sure a scheduled task runs at most once at a time when many
//! instances of the same service run it on the same schedule. Instances do
//! not talk to each other; they race for a lock record in a shared store:
//!
//! - **PostgreSQL**: one conditional upsert per acquisition
//! - **MySQL**: insert, falling back to a conditional update of an expired row
//! - **Redis**: server-side Lua scripts
//! - **File**: JSON records guarded by exclusive file locks (single host)
//!
//! A lock is a lease: it expires after `lock_at_most_for` even if its holder
//! crashed, and stays held for at least `lock_at_least_for` so that a fast
//! task is not picked up again by a host whose clock is slightly behind.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  ┌──────────────┐  ┌────────────────┐  ┌────────────────┐  ┌───────┐ │
//! │  │ CLI/Executor │→ │ Lock providers │→ │ Storage access │→ │ Store │ │
//! │  │              │  │ (keep-alive,   │  │ (insert/update │  │       │ │
//! │  │              │  │  tracking)     │  │  unlock/extend)│  │       │ │
//! │  └──────────────┘  └────────────────┘  └────────────────┘  └───────┘ │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod storage;

use std::sync::Arc;

use tokio::process::Command as ChildCommand;
use tokio::signal;
use tracing::{info, warn};

use crate::cli::{Cli, Command, RunArgs};
use crate::config::AppConfig;
use crate::domain::LockConfiguration;
use crate::error::{ErrorCategory, LockError};
use crate::service::{
    KeepAliveLockProvider, LockProvider, LockingTaskExecutor, StorageBasedLockProvider,
    TaskOutcome,
};
use crate::storage::{create_storage, StorageAccessor};

/// Exit status of a child killed by Ctrl+C or SIGTERM.
const INTERRUPTED: i32 = 130;

/// Run one command line invocation and return the process exit code.
///
/// # Errors
///
/// Returns an error if:
/// - Configuration cannot be loaded
/// - Storage backend fails to initialize
/// - Lock acquisition fails with a storage fault (the command is not run)
pub async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = AppConfig::load()?;

    init_logging(&config);
    service::metrics::register_metrics();

    let holder = config.lock.resolve_holder()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        holder = %holder,
        backend = %config.storage.backend,
        "Starting shedlock"
    );

    let storage = create_storage(&config.storage, holder).await?;

    match cli.command {
        Command::Run(args) => run_locked(&config, storage, args).await,
        Command::Status(args) => {
            match storage
                .find_record(&args.name)
                .await
                .map_err(LockError::from)?
            {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => println!("no record for lock '{}'", args.name),
            }
            Ok(0)
        }
        Command::InitSchema => {
            storage.ensure_schema().await.map_err(LockError::from)?;
            info!(backend = storage.backend_name(), "Lock schema ready");
            Ok(0)
        }
    }
}

/// Map an error returned by [`run`] to a process exit code.
#[must_use]
pub fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(e) = err.downcast_ref::<LockError>() {
        e.exit_code()
    } else if err.downcast_ref::<::config::ConfigError>().is_some() {
        ErrorCategory::Configuration.exit_code()
    } else {
        ErrorCategory::Unknown.exit_code()
    }
}

async fn run_locked(
    config: &AppConfig,
    storage: Arc<dyn StorageAccessor>,
    args: RunArgs,
) -> anyhow::Result<i32> {
    let lock_config = LockConfiguration::new(
        args.name,
        args.lock_at_most_for
            .unwrap_or(config.lock.default_lock_at_most_for),
        args.lock_at_least_for
            .unwrap_or(config.lock.default_lock_at_least_for),
    )?;

    let mut provider: Arc<dyn LockProvider> = Arc::new(StorageBasedLockProvider::new(storage));
    if args.keep_alive {
        provider = Arc::new(KeepAliveLockProvider::with_min_lock_at_most_for(
            provider,
            config.lock.keep_alive_min_lock_at_most_for,
        ));
    }

    let executor = LockingTaskExecutor::new(provider);
    match executor
        .execute_with_lock(&lock_config, run_child(&args.command))
        .await?
    {
        TaskOutcome::Executed(status) => {
            let status = status?;
            info!(lock = lock_config.name(), status, "Command finished");
            Ok(status)
        }
        TaskOutcome::Skipped => {
            info!(lock = lock_config.name(), "Lock is held elsewhere, skipping");
            Ok(0)
        }
    }
}

/// Run the child process, killing it on shutdown.
async fn run_child(command: &[String]) -> anyhow::Result<i32> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| LockError::Internal("no command given".to_string()))?;

    let mut child = ChildCommand::new(program).args(args).spawn()?;

    tokio::select! {
        status = child.wait() => Ok(status?.code().unwrap_or(1)),
        () = shutdown_signal() => {
            child.kill().await?;
            Ok(INTERRUPTED)
        }
    }
}

/// Initialize logging based on configuration.
fn init_logging(config: &AppConfig) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    // stdout belongs to the child command and `status`
    let subscriber = tracing_subscriber::registry().with(filter);

    if config.observability.log_format == "json" {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            warn!("Received Ctrl+C, stopping command");
        }
        () = terminate => {
            warn!("Received SIGTERM, stopping command");
        }
    }
}
