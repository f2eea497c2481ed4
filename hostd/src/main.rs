//! Zoneweaver host daemon
//!
//! The control plane for an illumos host: an HTTP API that turns
//! administrator intent into durable tasks, and a scheduler that executes
//! those tasks through privileged shell commands with priority ordering,
//! dependency gating, a concurrency cap and per-subsystem mutual exclusion.

// Use jemalloc as the global allocator for better performance
#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

mod api;
mod config;
mod database;
mod executor;
mod orchestrator;
mod rebootflag;
mod scheduler;
mod task_artifact;
mod task_network;
mod task_pkg;
mod task_service;
mod task_system;
mod task_user;
mod task_zone;
mod tasks;

#[cfg(test)]
mod tests;

use api::AppState;
use config::ConfigManager;
use database::TaskDatabase;
use executor::CommandExecutor;
use orchestrator::OrchestrationState;
use rebootflag::RebootFlag;
use scheduler::{SchedulerConfig, TaskScheduler};

/// Command-line arguments for the daemon
#[derive(Parser, Debug)]
#[command(name = "hostd")]
#[command(about = "Host management daemon for zones, networking, storage and system control", long_about = None)]
struct CliArgs {
    /// Path to the configuration directory containing hostd.toml
    #[arg(value_name = "CONFIG_DIR")]
    config_dir: PathBuf,

    /// Override the API bind address from the config file
    #[arg(long = "bind-address", value_name = "ADDR")]
    bind_address: Option<String>,

    /// Override the data directory from the config file
    #[arg(long = "data-dir", value_name = "DIR")]
    data_dir: Option<String>,

    /// Override the maximum number of concurrent tasks
    #[arg(long = "max-concurrent-tasks", value_name = "N")]
    max_concurrent_tasks: Option<usize>,

    /// Disable pfexec privilege escalation (for development hosts)
    #[arg(long = "no-pfexec")]
    no_pfexec: bool,
}

/// The assembled daemon: configuration, storage, scheduler and API glued
/// together with a shared shutdown signal.
struct Hostd {
    config: shared::HostdConfig,
    database: Arc<Mutex<TaskDatabase>>,
    scheduler: Option<TaskScheduler>,
    app_state: AppState,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl Hostd {
    /// Load configuration, open the task store, reconcile restart state and
    /// construct the scheduler and API state.
    async fn new(cli_args: CliArgs) -> Result<Self> {
        let mut config_manager = ConfigManager::new(&cli_args.config_dir)?;
        let mut config = config_manager.load_config()?.clone();

        // CLI overrides win over the file.
        if let Some(bind_address) = cli_args.bind_address {
            config.server.bind_address = bind_address;
        }
        if let Some(data_dir) = cli_args.data_dir {
            config.server.data_dir = data_dir;
        }
        if let Some(max) = cli_args.max_concurrent_tasks {
            config.zones.max_concurrent_tasks = max;
        }
        if cli_args.no_pfexec {
            config.executor.use_pfexec = false;
        }
        config.validate()?;

        info!(
            bind_address = %config.server.bind_address,
            data_dir = %config.server.data_dir,
            max_concurrent = config.zones.max_concurrent_tasks,
            auto_discovery = config.zones.auto_discovery,
            "Daemon configuration loaded"
        );

        let database = Arc::new(Mutex::new(TaskDatabase::new(
            &config.server.data_dir,
            config.server.database_busy_timeout_seconds,
        )?));
        {
            let mut db = database.lock().await;
            db.initialize().await?;
        }

        let executor = CommandExecutor::new(
            config.executor.default_timeout_ms,
            config.logging.performance_threshold_ms,
            config.executor.use_pfexec,
        );

        let reboot_flag = RebootFlag::new(&config.reboot_flag_path);
        clear_stale_reboot_flag(&reboot_flag, &executor).await;

        let orchestration = Arc::new(OrchestrationState::new(config.orchestration.clone()));

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        let scheduler = TaskScheduler::new(
            SchedulerConfig::from_config(&config),
            database.clone(),
            executor.clone(),
            reboot_flag.clone(),
            orchestration.clone(),
            shutdown_tx.subscribe(),
        )?;

        let app_state = AppState {
            database: database.clone(),
            running_tasks: scheduler.running_tasks_handle(),
            orchestration,
            executor,
            reboot_flag,
            default_pagination_limit: config.zones.default_pagination_limit,
        };

        Ok(Self {
            config,
            database,
            scheduler: Some(scheduler),
            app_state,
            shutdown_tx,
        })
    }

    /// Run the scheduler and the HTTP server until interrupted.
    async fn run(&mut self) -> Result<()> {
        let mut scheduler = self
            .scheduler
            .take()
            .context("Daemon not properly initialized - scheduler missing")?;
        scheduler.start().await?;

        let scheduler_handle = tokio::spawn(async move {
            if let Err(e) = scheduler.run().await {
                error!(error = %e, "Scheduler exited with error");
            }
        });

        let router = api::create_router(self.app_state.clone());
        let listener = tokio::net::TcpListener::bind(&self.config.server.bind_address)
            .await
            .with_context(|| format!("Failed to bind {}", self.config.server.bind_address))?;
        info!(address = %self.config.server.bind_address, "API listening");

        let shutdown_tx = self.shutdown_tx.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                wait_for_shutdown_signal().await;
                // Propagate to the scheduler; it drains in-flight work.
                let _ = shutdown_tx.send(());
            })
            .await
            .context("API server failed")?;

        info!("API server stopped, waiting for scheduler");
        if let Err(e) = scheduler_handle.await {
            warn!(error = %e, "Scheduler task join failed");
        }

        // Leave the store in a consistent state on disk.
        {
            let mut db = self.database.lock().await;
            if let Err(e) = db.checkpoint_wal().await {
                debug!(error = %e, "Final WAL checkpoint failed");
            }
        }

        Ok(())
    }
}

/// A pending reboot recorded before the last kernel boot already happened;
/// compare the flag against the boot instant and clear a stale one. Boot
/// time comes from kstat, and a host where that fails (non-illumos dev
/// machine) just keeps the flag.
async fn clear_stale_reboot_flag(reboot_flag: &RebootFlag, executor: &CommandExecutor) {
    let result = executor
        .execute("kstat -p unix:0:system_misc:boot_time")
        .await;
    if !result.ok {
        debug!("Could not read kernel boot time, skipping reboot flag check");
        return;
    }
    let Some(boot_time) = rebootflag::parse_boot_time(&result.stdout) else {
        debug!(output = %result.stdout, "Unparseable kernel boot time");
        return;
    };
    match reboot_flag.check_and_clear_after_reboot(boot_time) {
        Ok(true) => info!("Cleared reboot-required flag after kernel boot"),
        Ok(false) => {}
        Err(e) => warn!(error = %e, "Failed to reconcile reboot flag"),
    }
}

/// Resolves when the process receives SIGINT or SIGTERM.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install SIGINT handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received"),
        _ = terminate => info!("SIGTERM received"),
    }
}

/// Configure tracing before anything else runs. Returns the appender guard
/// that must stay alive for the life of the process.
fn init_tracing(log_directory: Option<&str>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("hostd=info,shared=info"));

    match log_directory {
        Some(directory) => {
            let file_appender = tracing_appender::rolling::daily(directory, "hostd.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(non_blocking)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    // Peek at the config for the log directory before full initialization;
    // tracing must be up before anything logs.
    let log_directory = ConfigManager::new(&cli_args.config_dir)
        .and_then(|mut manager| manager.load_config().map(|c| c.logging.directory.clone()))
        .unwrap_or(None);
    let _guard = init_tracing(log_directory.as_deref());

    info!("Zoneweaver host daemon starting up");
    info!(config_dir = %cli_args.config_dir.display(), "Configuration directory");

    let mut hostd = match Hostd::new(cli_args).await {
        Ok(hostd) => hostd,
        Err(e) => {
            error!("FATAL: failed to initialize daemon");
            error!("Error: {}", e);
            let mut source = e.source();
            while let Some(err) = source {
                error!("  Caused by: {}", err);
                source = err.source();
            }
            std::process::exit(1);
        }
    };

    hostd.run().await?;
    info!("Daemon shutdown complete");
    Ok(())
}
