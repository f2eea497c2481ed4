//! Task dispatch for the host control plane
//!
//! The scheduler decides *when* a task runs; this module decides *what*
//! runs. [`TaskRunner::run_task`] parses the task's operation tag, routes to
//! the matching handler, converts every possible failure (bad metadata,
//! command errors, panics) into a [`HandlerOutcome`], and reports the result
//! back to the scheduler over a channel.
//!
//! Handlers never cross the dispatch boundary with an error: they return
//! outcome values. The only thing the scheduler learns about a handler is
//! whether it succeeded, what it wants to say about it, and how long it took.

use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use shared::tasks::{Operation, Task};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

use crate::database::TaskDatabase;
use crate::executor::CommandExecutor;
use crate::orchestrator::OrchestrationState;
use crate::rebootflag::RebootFlag;

/// Structured result every handler returns.
#[derive(Debug, Clone)]
pub struct HandlerOutcome {
    pub ok: bool,
    /// Human-readable summary on success.
    pub message: Option<String>,
    /// Failure description; becomes the task's `error_message`.
    pub error: Option<String>,
    /// Optional structured payload (e.g. discovered zone inventory).
    pub details: Option<serde_json::Value>,
}

impl HandlerOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: Some(message.into()),
            error: None,
            details: None,
        }
    }

    pub fn success_with(message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            ok: true,
            message: Some(message.into()),
            error: None,
            details: Some(details),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: None,
            error: Some(error.into()),
            details: None,
        }
    }
}

/// Completion report sent from a finished handler back to the scheduler.
#[derive(Debug)]
pub struct TaskCompletion {
    pub task_id: i64,
    pub operation: String,
    pub outcome: HandlerOutcome,
    pub duration_ms: f64,
}

/// Handler-facing view of a running task plus the shared daemon resources.
///
/// Everything a handler may need goes through here: the command executor,
/// best-effort progress reporting, the reboot flag and the orchestration
/// runtime state.
#[derive(Clone)]
pub struct TaskContext {
    task_id: i64,
    zone_name: Option<String>,
    database: Arc<Mutex<TaskDatabase>>,
    executor: CommandExecutor,
    reboot_flag: RebootFlag,
    http_client: reqwest::Client,
    orchestration: Arc<OrchestrationState>,
}

impl TaskContext {
    /// Target zone of the task, when it has one.
    pub fn zone_name(&self) -> Option<&str> {
        self.zone_name.as_deref()
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    pub fn reboot_flag(&self) -> &RebootFlag {
        &self.reboot_flag
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    pub fn orchestration(&self) -> &Arc<OrchestrationState> {
        &self.orchestration
    }

    /// Persist progress for this task. Best-effort: a failed write is
    /// logged at debug level and the handler carries on.
    pub async fn update_progress(&self, percent: f64, info: Option<serde_json::Value>) {
        let info_text = info.map(|v| v.to_string());
        let mut db = self.database.lock().await;
        if let Err(e) = db
            .update_task_progress(self.task_id, percent, info_text.as_deref())
            .await
        {
            debug!(
                task_id = self.task_id,
                error = %e,
                "Progress update failed, continuing"
            );
        }
    }
}

/// Deserialize handler parameters out of the task's metadata blob.
///
/// Parsing happens here, inside the spawned handler activity, so a large
/// payload never stalls the scheduler driver. A missing blob parses like an
/// empty object so handlers whose params are all optional keep working.
pub fn require_params<T: DeserializeOwned>(metadata: Option<&str>) -> Result<T, HandlerOutcome> {
    let raw = metadata.unwrap_or("{}");
    serde_json::from_str(raw)
        .map_err(|e| HandlerOutcome::failure(format!("Invalid task metadata: {}", e)))
}

/// Routes tasks to handlers and reports completions.
///
/// Cheap to clone; the scheduler clones it into every spawned handler
/// activity.
#[derive(Clone)]
pub struct TaskRunner {
    completion_sender: mpsc::Sender<TaskCompletion>,
    database: Arc<Mutex<TaskDatabase>>,
    executor: CommandExecutor,
    reboot_flag: RebootFlag,
    http_client: reqwest::Client,
    orchestration: Arc<OrchestrationState>,
}

impl TaskRunner {
    pub fn new(
        completion_sender: mpsc::Sender<TaskCompletion>,
        database: Arc<Mutex<TaskDatabase>>,
        executor: CommandExecutor,
        reboot_flag: RebootFlag,
        orchestration: Arc<OrchestrationState>,
    ) -> anyhow::Result<Self> {
        // One shared HTTP client for artifact downloads; connection pools
        // are per-client.
        let http_client = reqwest::Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            completion_sender,
            database,
            executor,
            reboot_flag,
            http_client,
            orchestration,
        })
    }

    /// Execute one task to completion and report the outcome.
    ///
    /// This is the body of the spawned handler activity. It never returns an
    /// error and never panics outward; the completion channel always gets a
    /// report unless the channel itself is gone (daemon shutdown).
    pub async fn run_task(&self, task: Task) {
        let start = Instant::now();
        debug!(
            task_id = task.id,
            operation = %task.operation,
            zone = %task.zone_label(),
            "Dispatching task"
        );

        let ctx = TaskContext {
            task_id: task.id,
            zone_name: task.zone_name.clone(),
            database: self.database.clone(),
            executor: self.executor.clone(),
            reboot_flag: self.reboot_flag.clone(),
            http_client: self.http_client.clone(),
            orchestration: self.orchestration.clone(),
        };

        let outcome = match Operation::parse(&task.operation) {
            Some(op) => {
                let metadata = task.metadata.as_deref();
                // A panicking handler must not take the scheduler's
                // bookkeeping down with it; convert the panic to a failure.
                match AssertUnwindSafe(dispatch(op, metadata, &ctx))
                    .catch_unwind()
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        error!(
                            task_id = task.id,
                            operation = %task.operation,
                            "Handler panicked"
                        );
                        HandlerOutcome::failure(format!(
                            "Handler for '{}' panicked",
                            task.operation
                        ))
                    }
                }
            }
            None => HandlerOutcome::failure(format!("Unknown operation: {}", task.operation)),
        };

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        let completion = TaskCompletion {
            task_id: task.id,
            operation: task.operation.clone(),
            outcome,
            duration_ms,
        };

        if let Err(e) = self.completion_sender.send(completion).await {
            warn!(
                task_id = task.id,
                error = %e,
                "Failed to report task completion; scheduler is gone"
            );
        }
    }
}

/// The handler registry. Closed at build time: adding an operation means
/// adding a variant to [`Operation`] and an arm here, and the compiler
/// will not let one happen without the other.
async fn dispatch(op: Operation, metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    use Operation::*;
    match op {
        // Zone lifecycle
        Discover => crate::task_zone::discover(metadata, ctx).await,
        Start => crate::task_zone::start(metadata, ctx).await,
        Stop => crate::task_zone::stop(metadata, ctx).await,
        Restart => crate::task_zone::restart(metadata, ctx).await,
        ZoneDelete => crate::task_zone::zone_delete(metadata, ctx).await,
        // Datalink management
        CreateVnic => crate::task_network::create_vnic(metadata, ctx).await,
        DeleteVnic => crate::task_network::delete_vnic(metadata, ctx).await,
        CreateAggregate => crate::task_network::create_aggregate(metadata, ctx).await,
        DeleteAggregate => crate::task_network::delete_aggregate(metadata, ctx).await,
        ModifyAggregateLinks => crate::task_network::modify_aggregate_links(metadata, ctx).await,
        CreateEtherstub => crate::task_network::create_etherstub(metadata, ctx).await,
        DeleteEtherstub => crate::task_network::delete_etherstub(metadata, ctx).await,
        // IP management
        CreateIpAddress => crate::task_network::create_ip_address(metadata, ctx).await,
        DeleteIpAddress => crate::task_network::delete_ip_address(metadata, ctx).await,
        EnableRouting => crate::task_network::enable_routing(metadata, ctx).await,
        DisableRouting => crate::task_network::disable_routing(metadata, ctx).await,
        // Packaging and boot environments
        PkgInstall => crate::task_pkg::pkg_install(metadata, ctx).await,
        PkgUninstall => crate::task_pkg::pkg_uninstall(metadata, ctx).await,
        PkgUpdate => crate::task_pkg::pkg_update(metadata, ctx).await,
        PkgRefresh => crate::task_pkg::pkg_refresh(metadata, ctx).await,
        BeadmCreate => crate::task_pkg::beadm_create(metadata, ctx).await,
        BeadmActivate => crate::task_pkg::beadm_activate(metadata, ctx).await,
        BeadmDelete => crate::task_pkg::beadm_delete(metadata, ctx).await,
        RepositoryAdd => crate::task_pkg::repository_add(metadata, ctx).await,
        RepositoryRemove => crate::task_pkg::repository_remove(metadata, ctx).await,
        // Accounts
        UserCreate => crate::task_user::user_create(metadata, ctx).await,
        UserModify => crate::task_user::user_modify(metadata, ctx).await,
        UserDelete => crate::task_user::user_delete(metadata, ctx).await,
        GroupCreate => crate::task_user::group_create(metadata, ctx).await,
        GroupDelete => crate::task_user::group_delete(metadata, ctx).await,
        RoleCreate => crate::task_user::role_create(metadata, ctx).await,
        RoleDelete => crate::task_user::role_delete(metadata, ctx).await,
        // SMF services
        ServiceEnable => crate::task_service::service_enable(metadata, ctx).await,
        ServiceDisable => crate::task_service::service_disable(metadata, ctx).await,
        ServiceRestart => crate::task_service::service_restart(metadata, ctx).await,
        ServiceRefresh => crate::task_service::service_refresh(metadata, ctx).await,
        // Host-level system control
        SetHostname => crate::task_system::set_hostname(metadata, ctx).await,
        SetZfsArcParams => crate::task_system::set_zfs_arc_params(metadata, ctx).await,
        SystemHostShutdown => crate::task_system::host_shutdown(metadata, ctx).await,
        SystemHostReboot => crate::task_system::host_reboot(metadata, ctx).await,
        SystemHostPoweroff => crate::task_system::host_poweroff(metadata, ctx).await,
        // Artifact management
        ArtifactDownloadUrl => crate::task_artifact::download_url(metadata, ctx).await,
        ArtifactDelete => crate::task_artifact::delete(metadata, ctx).await,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Construction helpers for handler and scheduler tests.

    use super::*;

    /// Build a context bound to an existing task row in a scratch database.
    pub fn context_for(
        task_id: i64,
        zone_name: Option<&str>,
        database: Arc<Mutex<TaskDatabase>>,
        executor: CommandExecutor,
        reboot_flag: RebootFlag,
        orchestration: Arc<OrchestrationState>,
    ) -> TaskContext {
        TaskContext {
            task_id,
            zone_name: zone_name.map(str::to_string),
            database,
            executor,
            reboot_flag,
            http_client: reqwest::Client::new(),
            orchestration,
        }
    }
}
