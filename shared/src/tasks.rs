//! Task model for the host control plane
//!
//! Every mutating operation on the host flows through a durable task record.
//! This module defines the record itself, its lifecycle states, the closed set
//! of operations the daemon knows how to execute, and the mutual-exclusion
//! categories that serialise operations touching the same subsystem.

use serde::{Deserialize, Serialize};

/// Priority bands for task scheduling. Higher values run first.
///
/// These are conventions, not hard limits: callers may submit any integer
/// priority, but the daemon itself only enqueues work in these bands.
pub mod priority {
    /// Periodic housekeeping (discovery, cleanup).
    pub const BACKGROUND: i32 = 10;
    /// Default for operator-submitted work.
    pub const NORMAL: i32 = 50;
    /// Operations other work is waiting on.
    pub const HIGH: i32 = 80;
    /// Host-level control (shutdown, reboot).
    pub const CRITICAL: i32 = 100;
}

/// Origin tags recorded in `created_by`.
pub mod created_by {
    pub const API: &str = "api";
    pub const SYSTEM_STARTUP: &str = "system_startup";
    pub const SYSTEM_PERIODIC: &str = "system_periodic";
    pub const SYSTEM_IMPORT: &str = "system_import";
}

/// Lifecycle state of a task.
///
/// Legal transitions: `pending -> running -> completed|failed`, or
/// `pending -> cancelled`. Running tasks cannot be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Stable string form used for database storage and API filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<TaskStatus> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states are never revisited and are eligible for retention
    /// cleanup.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutual-exclusion classes. At most one running task may hold a category
/// at any time; operations without a category run freely concurrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationCategory {
    PackageManagement,
    NetworkDatalink,
    NetworkIp,
    SystemConfig,
    UserManagement,
}

impl OperationCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationCategory::PackageManagement => "package_management",
            OperationCategory::NetworkDatalink => "network_datalink",
            OperationCategory::NetworkIp => "network_ip",
            OperationCategory::SystemConfig => "system_config",
            OperationCategory::UserManagement => "user_management",
        }
    }
}

impl std::fmt::Display for OperationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of operations the daemon executes. A task whose
/// `operation` column does not parse into this enum fails with an
/// unknown-operation error instead of being silently dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    // Zone lifecycle
    Discover,
    Start,
    Stop,
    Restart,
    ZoneDelete,
    // Datalink management
    CreateVnic,
    DeleteVnic,
    CreateAggregate,
    DeleteAggregate,
    ModifyAggregateLinks,
    CreateEtherstub,
    DeleteEtherstub,
    // IP management
    CreateIpAddress,
    DeleteIpAddress,
    EnableRouting,
    DisableRouting,
    // Packaging and boot environments
    PkgInstall,
    PkgUninstall,
    PkgUpdate,
    PkgRefresh,
    BeadmCreate,
    BeadmActivate,
    BeadmDelete,
    RepositoryAdd,
    RepositoryRemove,
    // Accounts
    UserCreate,
    UserModify,
    UserDelete,
    GroupCreate,
    GroupDelete,
    RoleCreate,
    RoleDelete,
    // SMF services
    ServiceEnable,
    ServiceDisable,
    ServiceRestart,
    ServiceRefresh,
    // Host-level system control
    SetHostname,
    SetZfsArcParams,
    SystemHostShutdown,
    SystemHostReboot,
    SystemHostPoweroff,
    // Artifact management
    ArtifactDownloadUrl,
    ArtifactDelete,
}

impl Operation {
    /// Stable string tag stored in the task record.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Discover => "discover",
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Restart => "restart",
            Operation::ZoneDelete => "zone_delete",
            Operation::CreateVnic => "create_vnic",
            Operation::DeleteVnic => "delete_vnic",
            Operation::CreateAggregate => "create_aggregate",
            Operation::DeleteAggregate => "delete_aggregate",
            Operation::ModifyAggregateLinks => "modify_aggregate_links",
            Operation::CreateEtherstub => "create_etherstub",
            Operation::DeleteEtherstub => "delete_etherstub",
            Operation::CreateIpAddress => "create_ip_address",
            Operation::DeleteIpAddress => "delete_ip_address",
            Operation::EnableRouting => "enable_routing",
            Operation::DisableRouting => "disable_routing",
            Operation::PkgInstall => "pkg_install",
            Operation::PkgUninstall => "pkg_uninstall",
            Operation::PkgUpdate => "pkg_update",
            Operation::PkgRefresh => "pkg_refresh",
            Operation::BeadmCreate => "beadm_create",
            Operation::BeadmActivate => "beadm_activate",
            Operation::BeadmDelete => "beadm_delete",
            Operation::RepositoryAdd => "repository_add",
            Operation::RepositoryRemove => "repository_remove",
            Operation::UserCreate => "user_create",
            Operation::UserModify => "user_modify",
            Operation::UserDelete => "user_delete",
            Operation::GroupCreate => "group_create",
            Operation::GroupDelete => "group_delete",
            Operation::RoleCreate => "role_create",
            Operation::RoleDelete => "role_delete",
            Operation::ServiceEnable => "service_enable",
            Operation::ServiceDisable => "service_disable",
            Operation::ServiceRestart => "service_restart",
            Operation::ServiceRefresh => "service_refresh",
            Operation::SetHostname => "set_hostname",
            Operation::SetZfsArcParams => "set_zfs_arc_params",
            Operation::SystemHostShutdown => "system_host_shutdown",
            Operation::SystemHostReboot => "system_host_reboot",
            Operation::SystemHostPoweroff => "system_host_poweroff",
            Operation::ArtifactDownloadUrl => "artifact_download_url",
            Operation::ArtifactDelete => "artifact_delete",
        }
    }

    /// Parses the stored string tag. Returns `None` for operations outside
    /// the registry; the scheduler turns that into a failed task.
    pub fn parse(s: &str) -> Option<Operation> {
        let op = match s {
            "discover" => Operation::Discover,
            "start" => Operation::Start,
            "stop" => Operation::Stop,
            "restart" => Operation::Restart,
            "zone_delete" => Operation::ZoneDelete,
            "create_vnic" => Operation::CreateVnic,
            "delete_vnic" => Operation::DeleteVnic,
            "create_aggregate" => Operation::CreateAggregate,
            "delete_aggregate" => Operation::DeleteAggregate,
            "modify_aggregate_links" => Operation::ModifyAggregateLinks,
            "create_etherstub" => Operation::CreateEtherstub,
            "delete_etherstub" => Operation::DeleteEtherstub,
            "create_ip_address" => Operation::CreateIpAddress,
            "delete_ip_address" => Operation::DeleteIpAddress,
            "enable_routing" => Operation::EnableRouting,
            "disable_routing" => Operation::DisableRouting,
            "pkg_install" => Operation::PkgInstall,
            "pkg_uninstall" => Operation::PkgUninstall,
            "pkg_update" => Operation::PkgUpdate,
            "pkg_refresh" => Operation::PkgRefresh,
            "beadm_create" => Operation::BeadmCreate,
            "beadm_activate" => Operation::BeadmActivate,
            "beadm_delete" => Operation::BeadmDelete,
            "repository_add" => Operation::RepositoryAdd,
            "repository_remove" => Operation::RepositoryRemove,
            "user_create" => Operation::UserCreate,
            "user_modify" => Operation::UserModify,
            "user_delete" => Operation::UserDelete,
            "group_create" => Operation::GroupCreate,
            "group_delete" => Operation::GroupDelete,
            "role_create" => Operation::RoleCreate,
            "role_delete" => Operation::RoleDelete,
            "service_enable" => Operation::ServiceEnable,
            "service_disable" => Operation::ServiceDisable,
            "service_restart" => Operation::ServiceRestart,
            "service_refresh" => Operation::ServiceRefresh,
            "set_hostname" => Operation::SetHostname,
            "set_zfs_arc_params" => Operation::SetZfsArcParams,
            "system_host_shutdown" => Operation::SystemHostShutdown,
            "system_host_reboot" => Operation::SystemHostReboot,
            "system_host_poweroff" => Operation::SystemHostPoweroff,
            "artifact_download_url" => Operation::ArtifactDownloadUrl,
            "artifact_delete" => Operation::ArtifactDelete,
            _ => return None,
        };
        Some(op)
    }

    /// The mutual-exclusion category this operation holds while running,
    /// if any. Operations touching the same subsystem through a stateful
    /// external tool (pkg, dladm, ipadm, user databases) must serialise.
    pub fn category(&self) -> Option<OperationCategory> {
        use Operation::*;
        match self {
            PkgInstall | PkgUninstall | PkgUpdate | PkgRefresh | BeadmCreate | BeadmActivate
            | BeadmDelete | RepositoryAdd | RepositoryRemove => {
                Some(OperationCategory::PackageManagement)
            }
            CreateVnic | DeleteVnic | CreateAggregate | DeleteAggregate | ModifyAggregateLinks
            | CreateEtherstub | DeleteEtherstub => Some(OperationCategory::NetworkDatalink),
            CreateIpAddress | DeleteIpAddress | EnableRouting | DisableRouting => {
                Some(OperationCategory::NetworkIp)
            }
            SetHostname | SetZfsArcParams => Some(OperationCategory::SystemConfig),
            UserCreate | UserModify | UserDelete | GroupCreate | GroupDelete | RoleCreate
            | RoleDelete => Some(OperationCategory::UserManagement),
            _ => None,
        }
    }
}

impl Operation {
    /// Every operation in the registry. Kept in declaration order; used to
    /// enumerate the members of a category.
    pub const ALL: [Operation; 43] = [
        Operation::Discover,
        Operation::Start,
        Operation::Stop,
        Operation::Restart,
        Operation::ZoneDelete,
        Operation::CreateVnic,
        Operation::DeleteVnic,
        Operation::CreateAggregate,
        Operation::DeleteAggregate,
        Operation::ModifyAggregateLinks,
        Operation::CreateEtherstub,
        Operation::DeleteEtherstub,
        Operation::CreateIpAddress,
        Operation::DeleteIpAddress,
        Operation::EnableRouting,
        Operation::DisableRouting,
        Operation::PkgInstall,
        Operation::PkgUninstall,
        Operation::PkgUpdate,
        Operation::PkgRefresh,
        Operation::BeadmCreate,
        Operation::BeadmActivate,
        Operation::BeadmDelete,
        Operation::RepositoryAdd,
        Operation::RepositoryRemove,
        Operation::UserCreate,
        Operation::UserModify,
        Operation::UserDelete,
        Operation::GroupCreate,
        Operation::GroupDelete,
        Operation::RoleCreate,
        Operation::RoleDelete,
        Operation::ServiceEnable,
        Operation::ServiceDisable,
        Operation::ServiceRestart,
        Operation::ServiceRefresh,
        Operation::SetHostname,
        Operation::SetZfsArcParams,
        Operation::SystemHostShutdown,
        Operation::SystemHostReboot,
        Operation::SystemHostPoweroff,
        Operation::ArtifactDownloadUrl,
        Operation::ArtifactDelete,
    ];
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All operation tags belonging to any of the given categories. The
/// scheduler uses this to defer category-locked work without losing the
/// relative order of everything else.
pub fn operations_in_categories<'a, I>(categories: I) -> Vec<&'static str>
where
    I: IntoIterator<Item = &'a OperationCategory>,
{
    let held: Vec<OperationCategory> = categories.into_iter().copied().collect();
    if held.is_empty() {
        return Vec::new();
    }
    Operation::ALL
        .iter()
        .filter(|op| op.category().is_some_and(|c| held.contains(&c)))
        .map(|op| op.as_str())
        .collect()
}

/// Category lookup on a raw operation tag. Unknown tags have no category;
/// they will fail at dispatch anyway.
pub fn category_of(operation: &str) -> Option<OperationCategory> {
    Operation::parse(operation).and_then(|op| op.category())
}

/// A durable task record, one row in the `tasks` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    /// Operation tag. Stored as text so records whose operation has been
    /// retired from the registry remain readable.
    pub operation: String,
    /// Target zone; `"system"` denotes host-global work.
    pub zone_name: Option<String>,
    pub priority: i32,
    pub status: TaskStatus,
    /// Id of a task that must be `completed` before this one is eligible.
    pub depends_on: Option<i64>,
    /// Opaque JSON payload for the handler, parsed lazily at dispatch.
    pub metadata: Option<String>,
    pub progress_percent: f64,
    /// Opaque structured progress detail, JSON text.
    pub progress_info: Option<String>,
    pub error_message: Option<String>,
    /// Unix seconds.
    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub created_by: String,
}

impl Task {
    /// Zone name for log fields, with the host-global placeholder applied.
    pub fn zone_label(&self) -> &str {
        self.zone_name.as_deref().unwrap_or("system")
    }
}

/// Parameters for inserting a new task row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub operation: String,
    #[serde(default)]
    pub zone_name: Option<String>,
    pub priority: i32,
    #[serde(default)]
    pub depends_on: Option<i64>,
    #[serde(default)]
    pub metadata: Option<String>,
    pub created_by: String,
}

impl NewTask {
    /// Convenience constructor for internally generated tasks.
    pub fn internal(operation: Operation, priority: i32, created_by: &str) -> Self {
        Self {
            operation: operation.as_str().to_string(),
            zone_name: None,
            priority,
            depends_on: None,
            metadata: None,
            created_by: created_by.to_string(),
        }
    }
}
