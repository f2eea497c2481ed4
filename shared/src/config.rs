//! Configuration types and validation for the host control plane
//!
//! This module defines the configuration structure loaded from `hostd.toml`,
//! including validation logic and serialization support. Defaults live in
//! [`crate::defaults`] so every tunable has exactly one source of truth.

use crate::defaults::*;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Main daemon configuration loaded from hostd.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostdConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub zones: ZonesSection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub orchestration: OrchestrationSection,
    #[serde(default)]
    pub retention: RetentionSection,
    #[serde(default)]
    pub logging: LoggingSection,
    /// Path of the persistent reboot-required flag file
    #[serde(default = "default_reboot_flag_path")]
    pub reboot_flag_path: String,
}

/// HTTP server and storage settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// Address the API listens on
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Directory holding the task database
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// SQLite busy timeout in seconds
    #[serde(default = "default_database_busy_timeout")]
    pub database_busy_timeout_seconds: u64,
}

/// Task queue and discovery settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZonesSection {
    /// Maximum number of tasks running at once
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Scheduler tick interval in seconds
    #[serde(default = "default_scheduler_tick_seconds")]
    pub scheduler_tick_seconds: u64,
    /// Capacity of the task completion channel
    #[serde(default = "default_channel_buffer_size")]
    pub channel_buffer_size: usize,
    /// Default `limit` for task listings
    #[serde(default = "default_pagination_limit")]
    pub default_pagination_limit: usize,
    /// Whether to enqueue periodic discover tasks
    #[serde(default = "default_auto_discovery")]
    pub auto_discovery: bool,
    /// Seconds between periodic discover tasks
    #[serde(default = "default_discovery_interval_seconds")]
    pub discovery_interval_seconds: u64,
}

/// Command executor settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorSection {
    /// Default timeout applied to commands that don't request their own
    #[serde(default = "default_command_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Prefix privileged commands with pfexec
    #[serde(default = "default_use_pfexec")]
    pub use_pfexec: bool,
}

/// Zone shutdown orchestration settings. These are defaults; a host-control
/// task's metadata may override any of them per invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestrationSection {
    #[serde(default = "default_orchestration_enabled")]
    pub enabled: bool,
    /// One of `sequential`, `parallel_by_priority`, `staggered`
    #[serde(default = "default_orchestration_strategy")]
    pub strategy: String,
    /// One of `abort`, `continue`
    #[serde(default = "default_failure_action")]
    pub failure_action: String,
    /// Pause between priority groups in seconds
    #[serde(default = "default_priority_delay_seconds")]
    pub priority_delay_seconds: u64,
    /// Per-zone stop timeout in seconds
    #[serde(default = "default_zone_timeout_seconds")]
    pub zone_timeout_seconds: u64,
}

/// Terminal-task retention settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetentionSection {
    /// Days to keep completed/failed/cancelled tasks
    #[serde(default = "default_task_retention_days")]
    pub tasks_days: u32,
    /// Seconds between retention sweeps
    #[serde(default = "default_retention_sweep_seconds")]
    pub sweep_interval_seconds: u64,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSection {
    /// Commands and tasks slower than this are logged as slow
    #[serde(default = "default_performance_threshold_ms")]
    pub performance_threshold_ms: u64,
    /// Optional directory for rotated log files; stdout only when unset
    #[serde(default)]
    pub directory: Option<String>,
}

impl Default for HostdConfig {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            zones: ZonesSection::default(),
            executor: ExecutorSection::default(),
            orchestration: OrchestrationSection::default(),
            retention: RetentionSection::default(),
            logging: LoggingSection::default(),
            reboot_flag_path: default_reboot_flag_path(),
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            data_dir: default_data_dir(),
            database_busy_timeout_seconds: default_database_busy_timeout(),
        }
    }
}

impl Default for ZonesSection {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            scheduler_tick_seconds: default_scheduler_tick_seconds(),
            channel_buffer_size: default_channel_buffer_size(),
            default_pagination_limit: default_pagination_limit(),
            auto_discovery: default_auto_discovery(),
            discovery_interval_seconds: default_discovery_interval_seconds(),
        }
    }
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_command_timeout_ms(),
            use_pfexec: default_use_pfexec(),
        }
    }
}

impl Default for OrchestrationSection {
    fn default() -> Self {
        Self {
            enabled: default_orchestration_enabled(),
            strategy: default_orchestration_strategy(),
            failure_action: default_failure_action(),
            priority_delay_seconds: default_priority_delay_seconds(),
            zone_timeout_seconds: default_zone_timeout_seconds(),
        }
    }
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            tasks_days: default_task_retention_days(),
            sweep_interval_seconds: default_retention_sweep_seconds(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            performance_threshold_ms: default_performance_threshold_ms(),
            directory: None,
        }
    }
}

impl HostdConfig {
    /// Parse a TOML document into a configuration, applying defaults for
    /// missing fields and validating the result.
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: HostdConfig = toml::from_str(content)
            .map_err(|e| crate::HostError::Config(format!("Failed to parse hostd.toml: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field ranges and enumerated string values. Called after
    /// deserialization so a config file with out-of-band values is rejected
    /// at startup rather than misbehaving at runtime.
    pub fn validate(&self) -> crate::Result<()> {
        self.server
            .bind_address
            .parse::<SocketAddr>()
            .map_err(|_| {
                crate::HostError::Config(format!(
                    "server.bind_address is not a valid socket address: {}",
                    self.server.bind_address
                ))
            })?;

        if self.zones.max_concurrent_tasks == 0 {
            return Err(
                crate::HostError::Config("zones.max_concurrent_tasks must be at least 1".into())
                    .into(),
            );
        }
        if self.zones.scheduler_tick_seconds == 0 {
            return Err(
                crate::HostError::Config("zones.scheduler_tick_seconds must be at least 1".into())
                    .into(),
            );
        }
        if self.zones.channel_buffer_size == 0 {
            return Err(
                crate::HostError::Config("zones.channel_buffer_size must be at least 1".into())
                    .into(),
            );
        }
        if self.zones.auto_discovery && self.zones.discovery_interval_seconds < 30 {
            return Err(crate::HostError::Config(
                "zones.discovery_interval_seconds must be at least 30".into(),
            )
            .into());
        }

        if self.executor.default_timeout_ms < 1000 {
            return Err(crate::HostError::Config(
                "executor.default_timeout_ms must be at least 1000".into(),
            )
            .into());
        }

        match self.orchestration.strategy.as_str() {
            "sequential" | "parallel_by_priority" | "staggered" => {}
            other => {
                return Err(crate::HostError::Config(format!(
                    "orchestration.strategy must be sequential, parallel_by_priority or staggered, got: {}",
                    other
                ))
                .into());
            }
        }
        match self.orchestration.failure_action.as_str() {
            "abort" | "continue" => {}
            other => {
                return Err(crate::HostError::Config(format!(
                    "orchestration.failure_action must be abort or continue, got: {}",
                    other
                ))
                .into());
            }
        }
        if self.orchestration.zone_timeout_seconds == 0 {
            return Err(crate::HostError::Config(
                "orchestration.zone_timeout_seconds must be at least 1".into(),
            )
            .into());
        }

        if self.retention.tasks_days == 0 {
            return Err(
                crate::HostError::Config("retention.tasks_days must be at least 1".into()).into(),
            );
        }

        Ok(())
    }
}
