//! Default values for configuration parameters
//!
//! This module centralizes all default value functions used by the
//! configuration structures. These functions are used by serde when
//! deserializing configuration files that don't specify certain optional
//! fields.

// Server defaults

/// Default API bind address
pub fn default_bind_address() -> String {
    "127.0.0.1:8080".to_string()
}

/// Default data directory for the task database
pub fn default_data_dir() -> String {
    "/var/lib/zoneweaver".to_string()
}

/// Default SQLite busy timeout (5 seconds)
pub fn default_database_busy_timeout() -> u64 {
    5
}

// Scheduler defaults

/// Default maximum number of concurrently running tasks
pub fn default_max_concurrent_tasks() -> usize {
    5
}

/// Default scheduler tick interval (2 seconds)
pub fn default_scheduler_tick_seconds() -> u64 {
    2
}

/// Default completion channel capacity
pub fn default_channel_buffer_size() -> usize {
    256
}

/// Default pagination limit for task listings
pub fn default_pagination_limit() -> usize {
    50
}

/// Automatic zone discovery is off unless enabled
pub fn default_auto_discovery() -> bool {
    false
}

/// Default interval between periodic discovery tasks (5 minutes)
pub fn default_discovery_interval_seconds() -> u64 {
    300
}

// Command executor defaults

/// Default command timeout (5 minutes)
pub fn default_command_timeout_ms() -> u64 {
    300_000
}

/// Privileged commands go through pfexec unless disabled
pub fn default_use_pfexec() -> bool {
    true
}

// Orchestration defaults

/// Zone shutdown orchestration is on by default
pub fn default_orchestration_enabled() -> bool {
    true
}

/// Default shutdown strategy
pub fn default_orchestration_strategy() -> String {
    "parallel_by_priority".to_string()
}

/// Default failure action: keep stopping remaining zones
pub fn default_failure_action() -> String {
    "continue".to_string()
}

/// Default pause between priority groups (5 seconds)
pub fn default_priority_delay_seconds() -> u64 {
    5
}

/// Default per-zone stop timeout (2 minutes)
pub fn default_zone_timeout_seconds() -> u64 {
    120
}

// Retention defaults

/// Default retention for terminal tasks (30 days)
pub fn default_task_retention_days() -> u32 {
    30
}

/// Default retention sweep interval (1 hour)
pub fn default_retention_sweep_seconds() -> u64 {
    3600
}

// Logging defaults

/// Threshold above which commands and tasks are logged as slow (5 seconds)
pub fn default_performance_threshold_ms() -> u64 {
    5000
}

// Reboot flag defaults

/// Default path of the persistent reboot-required flag file
pub fn default_reboot_flag_path() -> String {
    "/var/tmp/zoneweaver-reboot-required".to_string()
}
