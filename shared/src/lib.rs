//! Shared data structures and utilities for the zoneweaver host control plane
//!
//! This crate contains common types, configuration structures, and utilities
//! used by the host daemon: the task model, operation registry metadata,
//! configuration schema and API payloads.

pub mod api;
pub mod config;
pub mod defaults;
pub mod tasks;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::HostdConfig;
pub use tasks::{NewTask, Operation, OperationCategory, Task, TaskStatus};
pub use utils::{validate_account_name, validate_link_name, validate_zone_name};

/// Result type alias used throughout the shared crate
pub type Result<T> = anyhow::Result<T>;

/// Common error types for the control plane
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Command execution error: {0}")]
    CommandExecution(String),

    #[error("Task execution error: {0}")]
    TaskExecution(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests;
