//! API types and structures for the control-plane HTTP surface
//!
//! This module defines the request and response payloads used by the REST
//! endpoints. The HTTP layer only creates, queries and cancels task rows;
//! all mutation of host state happens inside task handlers.

use crate::tasks::Task;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// API endpoint paths
pub mod endpoints {
    pub const HEALTH: &str = "/health";
    pub const TASKS: &str = "/tasks";
    pub const TASK_STATS: &str = "/tasks/stats";
    pub const TASK_DETAIL: &str = "/tasks/{id}";
    pub const ORCHESTRATION_STATUS: &str = "/zones/orchestration/status";
    pub const ORCHESTRATION_ENABLE: &str = "/zones/orchestration/enable";
    pub const ORCHESTRATION_DISABLE: &str = "/zones/orchestration/disable";
    pub const ORCHESTRATION_TEST: &str = "/zones/orchestration/test";
    pub const ZONE_PRIORITIES: &str = "/zones/priorities";
}

/// Query parameters accepted by `GET /tasks`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskListQuery {
    /// Filter on task status
    #[serde(default)]
    pub status: Option<String>,
    /// Filter on target zone
    #[serde(default)]
    pub zone_name: Option<String>,
    /// Filter on operation tag
    #[serde(default)]
    pub operation: Option<String>,
    /// Exclude an operation tag
    #[serde(default)]
    pub operation_ne: Option<String>,
    /// Only tasks with `updated_at >= since` (Unix seconds)
    #[serde(default)]
    pub since: Option<i64>,
    /// Maximum rows returned; server default applies when unset
    #[serde(default)]
    pub limit: Option<usize>,
    /// Include the unlimited match count in the response
    #[serde(default)]
    pub include_count: Option<bool>,
}

/// Response body for `GET /tasks`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskListResponse {
    pub tasks: Vec<Task>,
    /// Total matching rows, populated when `include_count` was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// Request body for `POST /tasks`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub operation: String,
    #[serde(default)]
    pub zone_name: Option<String>,
    /// Defaults to the NORMAL priority band
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub depends_on: Option<i64>,
    /// Opaque handler payload
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Response body for `POST /tasks`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskResponse {
    pub id: i64,
    pub status: String,
}

/// Response body for `GET /tasks/stats`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatsResponse {
    /// Row counts grouped by status, from the store
    pub by_status: HashMap<String, u64>,
    /// Tasks currently held by this process
    pub running_now: usize,
    /// Mutual-exclusion categories currently held
    pub held_categories: Vec<String>,
}

/// Response body for the orchestration status/enable/disable endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationStatusResponse {
    pub enabled: bool,
    pub strategy: String,
    pub failure_action: String,
    pub priority_delay_seconds: u64,
    pub zone_timeout_seconds: u64,
}

/// Generic minimal response for state-changing endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            status: "success".to_string(),
            message: None,
        }
    }

    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            message: Some(message.into()),
        }
    }
}
