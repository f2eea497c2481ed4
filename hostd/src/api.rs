//! REST API for the host control plane
//!
//! The HTTP layer is strictly presentation: it creates, lists and cancels
//! task rows, reports scheduler statistics, and exposes the orchestrator's
//! read-only surfaces. It never executes host operations itself; everything
//! mutating goes through the task queue.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use shared::{
    api::{
        endpoints, CreateTaskRequest, CreateTaskResponse, OrchestrationStatusResponse,
        StatusResponse, TaskListQuery, TaskListResponse, TaskStatsResponse,
    },
    tasks::{created_by, priority, NewTask, Operation, TaskStatus},
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::database::{TaskDatabase, TaskFilter};
use crate::executor::CommandExecutor;
use crate::orchestrator::{self, OrchestrationState};
use crate::rebootflag::RebootFlag;
use crate::scheduler::RunningTasks;

/// Application state shared across all API handlers
#[derive(Clone)]
pub struct AppState {
    /// Task store handle, shared with the scheduler
    pub database: Arc<Mutex<TaskDatabase>>,
    /// Process-local running set, written by the scheduler driver
    pub running_tasks: RunningTasks,
    /// Orchestration runtime toggle and defaults
    pub orchestration: Arc<OrchestrationState>,
    /// Executor for the read-only zone inventory endpoints
    pub executor: CommandExecutor,
    /// Reboot flag store
    pub reboot_flag: RebootFlag,
    /// Default `limit` for task listings
    pub default_pagination_limit: usize,
}

/// Creates the API router and defines all the application's routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Unauthenticated liveness probe for service management.
        .route(endpoints::HEALTH, get(health_check))
        .route(endpoints::TASKS, get(list_tasks).post(create_task))
        .route(endpoints::TASK_STATS, get(task_stats))
        .route(endpoints::TASK_DETAIL, get(get_task).delete(cancel_task))
        .route(endpoints::ORCHESTRATION_STATUS, get(orchestration_status))
        .route(endpoints::ORCHESTRATION_ENABLE, post(orchestration_enable))
        .route(
            endpoints::ORCHESTRATION_DISABLE,
            post(orchestration_disable),
        )
        .route(endpoints::ORCHESTRATION_TEST, post(orchestration_test))
        .route(endpoints::ZONE_PRIORITIES, get(zone_priorities))
        .route(
            "/system/reboot-required",
            get(reboot_required).delete(clear_reboot_required),
        )
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

/// `GET /tasks` with filtering on status, zone, operation and update time.
async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<TaskListResponse>, ApiError> {
    if let Some(status) = &query.status {
        if TaskStatus::parse(status).is_none() {
            return Err(ApiError::BadRequest(format!(
                "Unknown status filter: {}",
                status
            )));
        }
    }

    let filter = TaskFilter {
        status: query.status.clone(),
        zone_name: query.zone_name.clone(),
        operation: query.operation.clone(),
        operation_ne: query.operation_ne.clone(),
        since: query.since,
        limit: Some(query.limit.unwrap_or(state.default_pagination_limit)),
    };

    let mut db = state.database.lock().await;
    let tasks = db
        .find_tasks(&filter)
        .await
        .map_err(|e| ApiError::Database(e.to_string()))?;

    let total = if query.include_count.unwrap_or(false) {
        Some(
            db.count_tasks(&filter)
                .await
                .map_err(|e| ApiError::Database(e.to_string()))?,
        )
    } else {
        None
    };

    Ok(Json(TaskListResponse { tasks, total }))
}

/// `POST /tasks` — admit a new task into the queue.
async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<CreateTaskResponse>), ApiError> {
    // The registry is closed; reject tags it will never execute instead of
    // letting them fail at dispatch.
    if Operation::parse(&request.operation).is_none() {
        return Err(ApiError::BadRequest(format!(
            "Unknown operation: {}",
            request.operation
        )));
    }
    if let Some(zone) = &request.zone_name {
        if zone != "system" {
            shared::utils::validate_zone_name(zone)
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        }
    }

    let mut db = state.database.lock().await;

    if let Some(dep_id) = request.depends_on {
        let dependency = db
            .get_task(dep_id)
            .await
            .map_err(|e| ApiError::Database(e.to_string()))?;
        match dependency {
            None => {
                return Err(ApiError::BadRequest(format!(
                    "Dependency task {} does not exist",
                    dep_id
                )))
            }
            // A dependency that can never reach `completed` would leave the
            // new task pending forever.
            Some(dep)
                if dep.status == TaskStatus::Cancelled || dep.status == TaskStatus::Failed =>
            {
                return Err(ApiError::BadRequest(format!(
                    "Dependency task {} is {} and will never complete",
                    dep_id, dep.status
                )))
            }
            Some(_) => {}
        }
    }

    let new_task = NewTask {
        operation: request.operation,
        zone_name: request.zone_name,
        priority: request.priority.unwrap_or(priority::NORMAL),
        depends_on: request.depends_on,
        metadata: request.metadata.map(|v| v.to_string()),
        created_by: created_by::API.to_string(),
    };

    let task = db
        .insert_task(&new_task)
        .await
        .map_err(|e| ApiError::Database(e.to_string()))?;

    debug!(task_id = task.id, operation = %task.operation, "Task created via API");
    Ok((
        StatusCode::CREATED,
        Json(CreateTaskResponse {
            id: task.id,
            status: task.status.to_string(),
        }),
    ))
}

/// `GET /tasks/stats` — store-wide counts plus this process's running set.
async fn task_stats(State(state): State<AppState>) -> Result<Json<TaskStatsResponse>, ApiError> {
    let by_status = {
        let mut db = state.database.lock().await;
        db.count_by_status()
            .await
            .map_err(|e| ApiError::Database(e.to_string()))?
    };

    let running = state.running_tasks.read().await;
    let running_now = running.len();
    let mut held_categories: Vec<String> = running
        .values()
        .filter_map(|task| task.category.map(|c| c.to_string()))
        .collect();
    held_categories.sort();
    held_categories.dedup();

    Ok(Json(TaskStatsResponse {
        by_status,
        running_now,
        held_categories,
    }))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<shared::tasks::Task>, ApiError> {
    let mut db = state.database.lock().await;
    let task = db
        .get_task(id)
        .await
        .map_err(|e| ApiError::Database(e.to_string()))?;
    match task {
        Some(task) => Ok(Json(task)),
        None => Err(ApiError::NotFound(format!("Task {} not found", id))),
    }
}

/// `DELETE /tasks/{id}` — cancellation. Only pending tasks can be
/// cancelled; running handlers cannot be interrupted.
async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<StatusResponse>, ApiError> {
    let mut db = state.database.lock().await;

    let task = db
        .get_task(id)
        .await
        .map_err(|e| ApiError::Database(e.to_string()))?;
    let Some(task) = task else {
        return Err(ApiError::NotFound(format!("Task {} not found", id)));
    };

    let cancelled = db
        .cancel_task(id)
        .await
        .map_err(|e| ApiError::Database(e.to_string()))?;
    if cancelled {
        Ok(Json(StatusResponse::with_message(format!(
            "Task {} cancelled",
            id
        ))))
    } else {
        Err(ApiError::BadRequest(format!(
            "Task {} is {} and cannot be cancelled",
            id, task.status
        )))
    }
}

fn orchestration_response(state: &AppState) -> OrchestrationStatusResponse {
    let section = state.orchestration.section();
    OrchestrationStatusResponse {
        enabled: state.orchestration.is_enabled(),
        strategy: section.strategy.clone(),
        failure_action: section.failure_action.clone(),
        priority_delay_seconds: section.priority_delay_seconds,
        zone_timeout_seconds: section.zone_timeout_seconds,
    }
}

async fn orchestration_status(
    State(state): State<AppState>,
) -> Json<OrchestrationStatusResponse> {
    Json(orchestration_response(&state))
}

async fn orchestration_enable(
    State(state): State<AppState>,
) -> Json<OrchestrationStatusResponse> {
    state.orchestration.enable();
    Json(orchestration_response(&state))
}

async fn orchestration_disable(
    State(state): State<AppState>,
) -> Json<OrchestrationStatusResponse> {
    state.orchestration.disable();
    Json(orchestration_response(&state))
}

/// `POST /zones/orchestration/test` — dry run. Computes the shutdown plan
/// from the live inventory without stopping anything.
async fn orchestration_test(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let groups = orchestrator::compute_shutdown_plan(&state.executor)
        .await
        .map_err(|e| ApiError::Internal(format!("{:#}", e)))?;
    Ok(Json(serde_json::json!({
        "dry_run": true,
        "groups": groups,
    })))
}

/// `GET /zones/priorities` — live zone inventory with resolved priorities.
async fn zone_priorities(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let zones = orchestrator::query_zone_priorities(&state.executor)
        .await
        .map_err(|e| ApiError::Internal(format!("{:#}", e)))?;
    let zones: Vec<serde_json::Value> = zones
        .iter()
        .map(|(name, state, priority)| {
            serde_json::json!({
                "name": name,
                "state": state,
                "priority": priority,
                "priority_range": orchestrator::priority_range(*priority),
            })
        })
        .collect();
    Ok(Json(serde_json::json!({ "zones": zones })))
}

async fn reboot_required(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.reboot_flag.get();
    Json(serde_json::to_value(status).unwrap_or_else(|_| serde_json::json!({ "required": false })))
}

async fn clear_reboot_required(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, ApiError> {
    state
        .reboot_flag
        .clear()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(StatusResponse::with_message("Reboot flag cleared")))
}

/// API error taxonomy, rendered as JSON `{error, details}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Database error: {0}")]
    Database(String),
}

/// Converts `ApiError` into an HTTP response; axum calls this whenever a
/// handler returns the `Err` variant.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "Not Found"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "Bad Request"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Database Error"),
        };

        if status.is_server_error() {
            warn!(error = %self, "API request failed");
        }

        let body = Json(serde_json::json!({
            "error": error_message,
            "details": self.to_string()
        }));

        (status, body).into_response()
    }
}
