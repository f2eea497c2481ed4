//! Task table operations
//!
//! All SQL touching the `tasks` table lives here: schema creation, the
//! eligibility query the scheduler runs every tick, listing filters for the
//! API, lifecycle transitions and retention deletes.

use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter, Connection, Row};
use shared::tasks::{NewTask, Task, TaskStatus};
use shared::utils::current_timestamp;
use std::collections::HashMap;
use tracing::debug;

/// Create the tasks table and indexes
pub(super) fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            operation TEXT NOT NULL,
            zone_name TEXT,
            priority INTEGER NOT NULL DEFAULT 50,
            status TEXT NOT NULL DEFAULT 'pending',
            depends_on INTEGER REFERENCES tasks(id),
            metadata TEXT,
            progress_percent REAL NOT NULL DEFAULT 0,
            progress_info TEXT,
            error_message TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            started_at INTEGER,
            completed_at INTEGER,
            created_by TEXT NOT NULL
        )
        "#,
        [],
    )
    .context("Failed to create tasks table")?;

    // The eligibility query filters on status and orders by priority then
    // age; retention scans by created_at.
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_status_priority ON tasks(status, priority DESC, created_at ASC)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_created ON tasks(created_at)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tasks_updated ON tasks(updated_at)",
        [],
    )?;

    Ok(())
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status_str: String = row.get("status")?;
    Ok(Task {
        id: row.get("id")?,
        operation: row.get("operation")?,
        zone_name: row.get("zone_name")?,
        priority: row.get("priority")?,
        // Unknown status text would mean outside interference with the
        // database file; surface it as failed rather than crash.
        status: TaskStatus::parse(&status_str).unwrap_or(TaskStatus::Failed),
        depends_on: row.get("depends_on")?,
        metadata: row.get("metadata")?,
        progress_percent: row.get("progress_percent")?,
        progress_info: row.get("progress_info")?,
        error_message: row.get("error_message")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        created_by: row.get("created_by")?,
    })
}

/// Insert a pending task row and return the stored record
pub(super) fn insert_task(conn: &Connection, new_task: &NewTask) -> Result<Task> {
    let now = current_timestamp();
    conn.execute(
        r#"
        INSERT INTO tasks (operation, zone_name, priority, status, depends_on, metadata,
                           progress_percent, created_at, updated_at, created_by)
        VALUES (?1, ?2, ?3, 'pending', ?4, ?5, 0, ?6, ?6, ?7)
        "#,
        params![
            new_task.operation,
            new_task.zone_name,
            new_task.priority,
            new_task.depends_on,
            new_task.metadata,
            now,
            new_task.created_by,
        ],
    )
    .context("Failed to insert task")?;

    let id = conn.last_insert_rowid();
    get_task(conn, id)?.context("Inserted task row missing")
}

pub(super) fn get_task(conn: &Connection, id: i64) -> Result<Option<Task>> {
    let mut stmt = conn.prepare("SELECT * FROM tasks WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], row_to_task)?;
    match rows.next() {
        Some(task) => Ok(Some(task?)),
        None => Ok(None),
    }
}

/// The scheduler's pick query: highest priority first, oldest first within a
/// priority, and dependency-gated. Operations whose category is currently
/// held are excluded, which defers them without reordering anything else.
/// Dependents of failed or cancelled predecessors simply never match; that
/// is deliberate (the operator decides whether to cancel or resubmit them).
pub(super) fn find_one_eligible(
    conn: &Connection,
    excluded_operations: &[&str],
) -> Result<Option<Task>> {
    let mut sql = String::from(
        r#"
        SELECT t.* FROM tasks t
        LEFT JOIN tasks dep ON t.depends_on = dep.id
        WHERE t.status = 'pending'
          AND (t.depends_on IS NULL OR dep.status = 'completed')
        "#,
    );
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    if !excluded_operations.is_empty() {
        let placeholders = vec!["?"; excluded_operations.len()].join(", ");
        sql.push_str(&format!(" AND t.operation NOT IN ({})", placeholders));
        for op in excluded_operations {
            values.push(op.to_string().into());
        }
    }
    sql.push_str(" ORDER BY t.priority DESC, t.created_at ASC, t.id ASC LIMIT 1");

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query_map(params_from_iter(values), row_to_task)?;
    match rows.next() {
        Some(task) => Ok(Some(task?)),
        None => Ok(None),
    }
}

/// Listing filter for the API surface.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<String>,
    pub zone_name: Option<String>,
    pub operation: Option<String>,
    pub operation_ne: Option<String>,
    /// Only rows with `updated_at >= since`.
    pub since: Option<i64>,
    pub limit: Option<usize>,
}

/// Build the WHERE clause and parameter list shared by the list and count
/// queries.
fn filter_clause(filter: &TaskFilter) -> (String, Vec<rusqlite::types::Value>) {
    let mut conditions: Vec<&str> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();

    if let Some(status) = &filter.status {
        conditions.push("status = ?");
        values.push(status.clone().into());
    }
    if let Some(zone) = &filter.zone_name {
        conditions.push("zone_name = ?");
        values.push(zone.clone().into());
    }
    if let Some(op) = &filter.operation {
        conditions.push("operation = ?");
        values.push(op.clone().into());
    }
    if let Some(op_ne) = &filter.operation_ne {
        conditions.push("operation != ?");
        values.push(op_ne.clone().into());
    }
    if let Some(since) = filter.since {
        conditions.push("updated_at >= ?");
        values.push(since.into());
    }

    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    (clause, values)
}

/// List tasks matching the filter, newest first
pub(super) fn find_tasks(conn: &Connection, filter: &TaskFilter) -> Result<Vec<Task>> {
    let (clause, mut values) = filter_clause(filter);
    let mut sql = format!("SELECT * FROM tasks{} ORDER BY created_at DESC, id DESC", clause);
    if let Some(limit) = filter.limit {
        sql.push_str(" LIMIT ?");
        values.push((limit as i64).into());
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values), row_to_task)?;
    let mut tasks = Vec::new();
    for task in rows {
        tasks.push(task?);
    }
    Ok(tasks)
}

/// Count tasks matching the filter, ignoring its limit
pub(super) fn count_tasks(conn: &Connection, filter: &TaskFilter) -> Result<u64> {
    let (clause, values) = filter_clause(filter);
    let sql = format!("SELECT COUNT(*) FROM tasks{}", clause);
    let count: i64 = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
    Ok(count as u64)
}

pub(super) fn count_by_status(conn: &Connection) -> Result<HashMap<String, u64>> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    let mut counts = HashMap::new();
    for row in rows {
        let (status, count) = row?;
        counts.insert(status, count as u64);
    }
    Ok(counts)
}

pub(super) fn count_active_by_operation(conn: &Connection, operation: &str) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE operation = ?1 AND status IN ('pending', 'running')",
        params![operation],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

pub(super) fn mark_task_running(conn: &Connection, id: i64) -> Result<()> {
    let now = current_timestamp();
    let changed = conn.execute(
        "UPDATE tasks SET status = 'running', started_at = ?1, updated_at = ?1 WHERE id = ?2 AND status = 'pending'",
        params![now, id],
    )?;
    if changed != 1 {
        anyhow::bail!("Task {} was not pending when marked running", id);
    }
    Ok(())
}

pub(super) fn mark_task_finished(
    conn: &Connection,
    id: i64,
    status: TaskStatus,
    error_message: Option<&str>,
) -> Result<()> {
    debug_assert!(status.is_terminal());
    let now = current_timestamp();
    if status == TaskStatus::Completed {
        // Completed tasks always read 100 percent, whether or not the
        // handler reported progress along the way.
        conn.execute(
            r#"
            UPDATE tasks
            SET status = ?1, completed_at = ?2, updated_at = ?2,
                progress_percent = 100, error_message = NULL
            WHERE id = ?3
            "#,
            params![status.as_str(), now, id],
        )?;
    } else {
        conn.execute(
            r#"
            UPDATE tasks
            SET status = ?1, completed_at = ?2, updated_at = ?2, error_message = ?3
            WHERE id = ?4
            "#,
            params![status.as_str(), now, error_message, id],
        )?;
    }
    Ok(())
}

pub(super) fn update_task_progress(
    conn: &Connection,
    id: i64,
    percent: f64,
    info: Option<&str>,
) -> Result<()> {
    let now = current_timestamp();
    let percent = percent.clamp(0.0, 100.0);
    conn.execute(
        "UPDATE tasks SET progress_percent = ?1, progress_info = ?2, updated_at = ?3 WHERE id = ?4",
        params![percent, info, now, id],
    )?;
    Ok(())
}

/// Conditional cancel: only pending rows transition
pub(super) fn cancel_task(conn: &Connection, id: i64) -> Result<bool> {
    let now = current_timestamp();
    let changed = conn.execute(
        "UPDATE tasks SET status = 'cancelled', completed_at = ?1, updated_at = ?1 WHERE id = ?2 AND status = 'pending'",
        params![now, id],
    )?;
    Ok(changed == 1)
}

pub(super) fn mark_interrupted_running_tasks(conn: &Connection) -> Result<usize> {
    let now = current_timestamp();
    let changed = conn.execute(
        r#"
        UPDATE tasks
        SET status = 'failed', error_message = 'interrupted by process restart',
            completed_at = ?1, updated_at = ?1
        WHERE status = 'running'
        "#,
        params![now],
    )?;
    Ok(changed)
}

pub(super) fn delete_terminal_tasks_before(conn: &Connection, cutoff: i64) -> Result<usize> {
    let deleted = conn.execute(
        "DELETE FROM tasks WHERE status IN ('completed', 'failed', 'cancelled') AND created_at < ?1",
        params![cutoff],
    )?;
    debug!(deleted, cutoff, "Retention delete complete");
    Ok(deleted)
}
