//! Database management for the host control plane
//!
//! The task queue is durable: every task is a row in a local SQLite
//! database, so pending work survives daemon restarts and operators can
//! audit finished work until retention removes it. This module owns the
//! connection; the actual SQL lives in the `db_tasks` submodule.

mod db_tasks;

use anyhow::{Context, Result};
use rusqlite::Connection;
use shared::tasks::{NewTask, Task, TaskStatus};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default database file name. Using a constant avoids magic strings.
const DATABASE_FILE: &str = "hostd_tasks.db";

pub use db_tasks::TaskFilter;

/// SQLite database manager for task records.
/// The `connection` field is an `Option<Connection>` to allow for lazy
/// initialization of the connection.
pub struct TaskDatabase {
    /// Path to the database file.
    db_path: PathBuf,
    /// The active SQLite connection.
    connection: Option<Connection>,
    /// Database busy timeout in seconds
    busy_timeout_seconds: u64,
}

impl TaskDatabase {
    /// Create a new database manager for a given data directory.
    /// Ensures the data directory exists, creating it if necessary.
    pub fn new<P: AsRef<Path>>(data_dir: P, busy_timeout_seconds: u64) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir).with_context(|| {
                format!("Failed to create data directory: {}", data_dir.display())
            })?;
        }

        let db_path = data_dir.join(DATABASE_FILE);

        Ok(Self {
            db_path,
            connection: None,
            busy_timeout_seconds,
        })
    }

    /// Initialize the database by creating the necessary tables and indexes.
    /// Idempotent; safe to call on every startup.
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing task database at {}", self.db_path.display());

        let conn = self.get_connection()?;
        db_tasks::create_tables(conn)?;

        info!("Task database initialization complete");
        Ok(())
    }

    /// Lazily gets a mutable reference to the database connection.
    /// If the connection doesn't exist, it's created and configured.
    pub fn get_connection(&mut self) -> Result<&mut Connection> {
        if self.connection.is_none() {
            let conn = Connection::open(&self.db_path)
                .with_context(|| format!("Failed to open database: {}", self.db_path.display()))?;

            // WAL mode lets the API read task listings while the scheduler
            // writes status transitions.
            conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
                .context("Failed to enable WAL mode")?;

            conn.query_row("PRAGMA wal_autocheckpoint=1000", [], |_| Ok(()))
                .context("Failed to set WAL auto-checkpoint")?;

            conn.busy_timeout(std::time::Duration::from_secs(self.busy_timeout_seconds))
                .context("Failed to set busy timeout")?;

            self.connection = Some(conn);
        }

        // `unwrap` is safe here because we've just ensured `self.connection` is `Some`.
        Ok(self.connection.as_mut().unwrap())
    }

    /// Insert a new pending task and return the stored record.
    pub async fn insert_task(&mut self, new_task: &NewTask) -> Result<Task> {
        let conn = self.get_connection()?;
        let task = db_tasks::insert_task(conn, new_task)?;
        debug!(
            task_id = task.id,
            operation = %task.operation,
            priority = task.priority,
            "Inserted task"
        );
        Ok(task)
    }

    /// Fetch a single task by id.
    pub async fn get_task(&mut self, id: i64) -> Result<Option<Task>> {
        let conn = self.get_connection()?;
        db_tasks::get_task(conn, id)
    }

    /// The highest-priority pending task whose dependency (if any) has
    /// completed, skipping operations whose category is held. Ties break on
    /// oldest creation time.
    pub async fn find_one_eligible(
        &mut self,
        excluded_operations: &[&str],
    ) -> Result<Option<Task>> {
        let conn = self.get_connection()?;
        db_tasks::find_one_eligible(conn, excluded_operations)
    }

    /// List tasks matching a filter, newest first.
    pub async fn find_tasks(&mut self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let conn = self.get_connection()?;
        db_tasks::find_tasks(conn, filter)
    }

    /// Count tasks matching a filter, ignoring its limit.
    pub async fn count_tasks(&mut self, filter: &TaskFilter) -> Result<u64> {
        let conn = self.get_connection()?;
        db_tasks::count_tasks(conn, filter)
    }

    /// Row counts grouped by status.
    pub async fn count_by_status(&mut self) -> Result<HashMap<String, u64>> {
        let conn = self.get_connection()?;
        db_tasks::count_by_status(conn)
    }

    /// Count pending-or-running rows for one operation. Used to avoid
    /// piling up periodic discover tasks.
    pub async fn count_active_by_operation(&mut self, operation: &str) -> Result<u64> {
        let conn = self.get_connection()?;
        db_tasks::count_active_by_operation(conn, operation)
    }

    /// Transition a pending task to running.
    pub async fn mark_task_running(&mut self, id: i64) -> Result<()> {
        let conn = self.get_connection()?;
        db_tasks::mark_task_running(conn, id)
    }

    /// Record a terminal status for a finished task. Success forces
    /// `progress_percent` to 100.
    pub async fn mark_task_finished(
        &mut self,
        id: i64,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let conn = self.get_connection()?;
        db_tasks::mark_task_finished(conn, id, status, error_message)
    }

    /// Persist handler progress. Best-effort semantics are the caller's
    /// concern; this just reports the database outcome.
    pub async fn update_task_progress(
        &mut self,
        id: i64,
        percent: f64,
        info: Option<&str>,
    ) -> Result<()> {
        let conn = self.get_connection()?;
        db_tasks::update_task_progress(conn, id, percent, info)
    }

    /// Cancel a task iff it is still pending. Returns false when the task
    /// exists but was not pending (or does not exist).
    pub async fn cancel_task(&mut self, id: i64) -> Result<bool> {
        let conn = self.get_connection()?;
        db_tasks::cancel_task(conn, id)
    }

    /// Crash recovery: every row still marked running belongs to a previous
    /// process life and will never report back. Fail them so dependents and
    /// category locks resolve deterministically. Returns the count.
    pub async fn mark_interrupted_running_tasks(&mut self) -> Result<usize> {
        let conn = self.get_connection()?;
        let count = db_tasks::mark_interrupted_running_tasks(conn)?;
        if count > 0 {
            info!(count, "Marked orphaned running tasks as failed after restart");
        }
        Ok(count)
    }

    /// Delete terminal tasks created before the cutoff. Returns the count.
    pub async fn delete_terminal_tasks_before(&mut self, cutoff: i64) -> Result<usize> {
        let conn = self.get_connection()?;
        db_tasks::delete_terminal_tasks_before(conn, cutoff)
    }

    /// Merge WAL changes back into the main database file.
    pub async fn checkpoint_wal(&mut self) -> Result<i64> {
        let conn = self.get_connection()?;
        let frames: i64 = conn.query_row(
            "PRAGMA wal_checkpoint(TRUNCATE)",
            [],
            |row| row.get(1),
        )?;
        debug!(frames, "WAL checkpoint complete");
        Ok(frames)
    }
}
