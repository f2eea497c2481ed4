//! Task queue scheduling for the host control plane
//!
//! The scheduler is a single cooperative driver: one loop that ticks every
//! couple of seconds, picks at most one eligible task per tick, and spawns
//! its handler as an independent activity. Handlers run concurrently up to
//! the configured cap; the driver itself never blocks on one.
//!
//! Four rules govern which pending task starts next:
//! 1. the concurrency cap must have a free slot,
//! 2. higher priority wins, oldest first within a priority,
//! 3. a task's dependency must be completed,
//! 4. a task whose operation category is already held waits.
//!
//! A pending task whose operation category is currently held is deferred:
//! the pick query skips every operation in a held category, so other work
//! keeps flowing while the blocked task waits its turn. Deferral never
//! reorders anything else; the moment the category frees up, the blocked
//! task is again the normal priority-ordered pick.
//!
//! The driver is the only writer of the running-task bookkeeping. Handlers
//! communicate exclusively through the completion channel, so no lock is
//! ever held across a handler await.

use anyhow::Result;
use shared::tasks::{category_of, created_by, priority, NewTask, Operation, OperationCategory};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::database::TaskDatabase;
use crate::executor::CommandExecutor;
use crate::orchestrator::OrchestrationState;
use crate::rebootflag::RebootFlag;
use crate::tasks::{TaskCompletion, TaskRunner};

/// Delay before the startup discovery task is enqueued.
const STARTUP_DISCOVERY_DELAY: Duration = Duration::from_secs(5);

/// How long `stop` waits for in-flight handlers before giving up.
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Scheduler tuning, extracted from the daemon configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrent_tasks: usize,
    pub tick_interval: Duration,
    pub channel_buffer_size: usize,
    pub auto_discovery: bool,
    pub discovery_interval: Duration,
    pub retention_days: u32,
    pub retention_sweep_interval: Duration,
    /// Tasks slower than this are logged as slow.
    pub slow_task_threshold: Duration,
}

impl SchedulerConfig {
    pub fn from_config(config: &shared::HostdConfig) -> Self {
        Self {
            max_concurrent_tasks: config.zones.max_concurrent_tasks,
            tick_interval: Duration::from_secs(config.zones.scheduler_tick_seconds),
            channel_buffer_size: config.zones.channel_buffer_size,
            auto_discovery: config.zones.auto_discovery,
            discovery_interval: Duration::from_secs(config.zones.discovery_interval_seconds),
            retention_days: config.retention.tasks_days,
            retention_sweep_interval: Duration::from_secs(config.retention.sweep_interval_seconds),
            slow_task_threshold: Duration::from_millis(config.logging.performance_threshold_ms),
        }
    }
}

/// Bookkeeping for one task this process is currently executing.
#[derive(Debug, Clone)]
pub struct RunningTask {
    pub operation: String,
    /// The category this task holds, recorded at start so release is exact
    /// even when several categorized tasks are in flight.
    pub category: Option<OperationCategory>,
}

/// Read-only view of the running set, shared with the API for stats.
pub type RunningTasks = Arc<RwLock<HashMap<i64, RunningTask>>>;

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// The task queue driver.
pub struct TaskScheduler {
    config: SchedulerConfig,
    database: Arc<Mutex<TaskDatabase>>,
    runner: TaskRunner,
    completion_receiver: mpsc::Receiver<TaskCompletion>,
    /// Shared with the API (read-only there); written only by this driver.
    running_tasks: RunningTasks,
    /// Categories currently held. Driver-local; derived data for the API
    /// comes from `running_tasks`.
    running_categories: HashSet<OperationCategory>,
    shutdown_receiver: broadcast::Receiver<()>,
    pub state: SchedulerState,
}

impl TaskScheduler {
    pub fn new(
        config: SchedulerConfig,
        database: Arc<Mutex<TaskDatabase>>,
        executor: CommandExecutor,
        reboot_flag: RebootFlag,
        orchestration: Arc<OrchestrationState>,
        shutdown_receiver: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let (completion_sender, completion_receiver) =
            mpsc::channel(config.channel_buffer_size);
        let runner = TaskRunner::new(
            completion_sender,
            database.clone(),
            executor,
            reboot_flag,
            orchestration,
        )?;

        Ok(Self {
            config,
            database,
            runner,
            completion_receiver,
            running_tasks: Arc::new(RwLock::new(HashMap::new())),
            running_categories: HashSet::new(),
            shutdown_receiver,
            state: SchedulerState::Stopped,
        })
    }

    /// Handle for the API's `/tasks/stats` endpoint.
    pub fn running_tasks_handle(&self) -> RunningTasks {
        self.running_tasks.clone()
    }

    /// Prepare the queue for this process life: reconcile rows orphaned by
    /// a crash and seed the startup discovery task.
    pub async fn start(&mut self) -> Result<()> {
        info!(
            max_concurrent = self.config.max_concurrent_tasks,
            tick_secs = self.config.tick_interval.as_secs(),
            "Starting task scheduler"
        );

        // Any row still `running` belongs to a previous process: its handler
        // is gone and its category would otherwise be leaked forever.
        {
            let mut db = self.database.lock().await;
            db.mark_interrupted_running_tasks().await?;
        }

        // Seed one discovery pass shortly after startup so the daemon knows
        // its zones without waiting for the periodic timer.
        let database = self.database.clone();
        tokio::spawn(async move {
            tokio::time::sleep(STARTUP_DISCOVERY_DELAY).await;
            let mut db = database.lock().await;
            match db
                .count_active_by_operation(Operation::Discover.as_str())
                .await
            {
                Ok(0) => {
                    let new_task = NewTask::internal(
                        Operation::Discover,
                        priority::BACKGROUND,
                        created_by::SYSTEM_STARTUP,
                    );
                    if let Err(e) = db.insert_task(&new_task).await {
                        warn!(error = %e, "Failed to enqueue startup discovery task");
                    } else {
                        debug!("Startup discovery task enqueued");
                    }
                }
                Ok(_) => debug!("Discovery already queued, skipping startup seed"),
                Err(e) => warn!(error = %e, "Failed to check for queued discovery"),
            }
        });

        self.state = SchedulerState::Running;
        Ok(())
    }

    /// The driver loop. Runs until a shutdown signal arrives, then drains
    /// in-flight work and returns.
    pub async fn run(&mut self) -> Result<()> {
        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The periodic timers must not fire immediately: discovery is
        // seeded separately at startup, and a retention sweep right after
        // boot would compete with recovery work.
        let mut discovery = interval_at(
            Instant::now() + self.config.discovery_interval,
            self.config.discovery_interval,
        );
        discovery.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut retention = interval_at(
            Instant::now() + self.config.retention_sweep_interval,
            self.config.retention_sweep_interval,
        );
        retention.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Task scheduler running");

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.process_tick().await;
                }
                Some(completion) = self.completion_receiver.recv() => {
                    self.handle_completion(completion).await;
                }
                _ = discovery.tick(), if self.config.auto_discovery => {
                    self.enqueue_periodic_discovery().await;
                }
                _ = retention.tick() => {
                    self.run_retention_sweep().await;
                }
                _ = self.shutdown_receiver.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.stop().await;
        Ok(())
    }

    /// One scheduling decision. At most one task starts per tick.
    pub async fn process_tick(&mut self) {
        // Completions first: a finished task may free the slot or category
        // this tick needs.
        while let Ok(completion) = self.completion_receiver.try_recv() {
            self.handle_completion(completion).await;
        }

        let running_count = self.running_tasks.read().await.len();
        if running_count >= self.config.max_concurrent_tasks {
            debug!(
                running = running_count,
                cap = self.config.max_concurrent_tasks,
                "Concurrency cap reached"
            );
            return;
        }

        // Operations in held categories are invisible to the pick; they
        // wait without blocking everything behind them.
        let excluded = shared::tasks::operations_in_categories(&self.running_categories);
        let candidate = {
            let mut db = self.database.lock().await;
            match db.find_one_eligible(&excluded).await {
                Ok(candidate) => candidate,
                Err(e) => {
                    error!(error = %e, "Eligibility query failed");
                    return;
                }
            }
        };
        let Some(task) = candidate else {
            return;
        };

        let category = category_of(&task.operation);
        if let Some(category) = category {
            // The exclusion list already filtered held categories; this is
            // the invariant check, not the mechanism.
            if self.running_categories.contains(&category) {
                debug!(
                    task_id = task.id,
                    operation = %task.operation,
                    category = %category,
                    "Waiting for category lock"
                );
                return;
            }
        }

        // Claim the row before any bookkeeping; if another process raced us
        // (or the row was cancelled between query and claim) this fails and
        // the tick ends.
        {
            let mut db = self.database.lock().await;
            if let Err(e) = db.mark_task_running(task.id).await {
                warn!(task_id = task.id, error = %e, "Failed to claim task");
                return;
            }
        }

        self.running_tasks.write().await.insert(
            task.id,
            RunningTask {
                operation: task.operation.clone(),
                category,
            },
        );
        if let Some(category) = category {
            self.running_categories.insert(category);
        }

        info!(
            task_id = task.id,
            operation = %task.operation,
            zone = %task.zone_label(),
            priority = task.priority,
            "Task started"
        );

        let runner = self.runner.clone();
        tokio::spawn(async move {
            runner.run_task(task).await;
        });
    }

    /// Post-handler continuation: record the terminal status and release
    /// the slot and category.
    pub async fn handle_completion(&mut self, completion: TaskCompletion) {
        let removed = self.running_tasks.write().await.remove(&completion.task_id);
        match &removed {
            Some(running) => {
                if let Some(category) = running.category {
                    self.running_categories.remove(&category);
                }
            }
            None => {
                // A completion for a task this driver never started should
                // not happen; log it rather than corrupt the category set.
                warn!(
                    task_id = completion.task_id,
                    "Completion for unknown running task"
                );
            }
        }

        let status = if completion.outcome.ok {
            shared::tasks::TaskStatus::Completed
        } else {
            shared::tasks::TaskStatus::Failed
        };
        {
            let mut db = self.database.lock().await;
            if let Err(e) = db
                .mark_task_finished(
                    completion.task_id,
                    status,
                    completion.outcome.error.as_deref(),
                )
                .await
            {
                error!(
                    task_id = completion.task_id,
                    error = %e,
                    "Failed to record task completion"
                );
            }
        }

        if completion.outcome.ok {
            info!(
                task_id = completion.task_id,
                operation = %completion.operation,
                duration_ms = completion.duration_ms as u64,
                message = completion.outcome.message.as_deref().unwrap_or(""),
                "Task completed"
            );
        } else {
            warn!(
                task_id = completion.task_id,
                operation = %completion.operation,
                duration_ms = completion.duration_ms as u64,
                error = completion.outcome.error.as_deref().unwrap_or("unknown error"),
                "Task failed"
            );
        }

        if completion.duration_ms > self.config.slow_task_threshold.as_millis() as f64 {
            warn!(
                task_id = completion.task_id,
                operation = %completion.operation,
                duration_ms = completion.duration_ms as u64,
                threshold_ms = self.config.slow_task_threshold.as_millis() as u64,
                "Slow task execution"
            );
        }
    }

    /// Periodic discovery insert. Skipped while one is already queued or
    /// running; discovery is idempotent but stacking them is pointless.
    async fn enqueue_periodic_discovery(&mut self) {
        let mut db = self.database.lock().await;
        match db
            .count_active_by_operation(Operation::Discover.as_str())
            .await
        {
            Ok(0) => {
                let new_task = NewTask::internal(
                    Operation::Discover,
                    priority::BACKGROUND,
                    created_by::SYSTEM_PERIODIC,
                );
                match db.insert_task(&new_task).await {
                    Ok(task) => debug!(task_id = task.id, "Periodic discovery task enqueued"),
                    Err(e) => warn!(error = %e, "Failed to enqueue periodic discovery"),
                }
            }
            Ok(_) => debug!("Discovery already active, skipping periodic insert"),
            Err(e) => warn!(error = %e, "Failed to check for active discovery"),
        }
    }

    /// Delete terminal tasks older than the retention window.
    async fn run_retention_sweep(&mut self) {
        let started = Instant::now();
        let cutoff = shared::utils::current_timestamp()
            - (self.config.retention_days as i64) * 24 * 3600;

        let mut db = self.database.lock().await;
        match db.delete_terminal_tasks_before(cutoff).await {
            Ok(deleted) => {
                if deleted > 0 {
                    info!(
                        deleted,
                        retention_days = self.config.retention_days,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Task retention sweep complete"
                    );
                    // Reclaim the deleted pages while we hold the writer.
                    if let Err(e) = db.checkpoint_wal().await {
                        warn!(error = %e, "Failed to checkpoint WAL after retention sweep");
                    }
                } else {
                    debug!("Task retention sweep found nothing to delete");
                }
            }
            Err(e) => warn!(error = %e, "Task retention sweep failed"),
        }
    }

    /// Graceful shutdown: wait briefly for in-flight handlers, recording
    /// their completions, then mark anything still running as interrupted.
    async fn stop(&mut self) {
        info!("Stopping task scheduler");
        self.state = SchedulerState::Stopped;

        let deadline = Instant::now() + GRACEFUL_SHUTDOWN_TIMEOUT;
        let mut check = tokio::time::interval(Duration::from_millis(100));
        loop {
            check.tick().await;

            while let Ok(completion) = self.completion_receiver.try_recv() {
                self.handle_completion(completion).await;
            }

            let still_running = self.running_tasks.read().await.len();
            if still_running == 0 {
                info!("All in-flight tasks completed");
                break;
            }
            if Instant::now() >= deadline {
                warn!(
                    still_running,
                    "Graceful shutdown timeout reached with tasks in flight"
                );
                // The next process start reconciles these rows.
                break;
            }
        }

        info!("Task scheduler stopped");
    }

    /// Checks if the scheduler is currently in the `Running` state.
    #[allow(dead_code)]
    pub fn is_running(&self) -> bool {
        self.state == SchedulerState::Running
    }
}
