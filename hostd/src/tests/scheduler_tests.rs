//! Tests for the task queue scheduler
//!
//! These drive `process_tick` directly, one decision at a time. The
//! running-set bookkeeping only changes inside ticks, so assertions
//! between ticks observe stable state. Tasks that must stay in flight
//! download from a listener that never responds.

use crate::scheduler::{SchedulerConfig, TaskScheduler};
use crate::tests::support::{
    hanging_download_metadata, hanging_http_server, new_task, test_database, test_executor,
    test_orchestration, test_reboot_flag,
};
use shared::tasks::{NewTask, TaskStatus};
use std::time::Duration;
use tempfile::TempDir;

fn scheduler_config(max_concurrent: usize) -> SchedulerConfig {
    SchedulerConfig {
        max_concurrent_tasks: max_concurrent,
        tick_interval: Duration::from_secs(2),
        channel_buffer_size: 64,
        auto_discovery: false,
        discovery_interval: Duration::from_secs(300),
        retention_days: 30,
        retention_sweep_interval: Duration::from_secs(3600),
        slow_task_threshold: Duration::from_secs(60),
    }
}

struct Harness {
    scheduler: TaskScheduler,
    database: std::sync::Arc<tokio::sync::Mutex<crate::database::TaskDatabase>>,
    _db_dir: TempDir,
    _flag_dir: TempDir,
    _shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

async fn harness(max_concurrent: usize) -> Harness {
    let (database, db_dir) = test_database().await;
    let flag_dir = TempDir::new().unwrap();
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let scheduler = TaskScheduler::new(
        scheduler_config(max_concurrent),
        database.clone(),
        test_executor(),
        test_reboot_flag(&flag_dir),
        test_orchestration(),
        shutdown_rx,
    )
    .unwrap();
    Harness {
        scheduler,
        database,
        _db_dir: db_dir,
        _flag_dir: flag_dir,
        _shutdown_tx: shutdown_tx,
    }
}

impl Harness {
    async fn insert(&self, task: NewTask) -> i64 {
        let mut db = self.database.lock().await;
        db.insert_task(&task).await.unwrap().id
    }

    async fn status_of(&self, id: i64) -> TaskStatus {
        let mut db = self.database.lock().await;
        db.get_task(id).await.unwrap().unwrap().status
    }

    async fn running_ids(&self) -> Vec<i64> {
        let handle = self.scheduler.running_tasks_handle();
        let running = handle.read().await;
        let mut ids: Vec<i64> = running.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Tick until the given task reaches a terminal status (its handler
    /// failed or finished and the completion was drained).
    async fn tick_until_terminal(&mut self, id: i64, max_iterations: usize) {
        for _ in 0..max_iterations {
            if self.status_of(id).await.is_terminal() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.scheduler.process_tick().await;
        }
        panic!("task {} never reached a terminal status", id);
    }
}

#[tokio::test]
async fn test_priority_order_under_cap() {
    let mut h = harness(2).await;
    let (url, _server) = hanging_http_server().await;
    let scratch = TempDir::new().unwrap();

    let t1 = h
        .insert(NewTask {
            metadata: Some(hanging_download_metadata(&url, &scratch, "t1")),
            ..new_task("artifact_download_url", 50)
        })
        .await;
    let t2 = h
        .insert(NewTask {
            metadata: Some(hanging_download_metadata(&url, &scratch, "t2")),
            ..new_task("artifact_download_url", 80)
        })
        .await;
    let t3 = h
        .insert(NewTask {
            metadata: Some(hanging_download_metadata(&url, &scratch, "t3")),
            ..new_task("artifact_download_url", 50)
        })
        .await;

    // Highest priority starts first.
    h.scheduler.process_tick().await;
    assert_eq!(h.running_ids().await, vec![t2]);
    assert_eq!(h.status_of(t2).await, TaskStatus::Running);

    // Then the older of the two equal-priority tasks.
    h.scheduler.process_tick().await;
    assert_eq!(h.running_ids().await, vec![t1, t2]);

    // Cap reached: the third task stays pending.
    h.scheduler.process_tick().await;
    h.scheduler.process_tick().await;
    assert_eq!(h.running_ids().await.len(), 2);
    assert_eq!(h.status_of(t3).await, TaskStatus::Pending);
}

#[tokio::test]
async fn test_concurrency_cap_never_exceeded() {
    let mut h = harness(3).await;
    let (url, _server) = hanging_http_server().await;
    let scratch = TempDir::new().unwrap();

    for i in 0..8 {
        h.insert(NewTask {
            metadata: Some(hanging_download_metadata(&url, &scratch, &format!("f{}", i))),
            ..new_task("artifact_download_url", 50)
        })
        .await;
    }

    for _ in 0..10 {
        h.scheduler.process_tick().await;
        assert!(h.running_ids().await.len() <= 3);
    }
    assert_eq!(h.running_ids().await.len(), 3);
}

#[tokio::test]
async fn test_category_exclusion_serialises_package_ops() {
    let mut h = harness(4).await;

    // Insertion order matches the scenario: the lower-priority install
    // first, then the higher-priority update.
    let u1 = h.insert(new_task("pkg_install", 50)).await;
    let u2 = h.insert(new_task("pkg_update", 90)).await;

    h.scheduler.process_tick().await;
    assert_eq!(h.running_ids().await, vec![u2]);
    assert_eq!(h.status_of(u1).await, TaskStatus::Pending);

    // The category admits one holder: the running set must never contain
    // both packaging tasks, on this tick or any later one.
    h.scheduler.process_tick().await;
    let running = h.running_ids().await;
    assert!(!(running.contains(&u1) && running.contains(&u2)));

    h.tick_until_terminal(u2, 200).await;
    let u2_completed = {
        let mut db = h.database.lock().await;
        db.get_task(u2).await.unwrap().unwrap().completed_at.unwrap()
    };

    // With the category free the install may start; it must never have
    // started before the update finished.
    h.tick_until_terminal(u1, 200).await;
    let u1_started = {
        let mut db = h.database.lock().await;
        db.get_task(u1).await.unwrap().unwrap().started_at.unwrap()
    };
    assert!(u1_started >= u2_completed);
}

#[tokio::test]
async fn test_independent_category_runs_alongside() {
    let mut h = harness(4).await;

    let u1 = h.insert(new_task("pkg_install", 50)).await;
    let u2 = h.insert(new_task("pkg_update", 90)).await;
    let v = h.insert(new_task("create_vnic", 30)).await;

    // Two back-to-back decisions: the update starts first, then — with the
    // packaging category held deferring the install — the lower-priority
    // datalink task starts alongside it.
    h.scheduler.process_tick().await;
    h.scheduler.process_tick().await;

    let running = h.running_ids().await;
    assert!(running.contains(&u2));
    assert!(running.contains(&v));
    assert_eq!(h.status_of(u1).await, TaskStatus::Pending);
}

#[tokio::test]
async fn test_dependency_gates_until_predecessor_terminal() {
    let mut h = harness(4).await;

    let a = h.insert(new_task("create_aggregate", 50)).await;
    let b = h
        .insert(NewTask {
            depends_on: Some(a),
            ..new_task("modify_aggregate_links", 90)
        })
        .await;

    h.scheduler.process_tick().await;
    assert_eq!(h.running_ids().await, vec![a]);
    assert_eq!(h.status_of(b).await, TaskStatus::Pending);

    // The aggregate command fails on this host, so A ends failed; the
    // dependent must then stay pending forever.
    h.tick_until_terminal(a, 200).await;
    assert_eq!(h.status_of(a).await, TaskStatus::Failed);

    for _ in 0..5 {
        h.scheduler.process_tick().await;
    }
    assert_eq!(h.status_of(b).await, TaskStatus::Pending);
}

#[tokio::test]
async fn test_unknown_operation_marked_failed() {
    let mut h = harness(2).await;

    let id = h.insert(new_task("carrier_pigeon", 50)).await;
    h.scheduler.process_tick().await;
    h.tick_until_terminal(id, 200).await;

    let mut db = h.database.lock().await;
    let task = db.get_task(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(
        task.error_message.as_deref(),
        Some("Unknown operation: carrier_pigeon")
    );
    assert!(task.completed_at.is_some());
}

#[tokio::test]
async fn test_successful_task_completes_with_full_progress() {
    let mut h = harness(2).await;
    let scratch = TempDir::new().unwrap();
    let file_path = scratch.path().join("artifact.bin");
    tokio::fs::write(&file_path, b"payload").await.unwrap();

    let id = h
        .insert(NewTask {
            metadata: Some(
                serde_json::json!({ "path": file_path.to_str().unwrap() }).to_string(),
            ),
            ..new_task("artifact_delete", 50)
        })
        .await;

    h.scheduler.process_tick().await;
    h.tick_until_terminal(id, 200).await;

    let mut db = h.database.lock().await;
    let task = db.get_task(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress_percent, 100.0);
    assert!(task.error_message.is_none());
    assert!(task.completed_at.is_some());
    assert!(!file_path.exists());
}

#[tokio::test]
async fn test_category_released_after_completion() {
    let mut h = harness(2).await;

    let first = h.insert(new_task("create_vnic", 50)).await;
    h.scheduler.process_tick().await;
    assert_eq!(h.running_ids().await, vec![first]);

    // The vnic command fails on this host; once the completion is drained
    // the datalink category must be free for the next task.
    h.tick_until_terminal(first, 200).await;

    let second = h.insert(new_task("create_etherstub", 50)).await;
    for _ in 0..50 {
        if h.status_of(second).await != TaskStatus::Pending {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        h.scheduler.process_tick().await;
    }
    assert_ne!(h.status_of(second).await, TaskStatus::Pending);
}

#[tokio::test]
async fn test_start_reconciles_orphaned_running_rows() {
    let mut h = harness(2).await;

    let orphan = h.insert(new_task("pkg_install", 50)).await;
    {
        let mut db = h.database.lock().await;
        db.mark_task_running(orphan).await.unwrap();
    }

    // A fresh start treats the row as interrupted by a crash.
    h.scheduler.start().await.unwrap();

    let mut db = h.database.lock().await;
    let task = db.get_task(orphan).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(
        task.error_message.as_deref(),
        Some("interrupted by process restart")
    );
}

#[tokio::test]
async fn test_cancelled_task_is_never_picked() {
    let mut h = harness(2).await;

    let id = h.insert(new_task("start", 50)).await;
    {
        let mut db = h.database.lock().await;
        assert!(db.cancel_task(id).await.unwrap());
    }

    h.scheduler.process_tick().await;
    assert!(h.running_ids().await.is_empty());
    assert_eq!(h.status_of(id).await, TaskStatus::Cancelled);
}
