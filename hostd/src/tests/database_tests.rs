//! Tests for the task record store
//!
//! Eligibility ordering, dependency gating, cancellation transitions,
//! filtering and retention are all store-level behaviors; the scheduler
//! builds directly on what these tests pin down.

use crate::database::{TaskDatabase, TaskFilter};
use crate::tests::support::new_task;
use shared::tasks::{NewTask, TaskStatus};
use tempfile::TempDir;

async fn open_db() -> (TaskDatabase, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut db = TaskDatabase::new(temp_dir.path(), 5).unwrap();
    db.initialize().await.unwrap();
    (db, temp_dir)
}

/// Backdate a row; inserts always stamp the current time.
fn set_created_at(db: &mut TaskDatabase, id: i64, created_at: i64) {
    let conn = db.get_connection().unwrap();
    conn.execute(
        "UPDATE tasks SET created_at = ?1, updated_at = ?1 WHERE id = ?2",
        rusqlite::params![created_at, id],
    )
    .unwrap();
}

#[tokio::test]
async fn test_insert_and_get() {
    let (mut db, _dir) = open_db().await;

    let task = db.insert_task(&new_task("discover", 10)).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.operation, "discover");
    assert_eq!(task.priority, 10);
    assert_eq!(task.progress_percent, 0.0);
    assert!(task.started_at.is_none());
    assert!(task.completed_at.is_none());

    let fetched = db.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(fetched.id, task.id);
    assert!(db.get_task(9999).await.unwrap().is_none());
}

#[tokio::test]
async fn test_eligibility_prefers_priority_then_age() {
    let (mut db, _dir) = open_db().await;

    let t1 = db.insert_task(&new_task("start", 50)).await.unwrap();
    let t2 = db.insert_task(&new_task("stop", 80)).await.unwrap();
    let t3 = db.insert_task(&new_task("restart", 50)).await.unwrap();
    // Make the tie explicit: t1 older than t3.
    set_created_at(&mut db, t1.id, 1000);
    set_created_at(&mut db, t3.id, 2000);

    let pick = db.find_one_eligible(&[]).await.unwrap().unwrap();
    assert_eq!(pick.id, t2.id, "highest priority first");

    db.mark_task_running(t2.id).await.unwrap();
    let pick = db.find_one_eligible(&[]).await.unwrap().unwrap();
    assert_eq!(pick.id, t1.id, "oldest wins within a priority");
}

#[tokio::test]
async fn test_eligibility_respects_dependencies() {
    let (mut db, _dir) = open_db().await;

    let a = db.insert_task(&new_task("create_aggregate", 50)).await.unwrap();
    let b = db
        .insert_task(&NewTask {
            depends_on: Some(a.id),
            ..new_task("modify_aggregate_links", 90)
        })
        .await
        .unwrap();

    // B outranks A but is gated on it.
    let pick = db.find_one_eligible(&[]).await.unwrap().unwrap();
    assert_eq!(pick.id, a.id);

    db.mark_task_running(a.id).await.unwrap();
    assert!(db.find_one_eligible(&[]).await.unwrap().is_none());

    db.mark_task_finished(a.id, TaskStatus::Completed, None)
        .await
        .unwrap();
    let pick = db.find_one_eligible(&[]).await.unwrap().unwrap();
    assert_eq!(pick.id, b.id);
}

#[tokio::test]
async fn test_dependents_of_failed_tasks_stay_pending() {
    let (mut db, _dir) = open_db().await;

    let a = db.insert_task(&new_task("pkg_install", 50)).await.unwrap();
    let b = db
        .insert_task(&NewTask {
            depends_on: Some(a.id),
            ..new_task("service_restart", 50)
        })
        .await
        .unwrap();

    db.mark_task_running(a.id).await.unwrap();
    db.mark_task_finished(a.id, TaskStatus::Failed, Some("boom"))
        .await
        .unwrap();

    // The dependent is never offered; resubmission is the caller's call.
    assert!(db.find_one_eligible(&[]).await.unwrap().is_none());
    let b = db.get_task(b.id).await.unwrap().unwrap();
    assert_eq!(b.status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_eligibility_excludes_given_operations() {
    let (mut db, _dir) = open_db().await;

    db.insert_task(&new_task("pkg_install", 90)).await.unwrap();
    let v = db.insert_task(&new_task("create_vnic", 30)).await.unwrap();

    // With the packaging family excluded, the lower-priority datalink task
    // is the pick.
    let excluded = ["pkg_install", "pkg_update", "pkg_uninstall"];
    let pick = db.find_one_eligible(&excluded).await.unwrap().unwrap();
    assert_eq!(pick.id, v.id);
}

#[tokio::test]
async fn test_running_transition_guards() {
    let (mut db, _dir) = open_db().await;

    let task = db.insert_task(&new_task("start", 50)).await.unwrap();
    db.mark_task_running(task.id).await.unwrap();

    let running = db.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(running.status, TaskStatus::Running);
    assert!(running.started_at.is_some());

    // Claiming a non-pending row must fail.
    assert!(db.mark_task_running(task.id).await.is_err());
}

#[tokio::test]
async fn test_completed_task_is_terminal_consistent() {
    let (mut db, _dir) = open_db().await;

    let task = db.insert_task(&new_task("discover", 10)).await.unwrap();
    db.mark_task_running(task.id).await.unwrap();
    // Handler reported partial progress, then succeeded without reaching
    // 100 itself.
    db.update_task_progress(task.id, 40.0, Some(r#"{"status":"working"}"#))
        .await
        .unwrap();
    db.mark_task_finished(task.id, TaskStatus::Completed, None)
        .await
        .unwrap();

    let done = db.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.progress_percent, 100.0);
    assert!(done.completed_at.is_some());
    assert!(done.error_message.is_none());
}

#[tokio::test]
async fn test_failed_task_keeps_error_and_progress() {
    let (mut db, _dir) = open_db().await;

    let task = db.insert_task(&new_task("pkg_update", 50)).await.unwrap();
    db.mark_task_running(task.id).await.unwrap();
    db.update_task_progress(task.id, 30.0, None).await.unwrap();
    db.mark_task_finished(task.id, TaskStatus::Failed, Some("image lock held"))
        .await
        .unwrap();

    let failed = db.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.error_message.as_deref(), Some("image lock held"));
    assert_eq!(failed.progress_percent, 30.0);
    assert!(failed.completed_at.is_some());
}

#[tokio::test]
async fn test_progress_is_clamped() {
    let (mut db, _dir) = open_db().await;

    let task = db.insert_task(&new_task("artifact_download_url", 50)).await.unwrap();
    db.update_task_progress(task.id, 150.0, None).await.unwrap();
    assert_eq!(
        db.get_task(task.id).await.unwrap().unwrap().progress_percent,
        100.0
    );
    db.update_task_progress(task.id, -5.0, None).await.unwrap();
    assert_eq!(
        db.get_task(task.id).await.unwrap().unwrap().progress_percent,
        0.0
    );
}

#[tokio::test]
async fn test_cancel_only_from_pending() {
    let (mut db, _dir) = open_db().await;

    let pending = db.insert_task(&new_task("start", 50)).await.unwrap();
    assert!(db.cancel_task(pending.id).await.unwrap());
    let cancelled = db.get_task(pending.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());

    // Cancelling again, or cancelling a running task, is refused.
    assert!(!db.cancel_task(pending.id).await.unwrap());

    let running = db.insert_task(&new_task("stop", 50)).await.unwrap();
    db.mark_task_running(running.id).await.unwrap();
    assert!(!db.cancel_task(running.id).await.unwrap());
    assert_eq!(
        db.get_task(running.id).await.unwrap().unwrap().status,
        TaskStatus::Running
    );
}

#[tokio::test]
async fn test_mark_interrupted_running_tasks() {
    let (mut db, _dir) = open_db().await;

    let orphan = db.insert_task(&new_task("pkg_install", 50)).await.unwrap();
    db.mark_task_running(orphan.id).await.unwrap();
    let untouched = db.insert_task(&new_task("start", 50)).await.unwrap();

    let count = db.mark_interrupted_running_tasks().await.unwrap();
    assert_eq!(count, 1);

    let orphan = db.get_task(orphan.id).await.unwrap().unwrap();
    assert_eq!(orphan.status, TaskStatus::Failed);
    assert_eq!(
        orphan.error_message.as_deref(),
        Some("interrupted by process restart")
    );
    assert!(orphan.completed_at.is_some());

    let untouched = db.get_task(untouched.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_filters_and_listing_order() {
    let (mut db, _dir) = open_db().await;

    let a = db
        .insert_task(&NewTask {
            zone_name: Some("web01".to_string()),
            ..new_task("start", 50)
        })
        .await
        .unwrap();
    let b = db.insert_task(&new_task("discover", 10)).await.unwrap();
    let c = db.insert_task(&new_task("pkg_install", 80)).await.unwrap();
    set_created_at(&mut db, a.id, 1000);
    set_created_at(&mut db, b.id, 2000);
    set_created_at(&mut db, c.id, 3000);

    // Newest first.
    let all = db.find_tasks(&TaskFilter::default()).await.unwrap();
    assert_eq!(
        all.iter().map(|t| t.id).collect::<Vec<_>>(),
        vec![c.id, b.id, a.id]
    );

    let by_zone = db
        .find_tasks(&TaskFilter {
            zone_name: Some("web01".to_string()),
            ..TaskFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(by_zone.len(), 1);
    assert_eq!(by_zone[0].id, a.id);

    let not_discover = db
        .find_tasks(&TaskFilter {
            operation_ne: Some("discover".to_string()),
            ..TaskFilter::default()
        })
        .await
        .unwrap();
    assert!(not_discover.iter().all(|t| t.operation != "discover"));
    assert_eq!(not_discover.len(), 2);

    // `since` is inclusive on updated_at.
    let since = db
        .find_tasks(&TaskFilter {
            since: Some(2000),
            ..TaskFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(
        since.iter().map(|t| t.id).collect::<Vec<_>>(),
        vec![c.id, b.id]
    );

    let limited = db
        .find_tasks(&TaskFilter {
            limit: Some(2),
            ..TaskFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);

    // Counting ignores the limit.
    let count = db
        .count_tasks(&TaskFilter {
            limit: Some(1),
            ..TaskFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(count, 3);
}

#[tokio::test]
async fn test_count_by_status_and_active_by_operation() {
    let (mut db, _dir) = open_db().await;

    let a = db.insert_task(&new_task("discover", 10)).await.unwrap();
    db.insert_task(&new_task("discover", 10)).await.unwrap();
    db.mark_task_running(a.id).await.unwrap();

    let counts = db.count_by_status().await.unwrap();
    assert_eq!(counts.get("running"), Some(&1));
    assert_eq!(counts.get("pending"), Some(&1));

    assert_eq!(db.count_active_by_operation("discover").await.unwrap(), 2);
    assert_eq!(db.count_active_by_operation("start").await.unwrap(), 0);
}

#[tokio::test]
async fn test_retention_deletes_only_old_terminal_rows() {
    let (mut db, _dir) = open_db().await;
    let now = shared::utils::current_timestamp();
    let forty_days_ago = now - 40 * 24 * 3600;

    // Ten old completed tasks, two fresh ones, one old but still pending.
    let mut old_ids = Vec::new();
    for _ in 0..10 {
        let task = db.insert_task(&new_task("discover", 10)).await.unwrap();
        db.mark_task_running(task.id).await.unwrap();
        db.mark_task_finished(task.id, TaskStatus::Completed, None)
            .await
            .unwrap();
        set_created_at(&mut db, task.id, forty_days_ago);
        old_ids.push(task.id);
    }
    let fresh_done = db.insert_task(&new_task("discover", 10)).await.unwrap();
    db.mark_task_running(fresh_done.id).await.unwrap();
    db.mark_task_finished(fresh_done.id, TaskStatus::Completed, None)
        .await
        .unwrap();
    let fresh_pending = db.insert_task(&new_task("start", 50)).await.unwrap();
    let old_pending = db.insert_task(&new_task("stop", 50)).await.unwrap();
    set_created_at(&mut db, old_pending.id, forty_days_ago);

    let cutoff = now - 30 * 24 * 3600;
    let deleted = db.delete_terminal_tasks_before(cutoff).await.unwrap();
    assert_eq!(deleted, 10);

    for id in old_ids {
        assert!(db.get_task(id).await.unwrap().is_none());
    }
    assert!(db.get_task(fresh_done.id).await.unwrap().is_some());
    assert!(db.get_task(fresh_pending.id).await.unwrap().is_some());
    // Pending rows are never retention targets, however old.
    assert!(db.get_task(old_pending.id).await.unwrap().is_some());
}
