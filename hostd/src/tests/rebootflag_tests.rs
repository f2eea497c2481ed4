//! Tests for the persistent reboot-required flag

use crate::rebootflag::{parse_boot_time, RebootFlag};
use chrono::{Duration, Utc};
use tempfile::TempDir;

fn flag_in(temp_dir: &TempDir) -> RebootFlag {
    RebootFlag::new(temp_dir.path().join("reboot-required"))
}

#[test]
fn test_absent_file_means_not_required() {
    let temp_dir = TempDir::new().unwrap();
    let flag = flag_in(&temp_dir);

    let status = flag.get();
    assert!(!status.required);
    assert!(status.reasons.is_empty());
    assert!(status.timestamp.is_none());
}

#[test]
fn test_set_and_get() {
    let temp_dir = TempDir::new().unwrap();
    let flag = flag_in(&temp_dir);

    flag.set("kernel patch applied", "task_pkg");
    let status = flag.get();
    assert!(status.required);
    assert_eq!(status.reasons, vec!["kernel patch applied".to_string()]);
    assert_eq!(status.created_by.as_deref(), Some("task_pkg"));
    assert_eq!(status.age_minutes, Some(0));
}

#[test]
fn test_set_is_idempotent_per_reason() {
    let temp_dir = TempDir::new().unwrap();
    let flag = flag_in(&temp_dir);

    flag.set("be activated", "task_pkg");
    flag.set("be activated", "task_pkg");
    let status = flag.get();
    assert_eq!(status.reasons.len(), 1);
}

#[test]
fn test_reasons_union_and_removal() {
    let temp_dir = TempDir::new().unwrap();
    let flag = flag_in(&temp_dir);

    flag.set("reason one", "a");
    flag.set("reason two", "b");
    let status = flag.get();
    assert_eq!(status.reasons.len(), 2);

    flag.remove_reason("reason one").unwrap();
    let status = flag.get();
    assert!(status.required);
    assert_eq!(status.reasons, vec!["reason two".to_string()]);

    // Dropping the last reason deletes the file entirely.
    flag.remove_reason("reason two").unwrap();
    let status = flag.get();
    assert!(!status.required);
}

#[test]
fn test_remove_unknown_reason_is_noop() {
    let temp_dir = TempDir::new().unwrap();
    let flag = flag_in(&temp_dir);

    flag.set("real reason", "a");
    flag.remove_reason("never set").unwrap();
    assert!(flag.get().required);

    // Removing from a missing file is also fine.
    flag.clear().unwrap();
    flag.remove_reason("anything").unwrap();
}

#[test]
fn test_clear() {
    let temp_dir = TempDir::new().unwrap();
    let flag = flag_in(&temp_dir);

    flag.set("x", "a");
    flag.clear().unwrap();
    assert!(!flag.get().required);
    // Clearing twice must not error.
    flag.clear().unwrap();
}

#[test]
fn test_boot_after_flag_clears_it() {
    let temp_dir = TempDir::new().unwrap();
    let flag = flag_in(&temp_dir);

    flag.set("pending kernel update", "task_pkg");
    // The kernel booted after the flag was written: the reboot happened.
    let boot_time = Utc::now() + Duration::minutes(5);
    let cleared = flag.check_and_clear_after_reboot(boot_time).unwrap();
    assert!(cleared);
    assert!(!flag.get().required);
}

#[test]
fn test_flag_newer_than_boot_is_kept() {
    let temp_dir = TempDir::new().unwrap();
    let flag = flag_in(&temp_dir);

    flag.set("set after boot", "task_system");
    // The kernel booted an hour ago; the flag is newer and must survive.
    let boot_time = Utc::now() - Duration::hours(1);
    let cleared = flag.check_and_clear_after_reboot(boot_time).unwrap();
    assert!(!cleared);
    assert!(flag.get().required);
}

#[test]
fn test_check_with_no_flag_is_noop() {
    let temp_dir = TempDir::new().unwrap();
    let flag = flag_in(&temp_dir);
    let cleared = flag.check_and_clear_after_reboot(Utc::now()).unwrap();
    assert!(!cleared);
}

#[test]
fn test_parse_boot_time() {
    let parsed = parse_boot_time("unix:0:system_misc:boot_time\t1700000000").unwrap();
    assert_eq!(parsed.timestamp(), 1_700_000_000);

    assert!(parse_boot_time("").is_none());
    assert!(parse_boot_time("unix:0:system_misc:boot_time\tnot-a-number").is_none());
}
