//! Tests for the task model: status transitions, operation parsing and
//! category mapping

use crate::tasks::{category_of, priority, Operation, OperationCategory, TaskStatus};

#[test]
fn test_status_string_round_trip() {
    let all = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];
    for status in all {
        assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
    }
    assert_eq!(TaskStatus::parse("exploded"), None);
}

#[test]
fn test_terminal_states() {
    assert!(!TaskStatus::Pending.is_terminal());
    assert!(!TaskStatus::Running.is_terminal());
    assert!(TaskStatus::Completed.is_terminal());
    assert!(TaskStatus::Failed.is_terminal());
    assert!(TaskStatus::Cancelled.is_terminal());
}

#[test]
fn test_operation_string_round_trip() {
    // Spot-check representatives of each family, then verify the parse
    // table agrees with as_str for every one of them.
    let ops = [
        Operation::Discover,
        Operation::Stop,
        Operation::ZoneDelete,
        Operation::CreateVnic,
        Operation::ModifyAggregateLinks,
        Operation::CreateIpAddress,
        Operation::PkgInstall,
        Operation::BeadmActivate,
        Operation::RepositoryAdd,
        Operation::UserCreate,
        Operation::RoleDelete,
        Operation::ServiceRestart,
        Operation::SetHostname,
        Operation::SystemHostShutdown,
        Operation::ArtifactDownloadUrl,
    ];
    for op in ops {
        assert_eq!(Operation::parse(op.as_str()), Some(op), "{}", op);
    }
    assert_eq!(Operation::parse("launch_missiles"), None);
}

#[test]
fn test_operation_serde_matches_as_str() {
    // The serde rename and the manual string table must agree; the database
    // stores as_str while API payloads go through serde.
    for op in [
        Operation::CreateVnic,
        Operation::PkgUpdate,
        Operation::SystemHostPoweroff,
        Operation::ArtifactDelete,
    ] {
        let json = serde_json::to_string(&op).unwrap();
        assert_eq!(json, format!("\"{}\"", op.as_str()));
        let back: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }
}

#[test]
fn test_category_mapping() {
    assert_eq!(
        Operation::PkgInstall.category(),
        Some(OperationCategory::PackageManagement)
    );
    assert_eq!(
        Operation::PkgUpdate.category(),
        Some(OperationCategory::PackageManagement)
    );
    assert_eq!(
        Operation::BeadmCreate.category(),
        Some(OperationCategory::PackageManagement)
    );
    assert_eq!(
        Operation::CreateVnic.category(),
        Some(OperationCategory::NetworkDatalink)
    );
    assert_eq!(
        Operation::CreateIpAddress.category(),
        Some(OperationCategory::NetworkIp)
    );
    assert_eq!(
        Operation::SetHostname.category(),
        Some(OperationCategory::SystemConfig)
    );
    assert_eq!(
        Operation::UserCreate.category(),
        Some(OperationCategory::UserManagement)
    );

    // Zone lifecycle, services and artifacts run freely concurrent.
    assert_eq!(Operation::Start.category(), None);
    assert_eq!(Operation::Discover.category(), None);
    assert_eq!(Operation::ServiceRestart.category(), None);
    assert_eq!(Operation::ArtifactDownloadUrl.category(), None);
    assert_eq!(Operation::SystemHostShutdown.category(), None);
}

#[test]
fn test_category_of_raw_tag() {
    assert_eq!(
        category_of("pkg_install"),
        Some(OperationCategory::PackageManagement)
    );
    assert_eq!(category_of("discover"), None);
    assert_eq!(category_of("not_an_operation"), None);
}

#[test]
fn test_priority_band_ordering() {
    assert!(priority::BACKGROUND < priority::NORMAL);
    assert!(priority::NORMAL < priority::HIGH);
    assert!(priority::HIGH < priority::CRITICAL);
}
