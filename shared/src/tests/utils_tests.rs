//! Tests for identifier validation
//!
//! These validators guard shell interpolation, so the interesting cases are
//! the hostile ones.

use crate::utils::{
    validate_account_name, validate_hostname, validate_link_name, validate_service_fmri,
    validate_zone_name,
};

#[test]
fn test_valid_zone_names() {
    assert!(validate_zone_name("web01").is_ok());
    assert!(validate_zone_name("build-zone.test").is_ok());
    assert!(validate_zone_name("0ad").is_ok());
}

#[test]
fn test_invalid_zone_names() {
    assert!(validate_zone_name("").is_err());
    assert!(validate_zone_name("global").is_err());
    assert!(validate_zone_name("-leading").is_err());
    assert!(validate_zone_name(".hidden").is_err());
    assert!(validate_zone_name("a".repeat(65).as_str()).is_err());
    // Shell metacharacters must never pass
    assert!(validate_zone_name("web01; rm -rf /").is_err());
    assert!(validate_zone_name("web01$(reboot)").is_err());
    assert!(validate_zone_name("web01`id`").is_err());
    assert!(validate_zone_name("web01 two").is_err());
}

#[test]
fn test_valid_link_names() {
    assert!(validate_link_name("vnic0").is_ok());
    assert!(validate_link_name("aggr1").is_ok());
    assert!(validate_link_name("internal_stub0").is_ok());
}

#[test]
fn test_invalid_link_names() {
    assert!(validate_link_name("").is_err());
    assert!(validate_link_name("0vnic").is_err());
    assert!(validate_link_name("vnic-0").is_err());
    assert!(validate_link_name("a".repeat(32).as_str()).is_err());
    assert!(validate_link_name("vnic0|cat").is_err());
}

#[test]
fn test_valid_account_names() {
    assert!(validate_account_name("operator").is_ok());
    assert!(validate_account_name("svc_backup").is_ok());
    assert!(validate_account_name("j.doe-2").is_ok());
}

#[test]
fn test_invalid_account_names() {
    assert!(validate_account_name("").is_err());
    assert!(validate_account_name("Root").is_err());
    assert!(validate_account_name("1user").is_err());
    assert!(validate_account_name("user name").is_err());
    assert!(validate_account_name("a".repeat(33).as_str()).is_err());
    assert!(validate_account_name("user;id").is_err());
}

#[test]
fn test_valid_hostnames() {
    assert!(validate_hostname("host1").is_ok());
    assert!(validate_hostname("host-1.example.com").is_ok());
}

#[test]
fn test_invalid_hostnames() {
    assert!(validate_hostname("").is_err());
    assert!(validate_hostname("-host").is_err());
    assert!(validate_hostname("host-").is_err());
    assert!(validate_hostname("ho st").is_err());
    assert!(validate_hostname(&format!("{}.com", "a".repeat(64))).is_err());
}

#[test]
fn test_service_fmri() {
    assert!(validate_service_fmri("network/ssh:default").is_ok());
    assert!(validate_service_fmri("svc:/system/filesystem/local:default").is_ok());
    assert!(validate_service_fmri("").is_err());
    assert!(validate_service_fmri("ssh; reboot").is_err());
}
