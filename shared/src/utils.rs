//! Utility functions for the host control plane
//!
//! Identifier validation lives here. Handlers interpolate operator-supplied
//! names into shell command strings; every name must pass a conservative
//! charset check first so a hostile value cannot smuggle shell syntax into
//! a privileged command.

use std::time::{SystemTime, UNIX_EPOCH};

/// Validate a zone name.
///
/// Zone names must start with an alphanumeric character and may contain
/// alphanumerics, underscores, hyphens and dots. The kernel limit is 64
/// characters; `global` is reserved and never a valid task target.
pub fn validate_zone_name(name: &str) -> crate::Result<()> {
    validate_identifier(name, "Zone name", 64)?;
    let first = name.chars().next().unwrap_or(' ');
    if !first.is_ascii_alphanumeric() {
        return Err(crate::HostError::Validation(
            "Zone name must start with an alphanumeric character".to_string(),
        )
        .into());
    }
    if name == "global" {
        return Err(
            crate::HostError::Validation("The global zone cannot be a task target".to_string())
                .into(),
        );
    }
    Ok(())
}

/// Validate a datalink name (vnic, aggregate, etherstub).
///
/// Link names must start with a letter, may contain alphanumerics and
/// underscores, and are limited to 31 characters by dladm.
pub fn validate_link_name(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(crate::HostError::Validation("Link name cannot be empty".to_string()).into());
    }
    if name.len() > 31 {
        return Err(crate::HostError::Validation(
            "Link name cannot be longer than 31 characters".to_string(),
        )
        .into());
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap();
    if !first.is_ascii_alphabetic() {
        return Err(
            crate::HostError::Validation("Link name must start with a letter".to_string()).into(),
        );
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(crate::HostError::Validation(
            "Link name can only contain alphanumeric characters and underscores".to_string(),
        )
        .into());
    }
    Ok(())
}

/// Validate a user, group or role name.
///
/// Account names must start with a lowercase letter and may contain
/// lowercase alphanumerics, underscores, hyphens and dots, up to 32
/// characters.
pub fn validate_account_name(name: &str) -> crate::Result<()> {
    if name.is_empty() {
        return Err(
            crate::HostError::Validation("Account name cannot be empty".to_string()).into(),
        );
    }
    if name.len() > 32 {
        return Err(crate::HostError::Validation(
            "Account name cannot be longer than 32 characters".to_string(),
        )
        .into());
    }
    let first = name.chars().next().unwrap();
    if !first.is_ascii_lowercase() {
        return Err(crate::HostError::Validation(
            "Account name must start with a lowercase letter".to_string(),
        )
        .into());
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' || c == '.')
    {
        return Err(crate::HostError::Validation(
            "Account name contains invalid characters".to_string(),
        )
        .into());
    }
    Ok(())
}

/// Validate a hostname per RFC 952/1123 label rules.
pub fn validate_hostname(name: &str) -> crate::Result<()> {
    if name.is_empty() || name.len() > 255 {
        return Err(crate::HostError::Validation(
            "Hostname must be between 1 and 255 characters".to_string(),
        )
        .into());
    }
    for label in name.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(crate::HostError::Validation(
                "Hostname labels must be between 1 and 63 characters".to_string(),
            )
            .into());
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(crate::HostError::Validation(
                "Hostname labels cannot start or end with a hyphen".to_string(),
            )
            .into());
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(crate::HostError::Validation(
                "Hostname contains invalid characters".to_string(),
            )
            .into());
        }
    }
    Ok(())
}

/// Validate an SMF service FMRI fragment (e.g. `network/ssh:default`).
pub fn validate_service_fmri(fmri: &str) -> crate::Result<()> {
    if fmri.is_empty() {
        return Err(
            crate::HostError::Validation("Service FMRI cannot be empty".to_string()).into(),
        );
    }
    if fmri.len() > 256 {
        return Err(crate::HostError::Validation(
            "Service FMRI cannot be longer than 256 characters".to_string(),
        )
        .into());
    }
    if !fmri
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | ':' | '.' | '_' | '-'))
    {
        return Err(crate::HostError::Validation(
            "Service FMRI contains invalid characters".to_string(),
        )
        .into());
    }
    Ok(())
}

/// Common charset check shared by the name validators.
fn validate_identifier(value: &str, what: &str, max_len: usize) -> crate::Result<()> {
    if value.is_empty() {
        return Err(crate::HostError::Validation(format!("{} cannot be empty", what)).into());
    }
    if value.len() > max_len {
        return Err(crate::HostError::Validation(format!(
            "{} cannot be longer than {} characters",
            what, max_len
        ))
        .into());
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(
            crate::HostError::Validation(format!("{} contains invalid characters", what)).into(),
        );
    }
    Ok(())
}

/// Get current Unix timestamp in seconds
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Get current Unix timestamp in milliseconds
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
