//! Persistent reboot-required flag
//!
//! Some operations (boot environment activation, kernel-visible system
//! tunables) leave the host in a state where a reboot is pending. That fact
//! must survive daemon restarts and be visible out of band, so it lives in a
//! small JSON file rather than the task database. A real kernel boot clears
//! it: at startup the daemon compares the file's timestamp against the
//! kernel boot instant and deletes a stale flag.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// On-disk format of the flag file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RebootFlagFile {
    /// When the flag was last touched.
    timestamp: DateTime<Utc>,
    /// Why a reboot is pending. A set: repeated reasons collapse.
    reasons: BTreeSet<String>,
    /// Component that first raised the flag.
    created_by: String,
}

/// Snapshot returned by [`RebootFlag::get`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebootRequiredStatus {
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_minutes: Option<i64>,
}

impl RebootRequiredStatus {
    fn not_required() -> Self {
        Self {
            required: false,
            timestamp: None,
            reasons: Vec::new(),
            created_by: None,
            age_minutes: None,
        }
    }
}

/// Handle on the flag file path. All operations re-read the file; the flag
/// changes rarely and other processes may touch it.
#[derive(Debug, Clone)]
pub struct RebootFlag {
    path: PathBuf,
}

impl RebootFlag {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Record that `reason` requires a reboot. Unions into the existing
    /// reason set. Failures are logged, never fatal: a missing flag update
    /// must not fail the task that caused it.
    pub fn set(&self, reason: &str, component: &str) {
        let mut file = match self.read_file() {
            Ok(Some(existing)) => existing,
            Ok(None) => RebootFlagFile {
                timestamp: Utc::now(),
                reasons: BTreeSet::new(),
                created_by: component.to_string(),
            },
            Err(e) => {
                warn!(error = %e, "Unreadable reboot flag file, recreating");
                RebootFlagFile {
                    timestamp: Utc::now(),
                    reasons: BTreeSet::new(),
                    created_by: component.to_string(),
                }
            }
        };

        file.reasons.insert(reason.to_string());
        file.timestamp = Utc::now();

        if let Err(e) = self.write_file(&file) {
            warn!(error = %e, reason = %reason, "Failed to persist reboot-required flag");
        } else {
            info!(reason = %reason, component = %component, "Reboot-required flag set");
        }
    }

    /// Current flag state. A missing file means no reboot is pending.
    pub fn get(&self) -> RebootRequiredStatus {
        match self.read_file() {
            Ok(Some(file)) => {
                let age_minutes = (Utc::now() - file.timestamp).num_minutes();
                RebootRequiredStatus {
                    required: true,
                    timestamp: Some(file.timestamp),
                    reasons: file.reasons.iter().cloned().collect(),
                    created_by: Some(file.created_by),
                    age_minutes: Some(age_minutes),
                }
            }
            Ok(None) => RebootRequiredStatus::not_required(),
            Err(e) => {
                warn!(error = %e, "Failed to read reboot flag file");
                RebootRequiredStatus::not_required()
            }
        }
    }

    /// Drop the flag entirely.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Reboot-required flag cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to remove reboot flag file: {}", self.path.display())
            }),
        }
    }

    /// Remove a single reason. Deletes the file when the last reason goes.
    pub fn remove_reason(&self, reason: &str) -> Result<()> {
        let Some(mut file) = self.read_file()? else {
            return Ok(());
        };
        if !file.reasons.remove(reason) {
            return Ok(());
        }
        if file.reasons.is_empty() {
            self.clear()
        } else {
            file.timestamp = Utc::now();
            self.write_file(&file)?;
            info!(reason = %reason, "Removed reboot-required reason");
            Ok(())
        }
    }

    /// Called once at daemon startup. When the flag predates the current
    /// kernel boot the pending reboot already happened; delete the file.
    /// Returns true when a stale flag was cleared.
    pub fn check_and_clear_after_reboot(&self, boot_time: DateTime<Utc>) -> Result<bool> {
        let Some(file) = self.read_file()? else {
            return Ok(false);
        };
        if file.timestamp < boot_time {
            info!(
                flag_time = %file.timestamp,
                boot_time = %boot_time,
                reasons = ?file.reasons,
                "Reboot flag predates kernel boot, clearing"
            );
            self.clear()?;
            Ok(true)
        } else {
            debug!(
                flag_time = %file.timestamp,
                boot_time = %boot_time,
                "Reboot flag raised after boot, keeping"
            );
            Ok(false)
        }
    }

    fn read_file(&self) -> Result<Option<RebootFlagFile>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read reboot flag file: {}", self.path.display())
                })
            }
        };
        let file: RebootFlagFile = serde_json::from_str(&content)
            .with_context(|| format!("Malformed reboot flag file: {}", self.path.display()))?;
        Ok(Some(file))
    }

    /// Write via a temp file and rename so a crash mid-write cannot leave a
    /// truncated flag.
    fn write_file(&self, file: &RebootFlagFile) -> Result<()> {
        let content = serde_json::to_string_pretty(file)?;
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// Parse the kernel boot time from `kstat -p unix:0:system_misc:boot_time`
/// output (a tab-separated name/value pair with a Unix-seconds value).
pub fn parse_boot_time(kstat_output: &str) -> Option<DateTime<Utc>> {
    let value = kstat_output.split_whitespace().last()?;
    let secs: i64 = value.parse().ok()?;
    DateTime::from_timestamp(secs, 0)
}
