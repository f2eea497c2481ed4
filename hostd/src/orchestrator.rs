//! Zone shutdown orchestration
//!
//! Host shutdown, reboot and poweroff must bring down child zones in a
//! controlled order: low-priority zones (development, scratch) first,
//! infrastructure zones last. Each zone carries a `boot_priority` attribute
//! in its configuration; zones are bucketed by tens and the buckets are
//! processed in ascending order.
//!
//! The orchestrator invokes the zone-stop path directly rather than creating
//! tasks, so a full-host shutdown is not throttled by the task queue's
//! concurrency cap.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shared::config::OrchestrationSection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::executor::CommandExecutor;
use crate::task_zone;

/// Default priority for zones without a parseable priority attribute.
pub const DEFAULT_ZONE_PRIORITY: i32 = 95;

/// Gap between zone stops within a bucket under the staggered strategy.
const STAGGER_GAP: Duration = Duration::from_secs(2);

/// A zone as seen by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ZonePriority {
    pub name: String,
    pub state: String,
    pub priority: i32,
    /// Bucket this zone lands in: smallest multiple of 10 >= priority.
    pub priority_range: i32,
}

/// One shutdown bucket: all zones sharing a priority range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriorityGroup {
    pub range: i32,
    pub zones: Vec<ZonePriority>,
}

/// How zone stops are sequenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// One zone at a time, bucket order.
    Sequential,
    /// Buckets in order, zones within a bucket concurrently.
    ParallelByPriority,
    /// Buckets in order, zones within a bucket sequentially with a gap.
    Staggered,
}

impl Strategy {
    pub fn parse(s: &str) -> Option<Strategy> {
        match s {
            "sequential" => Some(Strategy::Sequential),
            "parallel_by_priority" => Some(Strategy::ParallelByPriority),
            "staggered" => Some(Strategy::Staggered),
            _ => None,
        }
    }
}

/// What to do when a zone refuses to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureAction {
    /// Stop processing and report failure; the system command is not issued.
    Abort,
    /// Keep stopping the remaining zones, report failures at the end.
    Continue,
}

impl FailureAction {
    pub fn parse(s: &str) -> Option<FailureAction> {
        match s {
            "abort" => Some(FailureAction::Abort),
            "continue" => Some(FailureAction::Continue),
            _ => None,
        }
    }
}

/// Effective orchestration parameters for one shutdown run.
#[derive(Debug, Clone)]
pub struct PlanConfig {
    pub strategy: Strategy,
    pub failure_action: FailureAction,
    pub priority_delay: Duration,
    pub zone_timeout: Duration,
}

impl PlanConfig {
    /// Derive a run configuration from the configured defaults, with
    /// optional per-task overrides from the host-control metadata.
    pub fn from_section(
        section: &OrchestrationSection,
        strategy_override: Option<&str>,
        failure_action_override: Option<&str>,
        priority_delay_override: Option<u64>,
        zone_timeout_override: Option<u64>,
    ) -> Self {
        let strategy = strategy_override
            .and_then(Strategy::parse)
            .or_else(|| Strategy::parse(&section.strategy))
            .unwrap_or(Strategy::ParallelByPriority);
        let failure_action = failure_action_override
            .and_then(FailureAction::parse)
            .or_else(|| FailureAction::parse(&section.failure_action))
            .unwrap_or(FailureAction::Continue);
        Self {
            strategy,
            failure_action,
            priority_delay: Duration::from_secs(
                priority_delay_override.unwrap_or(section.priority_delay_seconds),
            ),
            zone_timeout: Duration::from_secs(
                zone_timeout_override.unwrap_or(section.zone_timeout_seconds),
            ),
        }
    }
}

/// A failed zone stop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneFailure {
    pub zone: String,
    pub error: String,
}

/// Aggregate outcome of a shutdown plan run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownReport {
    pub success: bool,
    pub zones_stopped: Vec<String>,
    pub zones_failed: Vec<ZoneFailure>,
}

/// Runtime orchestration state shared between the API and the host-control
/// handlers: the enable toggle plus the configured defaults.
#[derive(Debug)]
pub struct OrchestrationState {
    enabled: AtomicBool,
    section: OrchestrationSection,
}

impl OrchestrationState {
    pub fn new(section: OrchestrationSection) -> Self {
        Self {
            enabled: AtomicBool::new(section.enabled),
            section,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
        info!("Zone shutdown orchestration enabled");
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
        info!("Zone shutdown orchestration disabled");
    }

    pub fn section(&self) -> &OrchestrationSection {
        &self.section
    }
}

/// Round a priority up to its bucket: 1..=10 -> 10, 11..=20 -> 20, etc.
/// Out-of-range priorities are clamped into [1, 100] first.
pub fn priority_range(priority: i32) -> i32 {
    let clamped = priority.clamp(1, 100);
    ((clamped + 9) / 10) * 10
}

/// Bucket zones for shutdown: ascending priority ranges, insertion order
/// preserved within a bucket.
pub fn calculate_shutdown_order(zones: &[(String, String, i32)]) -> Vec<PriorityGroup> {
    let mut entries: Vec<ZonePriority> = zones
        .iter()
        .map(|(name, state, priority)| ZonePriority {
            name: name.clone(),
            state: state.clone(),
            priority: *priority,
            priority_range: priority_range(*priority),
        })
        .collect();
    entries.sort_by_key(|z| z.priority_range);

    let mut groups: Vec<PriorityGroup> = Vec::new();
    for entry in entries {
        match groups.last_mut() {
            Some(group) if group.range == entry.priority_range => group.zones.push(entry),
            _ => groups.push(PriorityGroup {
                range: entry.priority_range,
                zones: vec![entry],
            }),
        }
    }
    groups
}

/// Startup order is the exact reverse of shutdown order: infrastructure
/// first, development last.
pub fn calculate_startup_order(zones: &[(String, String, i32)]) -> Vec<PriorityGroup> {
    let mut groups = calculate_shutdown_order(zones);
    groups.reverse();
    groups
}

/// Seam for stopping a single zone. Production uses the shell path; tests
/// inject failures.
pub trait ZoneStopper {
    fn stop_zone(
        &self,
        zone: &str,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<(), String>> + Send;
}

/// The real stopper: graceful zone shutdown with halt fallback, through the
/// command executor.
#[derive(Clone)]
pub struct ShellZoneStopper {
    executor: CommandExecutor,
}

impl ShellZoneStopper {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }
}

impl ZoneStopper for ShellZoneStopper {
    async fn stop_zone(&self, zone: &str, timeout: Duration) -> Result<(), String> {
        task_zone::stop_zone_shell(&self.executor, zone, timeout).await
    }
}

/// Drive a computed shutdown plan.
///
/// Buckets are strictly ordered; the configured strategy controls
/// sequencing inside each bucket. Returns the aggregate report; with
/// `FailureAction::Abort` the first failing bucket ends the run and later
/// buckets are untouched.
pub async fn execute_shutdown_plan<S: ZoneStopper>(
    stopper: &S,
    groups: &[PriorityGroup],
    config: &PlanConfig,
) -> ShutdownReport {
    let mut zones_stopped: Vec<String> = Vec::new();
    let mut zones_failed: Vec<ZoneFailure> = Vec::new();

    for (index, group) in groups.iter().enumerate() {
        if index > 0 && !config.priority_delay.is_zero() {
            debug!(
                range = group.range,
                delay_secs = config.priority_delay.as_secs(),
                "Pausing before next priority group"
            );
            tokio::time::sleep(config.priority_delay).await;
        }

        info!(
            range = group.range,
            zones = group.zones.len(),
            strategy = ?config.strategy,
            "Stopping priority group"
        );

        match config.strategy {
            Strategy::ParallelByPriority => {
                let stops = group.zones.iter().map(|zone| {
                    let name = zone.name.clone();
                    async move {
                        let result = stopper.stop_zone(&name, config.zone_timeout).await;
                        (name, result)
                    }
                });
                for (name, result) in futures_util::future::join_all(stops).await {
                    record_stop(&mut zones_stopped, &mut zones_failed, name, result);
                }
            }
            Strategy::Sequential | Strategy::Staggered => {
                for (zone_index, zone) in group.zones.iter().enumerate() {
                    if config.strategy == Strategy::Staggered && zone_index > 0 {
                        tokio::time::sleep(STAGGER_GAP).await;
                    }
                    let result = stopper.stop_zone(&zone.name, config.zone_timeout).await;
                    record_stop(
                        &mut zones_stopped,
                        &mut zones_failed,
                        zone.name.clone(),
                        result,
                    );
                    if !zones_failed.is_empty() && config.failure_action == FailureAction::Abort {
                        break;
                    }
                }
            }
        }

        if !zones_failed.is_empty() && config.failure_action == FailureAction::Abort {
            warn!(
                range = group.range,
                failed = zones_failed.len(),
                "Aborting shutdown plan after failed zone stop"
            );
            return ShutdownReport {
                success: false,
                zones_stopped,
                zones_failed,
            };
        }
    }

    ShutdownReport {
        success: zones_failed.is_empty(),
        zones_stopped,
        zones_failed,
    }
}

fn record_stop(
    stopped: &mut Vec<String>,
    failed: &mut Vec<ZoneFailure>,
    zone: String,
    result: Result<(), String>,
) {
    match result {
        Ok(()) => {
            info!(zone = %zone, "Zone stopped");
            stopped.push(zone);
        }
        Err(error) => {
            warn!(zone = %zone, error = %error, "Zone stop failed");
            failed.push(ZoneFailure { zone, error });
        }
    }
}

/// Query the live inventory of running non-global zones with their
/// priorities resolved.
pub async fn query_zone_priorities(executor: &CommandExecutor) -> Result<Vec<(String, String, i32)>> {
    let listing = executor
        .execute(&executor.privileged("zoneadm list -p"))
        .await;
    if !listing.ok {
        anyhow::bail!(
            "Failed to list zones: {}",
            listing.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    let mut zones = Vec::new();
    for record in task_zone::parse_zoneadm_list(&listing.stdout) {
        if record.name == "global" || record.state != "running" {
            continue;
        }
        let priority = lookup_zone_priority(executor, &record.name).await;
        zones.push((record.name, record.state, priority));
    }
    Ok(zones)
}

/// Resolve a zone's shutdown priority from its configuration attributes.
/// `boot_priority` wins, `shutdown_priority` is the fallback, anything
/// unparseable or out of range gets the default.
async fn lookup_zone_priority(executor: &CommandExecutor, zone: &str) -> i32 {
    for attr in ["boot_priority", "shutdown_priority"] {
        let command =
            executor.privileged(&format!("zonecfg -z {} info attr name={}", zone, attr));
        let result = executor.execute(&command).await;
        if !result.ok {
            continue;
        }
        if let Some(priority) = parse_priority_attr(&result.stdout) {
            return priority;
        }
    }
    DEFAULT_ZONE_PRIORITY
}

/// Pull the numeric value out of `zonecfg info attr` output. Expected shape:
///
/// ```text
/// attr:
///         name: boot_priority
///         type: string
///         value: 30
/// ```
///
/// Values outside [1, 100] are treated as unset.
pub fn parse_priority_attr(output: &str) -> Option<i32> {
    let value_line = regex::Regex::new(r#"(?m)^\s*value:\s*"?(-?\d+)"?\s*$"#)
        .expect("static regex is valid");
    let captures = value_line.captures(output)?;
    let priority: i32 = captures[1].parse().ok()?;
    if (1..=100).contains(&priority) {
        Some(priority)
    } else {
        None
    }
}

/// Produce the dry-run plan served by the orchestration test endpoint.
pub async fn compute_shutdown_plan(executor: &CommandExecutor) -> Result<Vec<PriorityGroup>> {
    let zones = query_zone_priorities(executor)
        .await
        .context("Failed to query zone inventory")?;
    Ok(calculate_shutdown_order(&zones))
}
