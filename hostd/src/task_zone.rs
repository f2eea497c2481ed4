//! Zone lifecycle handlers
//!
//! Start, stop, restart, delete and discovery of illumos zones. All state
//! changes go through `zoneadm`/`zonecfg`; this module also owns the parser
//! for `zoneadm list -p` output used by discovery and the shutdown
//! orchestrator.

use serde::Deserialize;
use shared::utils::validate_zone_name;
use std::time::Duration;
use tracing::{debug, info};

use crate::executor::CommandExecutor;
use crate::tasks::{require_params, HandlerOutcome, TaskContext};

/// Extra margin the executor gets beyond the graceful zone shutdown window,
/// so the halt fallback still fits inside one command invocation.
const STOP_COMMAND_MARGIN: Duration = Duration::from_secs(30);

/// One record from `zoneadm list -p` (colon-separated:
/// `id:name:state:path:uuid:brand:ip-type`).
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneRecord {
    pub id: Option<i64>,
    pub name: String,
    pub state: String,
    pub path: String,
    pub uuid: String,
    pub brand: String,
    pub ip_type: String,
}

/// Parse `zoneadm list -p` output. Unparseable lines are skipped; the
/// command occasionally emits warnings on stderr but its stdout format is
/// stable.
pub fn parse_zoneadm_list(output: &str) -> Vec<ZoneRecord> {
    let mut records = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 7 {
            debug!(line = %line, "Skipping malformed zoneadm list line");
            continue;
        }
        records.push(ZoneRecord {
            id: fields[0].parse().ok(),
            name: fields[1].to_string(),
            state: fields[2].to_string(),
            path: fields[3].to_string(),
            uuid: fields[4].to_string(),
            brand: fields[5].to_string(),
            ip_type: fields[6].to_string(),
        });
    }
    records
}

/// Current state of one zone, or None when it does not exist.
pub async fn zone_state(executor: &CommandExecutor, zone: &str) -> Option<String> {
    let result = executor
        .execute(&executor.privileged("zoneadm list -pc"))
        .await;
    if !result.ok {
        return None;
    }
    parse_zoneadm_list(&result.stdout)
        .into_iter()
        .find(|record| record.name == zone)
        .map(|record| record.state)
}

/// Gracefully stop a zone, falling back to a hard halt when the graceful
/// path fails or stalls. Shared by the stop handler and the shutdown
/// orchestrator.
pub async fn stop_zone_shell(
    executor: &CommandExecutor,
    zone: &str,
    timeout: Duration,
) -> Result<(), String> {
    if let Err(e) = validate_zone_name(zone) {
        return Err(e.to_string());
    }

    let graceful = executor.privileged(&format!("zoneadm -z {} shutdown", zone));
    let result = executor
        .execute_with_timeout(&graceful, timeout + STOP_COMMAND_MARGIN)
        .await;
    if result.ok {
        return Ok(());
    }
    let graceful_error = result
        .error
        .unwrap_or_else(|| "graceful shutdown failed".to_string());
    info!(zone = %zone, error = %graceful_error, "Graceful shutdown failed, halting");

    let halt = executor.privileged(&format!("zoneadm -z {} halt", zone));
    let result = executor
        .execute_with_timeout(&halt, Duration::from_secs(30))
        .await;
    if result.ok {
        Ok(())
    } else {
        Err(format!(
            "shutdown failed ({}); halt failed ({})",
            graceful_error,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

fn target_zone(ctx: &TaskContext) -> Result<String, HandlerOutcome> {
    let Some(zone) = ctx.zone_name() else {
        return Err(HandlerOutcome::failure("Task has no target zone"));
    };
    if let Err(e) = validate_zone_name(zone) {
        return Err(HandlerOutcome::failure(e.to_string()));
    }
    Ok(zone.to_string())
}

/// Inventory the host's zones. Idempotent by design; the scheduler enqueues
/// this periodically and at startup.
pub async fn discover(_metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let executor = ctx.executor();
    let result = executor
        .execute(&executor.privileged("zoneadm list -pc"))
        .await;
    if !result.ok {
        return HandlerOutcome::failure(format!(
            "Failed to list zones: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ));
    }

    let records = parse_zoneadm_list(&result.stdout);
    ctx.update_progress(
        50.0,
        Some(serde_json::json!({
            "status": "inventory_collected",
            "zone_count": records.len(),
        })),
    )
    .await;

    let zones: Vec<serde_json::Value> = records
        .iter()
        .filter(|record| record.name != "global")
        .map(|record| {
            serde_json::json!({
                "name": record.name,
                "state": record.state,
                "brand": record.brand,
                "path": record.path,
                "uuid": record.uuid,
            })
        })
        .collect();

    info!(zone_count = zones.len(), "Zone discovery complete");
    HandlerOutcome::success_with(
        format!("Discovered {} zones", zones.len()),
        serde_json::json!({ "zones": zones }),
    )
}

pub async fn start(_metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let zone = match target_zone(ctx) {
        Ok(zone) => zone,
        Err(outcome) => return outcome,
    };
    let executor = ctx.executor();

    match zone_state(executor, &zone).await.as_deref() {
        None => return HandlerOutcome::failure(format!("Zone {} does not exist", zone)),
        Some("running") => {
            return HandlerOutcome::failure(format!("Zone {} is already running", zone))
        }
        Some(_) => {}
    }

    let result = executor
        .execute(&executor.privileged(&format!("zoneadm -z {} boot", zone)))
        .await;
    if result.ok {
        HandlerOutcome::success(format!("Zone {} started", zone))
    } else {
        HandlerOutcome::failure(format!(
            "Failed to start zone {}: {}",
            zone,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

#[derive(Debug, Deserialize)]
struct StopParams {
    /// Graceful shutdown window in seconds before falling back to halt.
    #[serde(default = "default_stop_timeout")]
    timeout_seconds: u64,
}

fn default_stop_timeout() -> u64 {
    60
}

pub async fn stop(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: StopParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    let zone = match target_zone(ctx) {
        Ok(zone) => zone,
        Err(outcome) => return outcome,
    };
    let executor = ctx.executor();

    match zone_state(executor, &zone).await.as_deref() {
        None => return HandlerOutcome::failure(format!("Zone {} does not exist", zone)),
        Some("running") => {}
        Some(state) => {
            return HandlerOutcome::failure(format!(
                "Zone {} is not running (state: {})",
                zone, state
            ))
        }
    }

    match stop_zone_shell(executor, &zone, Duration::from_secs(params.timeout_seconds)).await {
        Ok(()) => HandlerOutcome::success(format!("Zone {} stopped", zone)),
        Err(e) => HandlerOutcome::failure(format!("Failed to stop zone {}: {}", zone, e)),
    }
}

pub async fn restart(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: StopParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    let zone = match target_zone(ctx) {
        Ok(zone) => zone,
        Err(outcome) => return outcome,
    };
    let executor = ctx.executor();

    match zone_state(executor, &zone).await.as_deref() {
        None => return HandlerOutcome::failure(format!("Zone {} does not exist", zone)),
        Some("running") => {
            if let Err(e) =
                stop_zone_shell(executor, &zone, Duration::from_secs(params.timeout_seconds)).await
            {
                return HandlerOutcome::failure(format!("Failed to stop zone {}: {}", zone, e));
            }
            ctx.update_progress(50.0, Some(serde_json::json!({ "status": "stopped" })))
                .await;
        }
        // A stopped zone restarts by just booting.
        Some(_) => {}
    }

    let result = executor
        .execute(&executor.privileged(&format!("zoneadm -z {} boot", zone)))
        .await;
    if result.ok {
        HandlerOutcome::success(format!("Zone {} restarted", zone))
    } else {
        HandlerOutcome::failure(format!(
            "Failed to boot zone {}: {}",
            zone,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

#[derive(Debug, Deserialize)]
struct ZoneDeleteParams {
    /// Also uninstall the zone's storage before deleting its configuration.
    #[serde(default = "default_true")]
    uninstall: bool,
}

fn default_true() -> bool {
    true
}

pub async fn zone_delete(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: ZoneDeleteParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    let zone = match target_zone(ctx) {
        Ok(zone) => zone,
        Err(outcome) => return outcome,
    };
    let executor = ctx.executor();

    match zone_state(executor, &zone).await.as_deref() {
        None => return HandlerOutcome::failure(format!("Zone {} does not exist", zone)),
        Some("running") => {
            return HandlerOutcome::failure(format!(
                "Zone {} is running; stop it before deleting",
                zone
            ))
        }
        Some(_) => {}
    }

    if params.uninstall {
        let result = executor
            .execute_with_timeout(
                &executor.privileged(&format!("zoneadm -z {} uninstall -F", zone)),
                Duration::from_secs(600),
            )
            .await;
        // An unconfigured zone has nothing to uninstall; only a hard
        // failure with the zone still installed matters.
        if !result.ok {
            debug!(
                zone = %zone,
                error = result.error.as_deref().unwrap_or("unknown"),
                "zoneadm uninstall failed, attempting config delete anyway"
            );
        }
        ctx.update_progress(60.0, Some(serde_json::json!({ "status": "uninstalled" })))
            .await;
    }

    let result = executor
        .execute(&executor.privileged(&format!("zonecfg -z {} delete -F", zone)))
        .await;
    if result.ok {
        HandlerOutcome::success(format!("Zone {} deleted", zone))
    } else {
        HandlerOutcome::failure(format!(
            "Failed to delete zone {} configuration: {}",
            zone,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}
