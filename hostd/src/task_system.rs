//! Host-level system handlers
//!
//! Hostname and kernel tunable changes, plus the three host power
//! operations (shutdown, reboot, poweroff). The power handlers compose the
//! zone shutdown orchestrator: child zones are stopped in priority order
//! before the system command is issued, and with `failure_action = abort` a
//! failed zone stop vetoes the whole operation.

use serde::Deserialize;
use shared::utils::validate_hostname;
use std::time::Duration;
use tracing::{info, warn};

use crate::orchestrator::{self, PlanConfig, ShellZoneStopper, ShutdownReport};
use crate::tasks::{require_params, HandlerOutcome, TaskContext};

/// The system command itself gets a short budget; once it succeeds the
/// kernel is coming down and this process with it.
const SYSTEM_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct SetHostnameParams {
    hostname: String,
}

pub async fn set_hostname(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: SetHostnameParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if let Err(e) = validate_hostname(&params.hostname) {
        return HandlerOutcome::failure(e.to_string());
    }

    let executor = ctx.executor();

    // Persist for the next boot, then apply to the running system. The
    // redirection must happen with privileges, hence tee instead of `>`.
    let persist = format!(
        "printf '%s\\n' {} | {} > /dev/null",
        params.hostname,
        executor.privileged("tee /etc/nodename")
    );
    let result = executor.execute(&persist).await;
    if !result.ok {
        return HandlerOutcome::failure(format!(
            "Failed to write /etc/nodename: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ));
    }

    let apply = executor.privileged(&format!("hostname {}", params.hostname));
    let result = executor.execute(&apply).await;
    if result.ok {
        info!(hostname = %params.hostname, "Hostname changed");
        HandlerOutcome::success(format!("Hostname set to {}", params.hostname))
    } else {
        HandlerOutcome::failure(format!(
            "Failed to apply hostname: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

#[derive(Debug, Deserialize)]
struct ZfsArcParams {
    #[serde(default)]
    arc_max_bytes: Option<u64>,
    #[serde(default)]
    arc_min_bytes: Option<u64>,
}

/// Write `/etc/system.d/zfs-arc.conf`. ARC sizing is a boot-time kernel
/// tunable, so this always raises the reboot-required flag.
pub async fn set_zfs_arc_params(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: ZfsArcParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if params.arc_max_bytes.is_none() && params.arc_min_bytes.is_none() {
        return HandlerOutcome::failure("No ARC parameters to set");
    }
    if let (Some(max), Some(min)) = (params.arc_max_bytes, params.arc_min_bytes) {
        if min > max {
            return HandlerOutcome::failure("arc_min_bytes cannot exceed arc_max_bytes");
        }
    }

    let mut lines = Vec::new();
    if let Some(max) = params.arc_max_bytes {
        lines.push(format!("set zfs:zfs_arc_max={}", max));
    }
    if let Some(min) = params.arc_min_bytes {
        lines.push(format!("set zfs:zfs_arc_min={}", min));
    }

    let executor = ctx.executor();
    let command = format!(
        "printf '%s\\n' '{}' | {} > /dev/null",
        lines.join("' '"),
        executor.privileged("tee /etc/system.d/zfs-arc.conf")
    );
    let result = executor.execute(&command).await;
    if result.ok {
        ctx.reboot_flag()
            .set("ZFS ARC tunables changed", "task_system");
        HandlerOutcome::success("ZFS ARC parameters written; reboot required")
    } else {
        HandlerOutcome::failure(format!(
            "Failed to write zfs-arc.conf: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

#[derive(Debug, Deserialize)]
struct HostControlParams {
    /// Grace period handed to shutdown(8) in seconds.
    #[serde(default = "default_grace_period")]
    grace_period_seconds: u64,
    /// Broadcast message for logged-in users.
    #[serde(default)]
    message: Option<String>,
    /// Per-task override of the orchestration toggle.
    #[serde(default)]
    zone_orchestration: Option<bool>,
    #[serde(default)]
    strategy: Option<String>,
    #[serde(default)]
    failure_action: Option<String>,
    #[serde(default)]
    priority_delay_seconds: Option<u64>,
    #[serde(default)]
    zone_timeout_seconds: Option<u64>,
}

fn default_grace_period() -> u64 {
    60
}

fn validate_message(message: &str) -> Result<(), String> {
    if message.len() > 256 {
        return Err("Broadcast message too long".to_string());
    }
    if !message
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | ',' | ':' | '_' | '-' | '!'))
    {
        return Err("Broadcast message contains invalid characters".to_string());
    }
    Ok(())
}

/// Stop child zones per the orchestration settings. Returns the report, or
/// None when orchestration is off for this invocation.
async fn orchestrate_zones(
    ctx: &TaskContext,
    params: &HostControlParams,
) -> Result<Option<ShutdownReport>, HandlerOutcome> {
    let state = ctx.orchestration();
    let enabled = params.zone_orchestration.unwrap_or_else(|| state.is_enabled());
    if !enabled {
        info!("Zone orchestration disabled for this host operation");
        return Ok(None);
    }

    let config = PlanConfig::from_section(
        state.section(),
        params.strategy.as_deref(),
        params.failure_action.as_deref(),
        params.priority_delay_seconds,
        params.zone_timeout_seconds,
    );

    let zones = match orchestrator::query_zone_priorities(ctx.executor()).await {
        Ok(zones) => zones,
        Err(e) => return Err(HandlerOutcome::failure(format!("{:#}", e))),
    };
    if zones.is_empty() {
        info!("No running zones to orchestrate");
        return Ok(Some(ShutdownReport {
            success: true,
            zones_stopped: Vec::new(),
            zones_failed: Vec::new(),
        }));
    }

    let groups = orchestrator::calculate_shutdown_order(&zones);
    ctx.update_progress(
        20.0,
        Some(serde_json::json!({
            "status": "stopping_zones",
            "zone_count": zones.len(),
            "group_count": groups.len(),
        })),
    )
    .await;

    let stopper = ShellZoneStopper::new(ctx.executor().clone());
    let report = orchestrator::execute_shutdown_plan(&stopper, &groups, &config).await;

    ctx.update_progress(
        70.0,
        Some(serde_json::json!({
            "status": "zones_stopped",
            "zones_stopped": report.zones_stopped,
            "zones_failed": report.zones_failed.len(),
        })),
    )
    .await;

    Ok(Some(report))
}

async fn host_control(
    params: HostControlParams,
    ctx: &TaskContext,
    init_state: u8,
    verb: &str,
) -> HandlerOutcome {
    if let Some(message) = &params.message {
        if let Err(e) = validate_message(message) {
            return HandlerOutcome::failure(e);
        }
    }

    let report = match orchestrate_zones(ctx, &params).await {
        Ok(report) => report,
        Err(outcome) => return outcome,
    };

    if let Some(report) = &report {
        if !report.success {
            // Abort path: zones failed to stop and the policy says the host
            // must not go down on top of them.
            warn!(
                failed = report.zones_failed.len(),
                stopped = report.zones_stopped.len(),
                "Host {} aborted after failed zone stops", verb
            );
            return HandlerOutcome {
                ok: false,
                message: None,
                error: Some(format!(
                    "Host {} aborted: {} zone(s) failed to stop",
                    verb,
                    report.zones_failed.len()
                )),
                details: serde_json::to_value(report).ok(),
            };
        }
    }

    let message = params.message.as_deref().unwrap_or("System going down");
    let command = ctx.executor().privileged(&format!(
        "shutdown -y -g {} -i {} '{}'",
        params.grace_period_seconds, init_state, message
    ));
    let result = ctx
        .executor()
        .execute_with_timeout(&command, SYSTEM_COMMAND_TIMEOUT)
        .await;

    if result.ok {
        info!(verb = %verb, "System command issued");
        HandlerOutcome {
            ok: true,
            message: Some(format!("Host {} initiated", verb)),
            error: None,
            details: report.and_then(|r| serde_json::to_value(r).ok()),
        }
    } else {
        HandlerOutcome::failure(format!(
            "Failed to issue {} command: {}",
            verb,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

/// Orderly shutdown to the powered-off state (init 5).
pub async fn host_shutdown(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: HostControlParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    host_control(params, ctx, 5, "shutdown").await
}

/// Reboot (init 6).
pub async fn host_reboot(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: HostControlParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    host_control(params, ctx, 6, "reboot").await
}

/// Immediate power-off. Still orchestrates zones; the difference from
/// shutdown is the zero grace period for logged-in users.
pub async fn host_poweroff(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let mut params: HostControlParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    params.grace_period_seconds = 0;
    host_control(params, ctx, 5, "poweroff").await
}
