//! SMF service handlers
//!
//! Enable, disable, restart and refresh of SMF services via `svcadm`.
//! Service state changes are independent per FMRI, so this family carries
//! no mutual-exclusion category.

use serde::Deserialize;
use shared::utils::validate_service_fmri;

use crate::tasks::{require_params, HandlerOutcome, TaskContext};

#[derive(Debug, Deserialize)]
struct ServiceParams {
    fmri: String,
    /// Temporary changes do not persist across reboot.
    #[serde(default)]
    temporary: bool,
}

async fn run_svcadm(ctx: &TaskContext, subcommand: &str, params: &ServiceParams) -> HandlerOutcome {
    if let Err(e) = validate_service_fmri(&params.fmri) {
        return HandlerOutcome::failure(e.to_string());
    }

    let flag = if params.temporary { " -t" } else { "" };
    let command = format!("svcadm {}{} {}", subcommand, flag, params.fmri);

    let executor = ctx.executor();
    let result = executor.execute(&executor.privileged(&command)).await;
    if result.ok {
        HandlerOutcome::success(format!("svcadm {} {} succeeded", subcommand, params.fmri))
    } else {
        HandlerOutcome::failure(format!(
            "svcadm {} {} failed: {}",
            subcommand,
            params.fmri,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

pub async fn service_enable(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: ServiceParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    run_svcadm(ctx, "enable", &params).await
}

pub async fn service_disable(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: ServiceParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    run_svcadm(ctx, "disable", &params).await
}

pub async fn service_restart(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: ServiceParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    // restart has no -t flag; force it off rather than fail the parse.
    let params = ServiceParams {
        temporary: false,
        ..params
    };
    run_svcadm(ctx, "restart", &params).await
}

pub async fn service_refresh(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: ServiceParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    let params = ServiceParams {
        temporary: false,
        ..params
    };
    run_svcadm(ctx, "refresh", &params).await
}
