//! Package, boot environment and publisher handlers
//!
//! IPS packaging (`pkg`), boot environments (`beadm`) and package
//! publishers. All of these mutate the image through the same packaging
//! framework, which is why every operation here shares the
//! `package_management` category: two concurrent `pkg` invocations on one
//! image fight over the image lock and lose.

use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use crate::tasks::{require_params, HandlerOutcome, TaskContext};

/// pkg install/update can legitimately run for a very long time.
const PKG_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// `pkg` exit code meaning "nothing to do". Not a failure.
const PKG_EXIT_NOP: &str = "exit 4";

/// Package FMRIs: `pkg:/web/server/nginx@1.24` and friends.
fn validate_pkg_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > 256 {
        return Err(format!("Invalid package name: {}", name));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '@' | '.' | '_' | '-' | '+' | ':'))
    {
        return Err(format!("Invalid package name: {}", name));
    }
    Ok(())
}

/// Boot environment names follow ZFS dataset component rules.
fn validate_be_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > 64 {
        return Err(format!("Invalid boot environment name: {}", name));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(format!("Invalid boot environment name: {}", name));
    }
    Ok(())
}

fn validate_publisher_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > 64 {
        return Err(format!("Invalid publisher name: {}", name));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(format!("Invalid publisher name: {}", name));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct PkgListParams {
    packages: Vec<String>,
}

pub async fn pkg_install(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: PkgListParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if params.packages.is_empty() {
        return HandlerOutcome::failure("No packages to install");
    }
    for pkg in &params.packages {
        if let Err(e) = validate_pkg_name(pkg) {
            return HandlerOutcome::failure(e);
        }
    }

    ctx.update_progress(
        10.0,
        Some(serde_json::json!({ "status": "installing", "packages": params.packages })),
    )
    .await;

    let executor = ctx.executor();
    let command = executor.privileged(&format!("pkg install -q {}", params.packages.join(" ")));
    let result = executor.execute_with_timeout(&command, PKG_TIMEOUT).await;

    if result.ok {
        info!(packages = ?params.packages, "Packages installed");
        HandlerOutcome::success(format!("Installed {} packages", params.packages.len()))
    } else if result.error.as_deref() == Some(PKG_EXIT_NOP) {
        HandlerOutcome::success("All requested packages already installed")
    } else {
        HandlerOutcome::failure(format!(
            "pkg install failed: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

pub async fn pkg_uninstall(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: PkgListParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if params.packages.is_empty() {
        return HandlerOutcome::failure("No packages to uninstall");
    }
    for pkg in &params.packages {
        if let Err(e) = validate_pkg_name(pkg) {
            return HandlerOutcome::failure(e);
        }
    }

    let executor = ctx.executor();
    let command = executor.privileged(&format!("pkg uninstall -q {}", params.packages.join(" ")));
    let result = executor.execute_with_timeout(&command, PKG_TIMEOUT).await;

    if result.ok {
        HandlerOutcome::success(format!("Uninstalled {} packages", params.packages.len()))
    } else {
        HandlerOutcome::failure(format!(
            "pkg uninstall failed: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

#[derive(Debug, Deserialize)]
struct PkgUpdateParams {
    /// Specific packages; empty means update the whole image.
    #[serde(default)]
    packages: Vec<String>,
}

pub async fn pkg_update(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: PkgUpdateParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    for pkg in &params.packages {
        if let Err(e) = validate_pkg_name(pkg) {
            return HandlerOutcome::failure(e);
        }
    }

    ctx.update_progress(10.0, Some(serde_json::json!({ "status": "updating" })))
        .await;

    let executor = ctx.executor();
    let command = if params.packages.is_empty() {
        executor.privileged("pkg update -q")
    } else {
        executor.privileged(&format!("pkg update -q {}", params.packages.join(" ")))
    };
    let result = executor.execute_with_timeout(&command, PKG_TIMEOUT).await;

    if result.ok {
        // An image update that created a new boot environment only takes
        // effect after a reboot into it. pkg reports the plan on either
        // stream depending on verbosity.
        if result.stdout.contains("boot environment") || result.stderr.contains("boot environment")
        {
            ctx.reboot_flag()
                .set("pkg_update created a new boot environment", "task_pkg");
        }
        info!("Image update complete");
        HandlerOutcome::success("Image updated")
    } else if result.error.as_deref() == Some(PKG_EXIT_NOP) {
        HandlerOutcome::success("No updates available")
    } else {
        HandlerOutcome::failure(format!(
            "pkg update failed: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

pub async fn pkg_refresh(_metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let executor = ctx.executor();
    let result = executor
        .execute_with_timeout(
            &executor.privileged("pkg refresh --full"),
            Duration::from_secs(600),
        )
        .await;
    if result.ok {
        HandlerOutcome::success("Publisher metadata refreshed")
    } else {
        HandlerOutcome::failure(format!(
            "pkg refresh failed: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

#[derive(Debug, Deserialize)]
struct BeadmCreateParams {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

pub async fn beadm_create(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: BeadmCreateParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if let Err(e) = validate_be_name(&params.name) {
        return HandlerOutcome::failure(e);
    }
    if let Some(description) = &params.description {
        // Descriptions are quoted into the command line; keep the charset
        // boring.
        if !description
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | ',' | '_' | '-'))
        {
            return HandlerOutcome::failure("Boot environment description contains invalid characters");
        }
    }

    let executor = ctx.executor();
    let command = match &params.description {
        Some(description) => {
            executor.privileged(&format!("beadm create -d '{}' {}", description, params.name))
        }
        None => executor.privileged(&format!("beadm create {}", params.name)),
    };
    let result = executor
        .execute_with_timeout(&command, Duration::from_secs(600))
        .await;
    if result.ok {
        HandlerOutcome::success(format!("Boot environment {} created", params.name))
    } else {
        HandlerOutcome::failure(format!(
            "beadm create failed: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

#[derive(Debug, Deserialize)]
struct BeNameParams {
    name: String,
}

pub async fn beadm_activate(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: BeNameParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if let Err(e) = validate_be_name(&params.name) {
        return HandlerOutcome::failure(e);
    }

    let executor = ctx.executor();
    let result = executor
        .execute(&executor.privileged(&format!("beadm activate {}", params.name)))
        .await;
    if result.ok {
        // The activated environment is only booted into on next restart.
        ctx.reboot_flag().set(
            &format!("boot environment {} activated", params.name),
            "task_pkg",
        );
        HandlerOutcome::success(format!(
            "Boot environment {} activated; reboot required",
            params.name
        ))
    } else {
        HandlerOutcome::failure(format!(
            "beadm activate failed: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

pub async fn beadm_delete(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: BeNameParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if let Err(e) = validate_be_name(&params.name) {
        return HandlerOutcome::failure(e);
    }

    let executor = ctx.executor();
    let result = executor
        .execute_with_timeout(
            &executor.privileged(&format!("beadm destroy -F {}", params.name)),
            Duration::from_secs(600),
        )
        .await;
    if result.ok {
        HandlerOutcome::success(format!("Boot environment {} destroyed", params.name))
    } else {
        HandlerOutcome::failure(format!(
            "beadm destroy failed: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

#[derive(Debug, Deserialize)]
struct RepositoryAddParams {
    publisher: String,
    origin: String,
}

pub async fn repository_add(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: RepositoryAddParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if let Err(e) = validate_publisher_name(&params.publisher) {
        return HandlerOutcome::failure(e);
    }
    // Origins must be real URLs; parse rather than pattern-match.
    let origin = match url::Url::parse(&params.origin) {
        Ok(origin) if matches!(origin.scheme(), "http" | "https" | "file") => origin,
        Ok(origin) => {
            return HandlerOutcome::failure(format!(
                "Unsupported origin scheme: {}",
                origin.scheme()
            ))
        }
        Err(e) => return HandlerOutcome::failure(format!("Invalid origin URL: {}", e)),
    };

    let executor = ctx.executor();
    let result = executor
        .execute(&executor.privileged(&format!(
            "pkg set-publisher -g {} {}",
            origin, params.publisher
        )))
        .await;
    if result.ok {
        HandlerOutcome::success(format!("Publisher {} added", params.publisher))
    } else {
        HandlerOutcome::failure(format!(
            "Failed to add publisher {}: {}",
            params.publisher,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

#[derive(Debug, Deserialize)]
struct RepositoryRemoveParams {
    publisher: String,
}

pub async fn repository_remove(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: RepositoryRemoveParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if let Err(e) = validate_publisher_name(&params.publisher) {
        return HandlerOutcome::failure(e);
    }

    let executor = ctx.executor();
    let result = executor
        .execute(&executor.privileged(&format!("pkg unset-publisher {}", params.publisher)))
        .await;
    if result.ok {
        HandlerOutcome::success(format!("Publisher {} removed", params.publisher))
    } else {
        HandlerOutcome::failure(format!(
            "Failed to remove publisher {}: {}",
            params.publisher,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}
