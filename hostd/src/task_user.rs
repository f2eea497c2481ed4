//! User, group and role account handlers
//!
//! Thin wrappers over `useradd`/`usermod`/`userdel`, `groupadd`/`groupdel`
//! and `roleadd`/`roledel`. These all rewrite the same passwd/shadow/group
//! files, so the whole family serialises behind the `user_management`
//! category.

use serde::Deserialize;
use shared::utils::validate_account_name;

use crate::tasks::{require_params, HandlerOutcome, TaskContext};

/// GECOS text is quoted into the command line; keep it boring.
fn validate_comment(comment: &str) -> Result<(), String> {
    if comment.len() > 128 {
        return Err("Comment cannot be longer than 128 characters".to_string());
    }
    if !comment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | ',' | '_' | '-' | '@'))
    {
        return Err("Comment contains invalid characters".to_string());
    }
    Ok(())
}

/// Home directories and shells come from the operator; absolute paths with
/// a conservative charset only.
fn validate_path(path: &str, what: &str) -> Result<(), String> {
    if !path.starts_with('/') {
        return Err(format!("{} must be an absolute path", what));
    }
    if path.contains("..") {
        return Err(format!("{} cannot contain '..'", what));
    }
    if !path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-'))
    {
        return Err(format!("{} contains invalid characters", what));
    }
    Ok(())
}

/// RBAC profile names contain spaces ("Zone Management"); allow them but
/// nothing stranger.
fn validate_profile_name(profile: &str) -> Result<(), String> {
    if profile.is_empty() || profile.len() > 64 {
        return Err(format!("Invalid profile name: {}", profile));
    }
    if !profile
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-'))
    {
        return Err(format!("Invalid profile name: {}", profile));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct UserCreateParams {
    username: String,
    #[serde(default)]
    uid: Option<u32>,
    /// Primary group, by name.
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    home_dir: Option<String>,
    #[serde(default)]
    shell: Option<String>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    create_home: bool,
}

pub async fn user_create(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: UserCreateParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if let Err(e) = validate_account_name(&params.username) {
        return HandlerOutcome::failure(e.to_string());
    }
    if let Some(group) = &params.group {
        if let Err(e) = validate_account_name(group) {
            return HandlerOutcome::failure(e.to_string());
        }
    }
    if let Some(home) = &params.home_dir {
        if let Err(e) = validate_path(home, "Home directory") {
            return HandlerOutcome::failure(e);
        }
    }
    if let Some(shell) = &params.shell {
        if let Err(e) = validate_path(shell, "Shell") {
            return HandlerOutcome::failure(e);
        }
    }
    if let Some(comment) = &params.comment {
        if let Err(e) = validate_comment(comment) {
            return HandlerOutcome::failure(e);
        }
    }

    let mut command = String::from("useradd");
    if let Some(uid) = params.uid {
        command.push_str(&format!(" -u {}", uid));
    }
    if let Some(group) = &params.group {
        command.push_str(&format!(" -g {}", group));
    }
    if let Some(home) = &params.home_dir {
        command.push_str(&format!(" -d {}", home));
    }
    if params.create_home {
        command.push_str(" -m");
    }
    if let Some(shell) = &params.shell {
        command.push_str(&format!(" -s {}", shell));
    }
    if let Some(comment) = &params.comment {
        command.push_str(&format!(" -c '{}'", comment));
    }
    command.push_str(&format!(" {}", params.username));

    let executor = ctx.executor();
    let result = executor.execute(&executor.privileged(&command)).await;
    if result.ok {
        HandlerOutcome::success(format!("User {} created", params.username))
    } else {
        HandlerOutcome::failure(format!(
            "Failed to create user {}: {}",
            params.username,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

#[derive(Debug, Deserialize)]
struct UserModifyParams {
    username: String,
    #[serde(default)]
    shell: Option<String>,
    #[serde(default)]
    home_dir: Option<String>,
    #[serde(default)]
    comment: Option<String>,
    /// Replacement supplementary group list.
    #[serde(default)]
    groups: Option<Vec<String>>,
}

pub async fn user_modify(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: UserModifyParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if let Err(e) = validate_account_name(&params.username) {
        return HandlerOutcome::failure(e.to_string());
    }

    let mut command = String::from("usermod");
    let mut changed = false;
    if let Some(shell) = &params.shell {
        if let Err(e) = validate_path(shell, "Shell") {
            return HandlerOutcome::failure(e);
        }
        command.push_str(&format!(" -s {}", shell));
        changed = true;
    }
    if let Some(home) = &params.home_dir {
        if let Err(e) = validate_path(home, "Home directory") {
            return HandlerOutcome::failure(e);
        }
        command.push_str(&format!(" -d {}", home));
        changed = true;
    }
    if let Some(comment) = &params.comment {
        if let Err(e) = validate_comment(comment) {
            return HandlerOutcome::failure(e);
        }
        command.push_str(&format!(" -c '{}'", comment));
        changed = true;
    }
    if let Some(groups) = &params.groups {
        for group in groups {
            if let Err(e) = validate_account_name(group) {
                return HandlerOutcome::failure(e.to_string());
            }
        }
        command.push_str(&format!(" -G {}", groups.join(",")));
        changed = true;
    }
    if !changed {
        return HandlerOutcome::failure("No user attributes to modify");
    }
    command.push_str(&format!(" {}", params.username));

    let executor = ctx.executor();
    let result = executor.execute(&executor.privileged(&command)).await;
    if result.ok {
        HandlerOutcome::success(format!("User {} modified", params.username))
    } else {
        HandlerOutcome::failure(format!(
            "Failed to modify user {}: {}",
            params.username,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

#[derive(Debug, Deserialize)]
struct UserDeleteParams {
    username: String,
    #[serde(default)]
    remove_home: bool,
}

pub async fn user_delete(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: UserDeleteParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if let Err(e) = validate_account_name(&params.username) {
        return HandlerOutcome::failure(e.to_string());
    }

    let command = if params.remove_home {
        format!("userdel -r {}", params.username)
    } else {
        format!("userdel {}", params.username)
    };

    let executor = ctx.executor();
    let result = executor.execute(&executor.privileged(&command)).await;
    if result.ok {
        HandlerOutcome::success(format!("User {} deleted", params.username))
    } else {
        HandlerOutcome::failure(format!(
            "Failed to delete user {}: {}",
            params.username,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

#[derive(Debug, Deserialize)]
struct GroupCreateParams {
    name: String,
    #[serde(default)]
    gid: Option<u32>,
}

pub async fn group_create(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: GroupCreateParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if let Err(e) = validate_account_name(&params.name) {
        return HandlerOutcome::failure(e.to_string());
    }

    let command = match params.gid {
        Some(gid) => format!("groupadd -g {} {}", gid, params.name),
        None => format!("groupadd {}", params.name),
    };

    let executor = ctx.executor();
    let result = executor.execute(&executor.privileged(&command)).await;
    if result.ok {
        HandlerOutcome::success(format!("Group {} created", params.name))
    } else {
        HandlerOutcome::failure(format!(
            "Failed to create group {}: {}",
            params.name,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

#[derive(Debug, Deserialize)]
struct AccountNameParams {
    name: String,
}

pub async fn group_delete(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: AccountNameParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if let Err(e) = validate_account_name(&params.name) {
        return HandlerOutcome::failure(e.to_string());
    }

    let executor = ctx.executor();
    let result = executor
        .execute(&executor.privileged(&format!("groupdel {}", params.name)))
        .await;
    if result.ok {
        HandlerOutcome::success(format!("Group {} deleted", params.name))
    } else {
        HandlerOutcome::failure(format!(
            "Failed to delete group {}: {}",
            params.name,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

#[derive(Debug, Deserialize)]
struct RoleCreateParams {
    name: String,
    /// RBAC profiles granted to the role.
    #[serde(default)]
    profiles: Vec<String>,
}

pub async fn role_create(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: RoleCreateParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if let Err(e) = validate_account_name(&params.name) {
        return HandlerOutcome::failure(e.to_string());
    }
    for profile in &params.profiles {
        if let Err(e) = validate_profile_name(profile) {
            return HandlerOutcome::failure(e);
        }
    }

    let command = if params.profiles.is_empty() {
        format!("roleadd {}", params.name)
    } else {
        format!("roleadd -P '{}' {}", params.profiles.join(","), params.name)
    };

    let executor = ctx.executor();
    let result = executor.execute(&executor.privileged(&command)).await;
    if result.ok {
        HandlerOutcome::success(format!("Role {} created", params.name))
    } else {
        HandlerOutcome::failure(format!(
            "Failed to create role {}: {}",
            params.name,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

pub async fn role_delete(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: AccountNameParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if let Err(e) = validate_account_name(&params.name) {
        return HandlerOutcome::failure(e.to_string());
    }

    let executor = ctx.executor();
    let result = executor
        .execute(&executor.privileged(&format!("roledel {}", params.name)))
        .await;
    if result.ok {
        HandlerOutcome::success(format!("Role {} deleted", params.name))
    } else {
        HandlerOutcome::failure(format!(
            "Failed to delete role {}: {}",
            params.name,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}
