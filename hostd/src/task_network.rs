//! Network datalink and IP handlers
//!
//! VNICs, link aggregations and etherstubs through `dladm`; address objects
//! through `ipadm`; IP forwarding through `routeadm`. Datalink operations
//! serialise behind the `network_datalink` category and IP operations behind
//! `network_ip`, so each handler can assume it is the only one of its kind
//! running.

use serde::Deserialize;
use shared::utils::validate_link_name;
use tracing::info;

use crate::tasks::{require_params, HandlerOutcome, TaskContext};

/// MAC addresses are interpolated into dladm invocations; accept only the
/// colon-separated hex form.
fn validate_mac_address(mac: &str) -> Result<(), String> {
    let parts: Vec<&str> = mac.split(':').collect();
    if parts.len() != 6 {
        return Err(format!("Invalid MAC address: {}", mac));
    }
    for part in parts {
        if part.len() != 2 || !part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("Invalid MAC address: {}", mac));
        }
    }
    Ok(())
}

/// Address objects look like `net0/v4static`; validate both halves.
fn validate_addrobj(addrobj: &str) -> Result<(), String> {
    let Some((link, part)) = addrobj.split_once('/') else {
        return Err(format!(
            "Invalid address object (expected link/name): {}",
            addrobj
        ));
    };
    validate_link_name(link).map_err(|e| e.to_string())?;
    if part.is_empty()
        || part.len() > 32
        || !part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(format!("Invalid address object name: {}", addrobj));
    }
    Ok(())
}

/// Static addresses arrive as `address/prefixlen`; both halves must parse.
fn validate_ip_address(address: &str) -> Result<(), String> {
    let (ip, prefix) = match address.split_once('/') {
        Some((ip, prefix)) => (ip, Some(prefix)),
        None => (address, None),
    };
    ip.parse::<std::net::IpAddr>()
        .map_err(|_| format!("Invalid IP address: {}", address))?;
    if let Some(prefix) = prefix {
        let bits: u8 = prefix
            .parse()
            .map_err(|_| format!("Invalid prefix length: {}", address))?;
        if bits > 128 {
            return Err(format!("Invalid prefix length: {}", address));
        }
    }
    Ok(())
}

async fn link_exists(ctx: &TaskContext, name: &str) -> bool {
    let executor = ctx.executor();
    let result = executor
        .execute(&executor.privileged(&format!("dladm show-link -p -o link {}", name)))
        .await;
    result.ok
}

#[derive(Debug, Deserialize)]
struct CreateVnicParams {
    name: String,
    /// Underlying datalink (physical NIC, aggregate or etherstub).
    link: String,
    #[serde(default)]
    mac_address: Option<String>,
    #[serde(default)]
    vlan_id: Option<u16>,
}

pub async fn create_vnic(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: CreateVnicParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if let Err(e) = validate_link_name(&params.name) {
        return HandlerOutcome::failure(e.to_string());
    }
    if let Err(e) = validate_link_name(&params.link) {
        return HandlerOutcome::failure(e.to_string());
    }
    if let Some(mac) = &params.mac_address {
        if let Err(e) = validate_mac_address(mac) {
            return HandlerOutcome::failure(e);
        }
    }
    if let Some(vlan) = params.vlan_id {
        if !(1..=4094).contains(&vlan) {
            return HandlerOutcome::failure(format!("VLAN id out of range: {}", vlan));
        }
    }

    if link_exists(ctx, &params.name).await {
        return HandlerOutcome::failure(format!("Datalink {} already exists", params.name));
    }

    let mut command = format!("dladm create-vnic -l {}", params.link);
    if let Some(mac) = &params.mac_address {
        command.push_str(&format!(" -m {}", mac));
    }
    if let Some(vlan) = params.vlan_id {
        command.push_str(&format!(" -v {}", vlan));
    }
    command.push_str(&format!(" {}", params.name));

    let executor = ctx.executor();
    let result = executor.execute(&executor.privileged(&command)).await;
    if result.ok {
        info!(vnic = %params.name, link = %params.link, "VNIC created");
        HandlerOutcome::success(format!("VNIC {} created over {}", params.name, params.link))
    } else {
        HandlerOutcome::failure(format!(
            "Failed to create VNIC {}: {}",
            params.name,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

#[derive(Debug, Deserialize)]
struct LinkNameParams {
    name: String,
}

pub async fn delete_vnic(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: LinkNameParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if let Err(e) = validate_link_name(&params.name) {
        return HandlerOutcome::failure(e.to_string());
    }

    let executor = ctx.executor();
    let result = executor
        .execute(&executor.privileged(&format!("dladm delete-vnic {}", params.name)))
        .await;
    if result.ok {
        HandlerOutcome::success(format!("VNIC {} deleted", params.name))
    } else {
        HandlerOutcome::failure(format!(
            "Failed to delete VNIC {}: {}",
            params.name,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

#[derive(Debug, Deserialize)]
struct CreateAggregateParams {
    name: String,
    links: Vec<String>,
    /// Load-balancing policy (L2, L3, L4 or combinations like L3,L4).
    #[serde(default)]
    policy: Option<String>,
    /// LACP mode: off, active or passive.
    #[serde(default)]
    lacp_mode: Option<String>,
}

pub async fn create_aggregate(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: CreateAggregateParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if let Err(e) = validate_link_name(&params.name) {
        return HandlerOutcome::failure(e.to_string());
    }
    if params.links.is_empty() {
        return HandlerOutcome::failure("An aggregate needs at least one link");
    }
    for link in &params.links {
        if let Err(e) = validate_link_name(link) {
            return HandlerOutcome::failure(e.to_string());
        }
    }
    if let Some(policy) = &params.policy {
        if !matches!(policy.as_str(), "L2" | "L3" | "L4" | "L2,L3" | "L3,L4") {
            return HandlerOutcome::failure(format!("Invalid aggregate policy: {}", policy));
        }
    }
    if let Some(mode) = &params.lacp_mode {
        if !matches!(mode.as_str(), "off" | "active" | "passive") {
            return HandlerOutcome::failure(format!("Invalid LACP mode: {}", mode));
        }
    }

    if link_exists(ctx, &params.name).await {
        return HandlerOutcome::failure(format!("Datalink {} already exists", params.name));
    }

    let mut command = String::from("dladm create-aggr");
    for link in &params.links {
        command.push_str(&format!(" -l {}", link));
    }
    if let Some(policy) = &params.policy {
        command.push_str(&format!(" -P {}", policy));
    }
    if let Some(mode) = &params.lacp_mode {
        command.push_str(&format!(" -L {}", mode));
    }
    command.push_str(&format!(" {}", params.name));

    let executor = ctx.executor();
    let result = executor.execute(&executor.privileged(&command)).await;
    if result.ok {
        info!(aggregate = %params.name, links = ?params.links, "Aggregate created");
        HandlerOutcome::success(format!("Aggregate {} created", params.name))
    } else {
        HandlerOutcome::failure(format!(
            "Failed to create aggregate {}: {}",
            params.name,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

pub async fn delete_aggregate(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: LinkNameParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if let Err(e) = validate_link_name(&params.name) {
        return HandlerOutcome::failure(e.to_string());
    }

    let executor = ctx.executor();
    let result = executor
        .execute(&executor.privileged(&format!("dladm delete-aggr {}", params.name)))
        .await;
    if result.ok {
        HandlerOutcome::success(format!("Aggregate {} deleted", params.name))
    } else {
        HandlerOutcome::failure(format!(
            "Failed to delete aggregate {}: {}",
            params.name,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

#[derive(Debug, Deserialize)]
struct ModifyAggregateLinksParams {
    name: String,
    #[serde(default)]
    add: Vec<String>,
    #[serde(default)]
    remove: Vec<String>,
}

pub async fn modify_aggregate_links(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: ModifyAggregateLinksParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if let Err(e) = validate_link_name(&params.name) {
        return HandlerOutcome::failure(e.to_string());
    }
    if params.add.is_empty() && params.remove.is_empty() {
        return HandlerOutcome::failure("No links to add or remove");
    }
    for link in params.add.iter().chain(params.remove.iter()) {
        if let Err(e) = validate_link_name(link) {
            return HandlerOutcome::failure(e.to_string());
        }
    }

    let executor = ctx.executor();
    let total = (params.add.len() + params.remove.len()) as f64;
    let mut done = 0.0;

    for link in &params.add {
        let result = executor
            .execute(&executor.privileged(&format!(
                "dladm add-aggr -l {} {}",
                link, params.name
            )))
            .await;
        if !result.ok {
            return HandlerOutcome::failure(format!(
                "Failed to add {} to aggregate {}: {}",
                link,
                params.name,
                result.error.unwrap_or_else(|| "unknown error".to_string())
            ));
        }
        done += 1.0;
        ctx.update_progress(done / total * 100.0, None).await;
    }

    for link in &params.remove {
        let result = executor
            .execute(&executor.privileged(&format!(
                "dladm remove-aggr -l {} {}",
                link, params.name
            )))
            .await;
        if !result.ok {
            return HandlerOutcome::failure(format!(
                "Failed to remove {} from aggregate {}: {}",
                link,
                params.name,
                result.error.unwrap_or_else(|| "unknown error".to_string())
            ));
        }
        done += 1.0;
        ctx.update_progress(done / total * 100.0, None).await;
    }

    HandlerOutcome::success(format!(
        "Aggregate {} links updated ({} added, {} removed)",
        params.name,
        params.add.len(),
        params.remove.len()
    ))
}

pub async fn create_etherstub(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: LinkNameParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if let Err(e) = validate_link_name(&params.name) {
        return HandlerOutcome::failure(e.to_string());
    }
    if link_exists(ctx, &params.name).await {
        return HandlerOutcome::failure(format!("Datalink {} already exists", params.name));
    }

    let executor = ctx.executor();
    let result = executor
        .execute(&executor.privileged(&format!("dladm create-etherstub {}", params.name)))
        .await;
    if result.ok {
        HandlerOutcome::success(format!("Etherstub {} created", params.name))
    } else {
        HandlerOutcome::failure(format!(
            "Failed to create etherstub {}: {}",
            params.name,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

pub async fn delete_etherstub(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: LinkNameParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if let Err(e) = validate_link_name(&params.name) {
        return HandlerOutcome::failure(e.to_string());
    }

    let executor = ctx.executor();
    let result = executor
        .execute(&executor.privileged(&format!("dladm delete-etherstub {}", params.name)))
        .await;
    if result.ok {
        HandlerOutcome::success(format!("Etherstub {} deleted", params.name))
    } else {
        HandlerOutcome::failure(format!(
            "Failed to delete etherstub {}: {}",
            params.name,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

#[derive(Debug, Deserialize)]
struct CreateIpAddressParams {
    /// Address object, `link/name`.
    addrobj: String,
    /// `static`, `dhcp` or `addrconf`.
    address_type: String,
    /// Required for static addresses, `ip/prefixlen`.
    #[serde(default)]
    address: Option<String>,
}

pub async fn create_ip_address(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: CreateIpAddressParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if let Err(e) = validate_addrobj(&params.addrobj) {
        return HandlerOutcome::failure(e);
    }

    let command = match params.address_type.as_str() {
        "static" => {
            let Some(address) = &params.address else {
                return HandlerOutcome::failure("Static address type requires an address");
            };
            if let Err(e) = validate_ip_address(address) {
                return HandlerOutcome::failure(e);
            }
            format!("ipadm create-addr -T static -a {} {}", address, params.addrobj)
        }
        "dhcp" => format!("ipadm create-addr -T dhcp {}", params.addrobj),
        "addrconf" => format!("ipadm create-addr -T addrconf {}", params.addrobj),
        other => {
            return HandlerOutcome::failure(format!("Invalid address type: {}", other));
        }
    };

    let executor = ctx.executor();
    let result = executor.execute(&executor.privileged(&command)).await;
    if result.ok {
        info!(addrobj = %params.addrobj, "IP address created");
        HandlerOutcome::success(format!("Address {} created", params.addrobj))
    } else {
        HandlerOutcome::failure(format!(
            "Failed to create address {}: {}",
            params.addrobj,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

#[derive(Debug, Deserialize)]
struct AddrobjParams {
    addrobj: String,
}

pub async fn delete_ip_address(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: AddrobjParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if let Err(e) = validate_addrobj(&params.addrobj) {
        return HandlerOutcome::failure(e);
    }

    let executor = ctx.executor();
    let result = executor
        .execute(&executor.privileged(&format!("ipadm delete-addr {}", params.addrobj)))
        .await;
    if result.ok {
        HandlerOutcome::success(format!("Address {} deleted", params.addrobj))
    } else {
        HandlerOutcome::failure(format!(
            "Failed to delete address {}: {}",
            params.addrobj,
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ))
    }
}

#[derive(Debug, Deserialize)]
struct RoutingParams {
    /// `ipv4`, `ipv6` or `both`.
    #[serde(default = "default_routing_family")]
    family: String,
}

fn default_routing_family() -> String {
    "ipv4".to_string()
}

fn routing_flags(family: &str) -> Option<Vec<&'static str>> {
    match family {
        "ipv4" => Some(vec!["ipv4-forwarding"]),
        "ipv6" => Some(vec!["ipv6-forwarding"]),
        "both" => Some(vec!["ipv4-forwarding", "ipv6-forwarding"]),
        _ => None,
    }
}

pub async fn enable_routing(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: RoutingParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    let Some(flags) = routing_flags(&params.family) else {
        return HandlerOutcome::failure(format!("Invalid routing family: {}", params.family));
    };

    let executor = ctx.executor();
    for flag in &flags {
        let result = executor
            .execute(&executor.privileged(&format!("routeadm -u -e {}", flag)))
            .await;
        if !result.ok {
            return HandlerOutcome::failure(format!(
                "Failed to enable {}: {}",
                flag,
                result.error.unwrap_or_else(|| "unknown error".to_string())
            ));
        }
    }
    HandlerOutcome::success(format!("IP forwarding enabled ({})", params.family))
}

pub async fn disable_routing(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: RoutingParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    let Some(flags) = routing_flags(&params.family) else {
        return HandlerOutcome::failure(format!("Invalid routing family: {}", params.family));
    };

    let executor = ctx.executor();
    for flag in &flags {
        let result = executor
            .execute(&executor.privileged(&format!("routeadm -u -d {}", flag)))
            .await;
        if !result.ok {
            return HandlerOutcome::failure(format!(
                "Failed to disable {}: {}",
                flag,
                result.error.unwrap_or_else(|| "unknown error".to_string())
            ));
        }
    }
    HandlerOutcome::success(format!("IP forwarding disabled ({})", params.family))
}
