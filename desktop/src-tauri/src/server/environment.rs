//! Environment handed to the backend at spawn time.

use crate::server::{ServerConfig, ServerError, ServerResult};

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;

pub const ENV_CACHE_TYPE: &str = "CACHE_TYPE";
pub const ENV_CORS_ORIGIN_REGEX: &str = "CORS_ORIGIN_REGEX";
pub const ENV_SERVE_STATIC: &str = "SERVE_STATIC";
pub const ENV_RESOURCES_PATH: &str = "RESOURCES_PATH";
pub const ENV_HOST: &str = "HOST";
pub const ENV_PORT: &str = "PORT";
pub const ENV_PUBLIC_BASE_URL: &str = "PUBLIC_BASE_URL";
pub const ENV_PUBLIC_STREAMING_BASE_URL: &str = "PUBLIC_STREAMING_BASE_URL";
const ENV_PYTHONUNBUFFERED: &str = "PYTHONUNBUFFERED";

/// Build the backend environment. Ordered so spawns are reproducible in logs.
pub fn backend_environment(
    config: &ServerConfig,
    resources_path: Option<&Path>,
) -> BTreeMap<String, String> {
    let env = &config.environment;
    let mut vars = BTreeMap::new();

    vars.insert(ENV_CACHE_TYPE.into(), env.cache_type.clone());
    vars.insert(ENV_CORS_ORIGIN_REGEX.into(), env.cors_origin_regex.clone());
    vars.insert(ENV_SERVE_STATIC.into(), env.serve_static.to_string());
    vars.insert(ENV_HOST.into(), config.server.host.clone());
    vars.insert(ENV_PORT.into(), config.server.port.to_string());
    // Line-buffered output so crash messages reach the stderr buffer before exit
    vars.insert(ENV_PYTHONUNBUFFERED.into(), "1".into());

    if let Some(path) = resources_path {
        vars.insert(ENV_RESOURCES_PATH.into(), path.display().to_string());
    }

    if let Some(url) = env.public_base_url.as_deref().and_then(normalize_public_url) {
        vars.insert(ENV_PUBLIC_BASE_URL.into(), url);
    }
    if let Some(url) = env
        .public_streaming_base_url
        .as_deref()
        .and_then(normalize_public_url)
    {
        vars.insert(ENV_PUBLIC_STREAMING_BASE_URL.into(), url);
    }

    vars
}

/// Reject public URLs the backend would ignore: unparsable, or pointing at a private host.
pub fn validate_public_url(field: &str, raw: &str) -> ServerResult<()> {
    let trimmed = raw.trim();
    let url = reqwest::Url::parse(trimmed).map_err(|e| {
        ServerError::config_invalid(format!("{field} is not a valid URL ('{trimmed}'): {e}"))
    })?;

    match url.host_str() {
        Some(host) if !is_private_host(host) => Ok(()),
        Some(host) => Err(ServerError::config_invalid(format!(
            "{field} points at private host '{host}'; remote clients could not reach it"
        ))),
        None => Err(ServerError::config_invalid(format!(
            "{field} has no host: '{trimmed}'"
        ))),
    }
}

/// Trimmed URL without trailing slash, or None when it is not publicly reachable.
fn normalize_public_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    let url = reqwest::Url::parse(trimmed).ok()?;
    match url.host_str() {
        Some(host) if !is_private_host(host) => Some(trimmed.to_string()),
        _ => None,
    }
}

/// Whether `host` is loopback, localhost, unspecified or a private LAN address.
pub fn is_private_host(host: &str) -> bool {
    let host = host.trim().trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() || host.eq_ignore_ascii_case("localhost") {
        return true;
    }

    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified()
        }
        Ok(IpAddr::V6(ip)) => {
            let first = ip.segments()[0];
            ip.is_loopback()
                || ip.is_unspecified()
                || (first & 0xfe00) == 0xfc00 // unique local
                || (first & 0xffc0) == 0xfe80 // link local
        }
        Err(_) => false,
    }
}
