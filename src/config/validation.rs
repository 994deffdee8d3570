//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate the listener address and upstream URL
//! - Report pool-size fallbacks without failing
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Non-positive pool sizes are "unset", not invalid

use std::net::SocketAddr;

use url::Url;

use crate::config::schema::{
    FilterConfig, GatewayConfig, DEFAULT_MAX_PER_ROUTE_CONNECTIONS, DEFAULT_MAX_TOTAL_CONNECTIONS,
};

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    BindAddress(String),
    UpstreamUrl { url: String, reason: String },
    IgnoredHeader(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::BindAddress(addr) => write!(f, "invalid bind address `{}`", addr),
            ValidationError::UpstreamUrl { url, reason } => {
                write!(f, "invalid upstream url `{}`: {}", url, reason)
            }
            ValidationError::IgnoredHeader(name) => {
                write!(f, "invalid ignored header name `{}`", name)
            }
        }
    }
}

/// Validate a loaded configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }

    if let Err(reason) = check_upstream(&config.upstream.url) {
        errors.push(ValidationError::UpstreamUrl {
            url: config.upstream.url.clone(),
            reason,
        });
    }

    for name in &config.host.ignored_headers {
        if hyper::header::HeaderName::from_bytes(name.as_bytes()).is_err() {
            errors.push(ValidationError::IgnoredHeader(name.clone()));
        }
    }

    warn_on_fallbacks(&config.host);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_upstream(raw: &str) -> Result<(), String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported scheme `{}`", other)),
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    Ok(())
}

/// Log (but accept) pool sizes that will be replaced by defaults.
fn warn_on_fallbacks(host: &FilterConfig) {
    if host.max_total_connections <= 0 {
        tracing::warn!(
            configured = host.max_total_connections,
            fallback = DEFAULT_MAX_TOTAL_CONNECTIONS,
            "max_total_connections is not positive, using default"
        );
    }
    if host.max_per_route_connections <= 0 {
        tracing::warn!(
            configured = host.max_per_route_connections,
            fallback = DEFAULT_MAX_PER_ROUTE_CONNECTIONS,
            "max_per_route_connections is not positive, using default"
        );
    }
}
