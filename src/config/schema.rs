//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the forwarder.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default global cap on live outbound connections.
pub const DEFAULT_MAX_TOTAL_CONNECTIONS: usize = 200;

/// Default cap on live outbound connections per route.
pub const DEFAULT_MAX_PER_ROUTE_CONNECTIONS: usize = 20;

/// Root configuration for the gateway binary.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Origin that every inbound request is forwarded to.
    pub upstream: UpstreamConfig,

    /// Outbound pool, TLS and timeout settings.
    pub host: FilterConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Upstream target configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Absolute base URL; the inbound path is appended to its path.
    pub url: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:3000".to_string(),
        }
    }
}

/// Immutable settings consumed by the forwarding core.
///
/// Sizes and timeouts are signed so that "unset" values coming from a config
/// file (zero or negative) can be represented; the pool normalises them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Global cap on live connections. `<= 0` falls back to 200.
    pub max_total_connections: i64,

    /// Cap on live connections per route. `<= 0` falls back to 20.
    pub max_per_route_connections: i64,

    /// When false, certificate hostname checks are skipped; chain trust is
    /// still enforced.
    pub ssl_hostname_validation_enabled: bool,

    /// TCP connect (and TLS handshake) timeout in milliseconds.
    pub connect_timeout_ms: i64,

    /// Inactivity timeout in milliseconds. Request body frames keep the
    /// exchange alive; after the body ends it bounds the wait for the response
    /// head, then the gap between response body frames.
    pub socket_timeout_ms: i64,

    /// Maximum time to wait for a pool slot, in milliseconds.
    pub connection_request_timeout_ms: i64,

    /// Idle connections older than this are closed (keep-alive window).
    pub idle_timeout_ms: i64,

    /// Maximum lifetime of a connection regardless of activity.
    pub time_to_live_ms: i64,

    /// Period of the background expired-connection sweep.
    pub idle_check_interval_ms: i64,

    /// Extra request headers that are never forwarded.
    pub ignored_headers: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_total_connections: DEFAULT_MAX_TOTAL_CONNECTIONS as i64,
            max_per_route_connections: DEFAULT_MAX_PER_ROUTE_CONNECTIONS as i64,
            ssl_hostname_validation_enabled: true,
            connect_timeout_ms: 2_000,
            socket_timeout_ms: 10_000,
            connection_request_timeout_ms: 10_000,
            idle_timeout_ms: 30_000,
            time_to_live_ms: -1,
            idle_check_interval_ms: 30_000,
            ignored_headers: Vec::new(),
        }
    }
}

impl FilterConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        millis(self.connect_timeout_ms)
    }

    pub fn socket_timeout(&self) -> Option<Duration> {
        millis(self.socket_timeout_ms)
    }

    pub fn connection_request_timeout(&self) -> Option<Duration> {
        millis(self.connection_request_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        millis(self.idle_timeout_ms)
    }

    pub fn time_to_live(&self) -> Option<Duration> {
        millis(self.time_to_live_ms)
    }

    pub fn idle_check_interval(&self) -> Option<Duration> {
        millis(self.idle_check_interval_ms)
    }
}

/// Non-positive values mean "no limit".
fn millis(value: i64) -> Option<Duration> {
    u64::try_from(value)
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format: "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
