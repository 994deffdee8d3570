//! Normalised pool settings derived from [`FilterConfig`].

use std::time::Duration;

use crate::config::schema::{
    FilterConfig, DEFAULT_MAX_PER_ROUTE_CONNECTIONS, DEFAULT_MAX_TOTAL_CONNECTIONS,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_total: usize,
    pub max_per_route: usize,
    pub ssl_hostname_validation: bool,
    pub connect_timeout: Option<Duration>,
    pub acquire_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub time_to_live: Option<Duration>,
}

impl PoolSettings {
    /// Zero or negative sizes are treated as unset.
    pub fn from_config(config: &FilterConfig) -> Self {
        Self {
            max_total: positive_or(config.max_total_connections, DEFAULT_MAX_TOTAL_CONNECTIONS),
            max_per_route: positive_or(
                config.max_per_route_connections,
                DEFAULT_MAX_PER_ROUTE_CONNECTIONS,
            ),
            ssl_hostname_validation: config.ssl_hostname_validation_enabled,
            connect_timeout: config.connect_timeout(),
            acquire_timeout: config.connection_request_timeout(),
            idle_timeout: config.idle_timeout(),
            time_to_live: config.time_to_live(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from_config(&FilterConfig::default())
    }
}

fn positive_or(value: i64, fallback: usize) -> usize {
    usize::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .unwrap_or(fallback)
}
