//! Failure taxonomy for the forwarding core.
//!
//! Every failure reaches the caller as a typed [`ProxyError`]; the core never
//! substitutes a fabricated response. Mapping to client-facing status codes is
//! left to the surrounding framework.

use std::time::Duration;

use thiserror::Error;

use crate::pool::Route;

/// Boxed error used where the underlying library error type is not worth exposing.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// The target URI cannot be forwarded (missing host, unsupported scheme...).
    #[error("invalid target `{uri}`: {reason}")]
    InvalidTarget { uri: String, reason: &'static str },

    /// No connection slot became free before the acquisition deadline.
    #[error("timed out after {waited:?} waiting for a pooled connection to {route}")]
    PoolTimeout { route: Route, waited: Duration },

    /// The pool was shut down.
    #[error("connection pool is shut down")]
    PoolClosed,

    /// Connection refused, reset during connect, or name resolution failure.
    #[error("failed to connect to {route}: {source}")]
    Connect {
        route: Route,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to {route} after {timeout:?}")]
    ConnectTimeout { route: Route, timeout: Duration },

    /// TLS handshake failure, including certificate trust failures.
    #[error("TLS handshake with {route} failed: {source}")]
    Tls {
        route: Route,
        #[source]
        source: std::io::Error,
    },

    /// The TLS client configuration could not be built.
    #[error("invalid TLS client configuration: {0}")]
    TlsSetup(#[source] BoxError),

    /// The origin failed before a response head was received.
    #[error("request to {route} failed: {source}")]
    Upstream {
        route: Route,
        #[source]
        source: hyper::Error,
    },

    #[error("no response from {route} within {timeout:?}")]
    ResponseTimeout { route: Route, timeout: Duration },

    /// The response body was cut off after relaying started. Bytes already
    /// handed to the caller are not retracted.
    #[error("response body from {route} was interrupted: {source}")]
    Relay {
        route: Route,
        #[source]
        source: hyper::Error,
    },

    #[error("response body from {route} stalled for {timeout:?}")]
    RelayTimeout { route: Route, timeout: Duration },

    #[error("failed to build outbound request: {0}")]
    Request(#[from] hyper::http::Error),
}

impl ProxyError {
    /// True for every deadline-driven failure (gateway-timeout class).
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ProxyError::PoolTimeout { .. }
                | ProxyError::ConnectTimeout { .. }
                | ProxyError::ResponseTimeout { .. }
                | ProxyError::RelayTimeout { .. }
        )
    }

    /// True when the origin could not be reached at all.
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, ProxyError::Connect { .. } | ProxyError::Tls { .. })
    }

    pub fn is_pool_exhausted(&self) -> bool {
        matches!(self, ProxyError::PoolTimeout { .. })
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::InvalidTarget { .. } => "invalid_target",
            ProxyError::PoolTimeout { .. } => "pool_timeout",
            ProxyError::PoolClosed => "pool_closed",
            ProxyError::Connect { .. } => "connect",
            ProxyError::ConnectTimeout { .. } => "connect_timeout",
            ProxyError::Tls { .. } => "tls",
            ProxyError::TlsSetup(_) => "tls_setup",
            ProxyError::Upstream { .. } => "upstream",
            ProxyError::ResponseTimeout { .. } => "response_timeout",
            ProxyError::Relay { .. } => "relay",
            ProxyError::RelayTimeout { .. } => "relay_timeout",
            ProxyError::Request(_) => "request",
        }
    }
}
