//! Single-hop HTTP forwarding with a bounded, route-keyed connection pool.
//!
//! The core is [`ForwardingFilter`]: it rebuilds an inbound request for an
//! absolute target URI, sends it over a pooled connection and hands back the
//! origin's status, headers and streaming body unmodified. The `http` and
//! `lifecycle` modules wrap it into a standalone gateway binary.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pool;
pub mod proxy;

pub use config::{FilterConfig, GatewayConfig};
pub use error::ProxyError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use pool::{ConnectionPool, PooledConnection, Route};
pub use proxy::{
    ForwardingFilter, InboundContext, MultiValueMap, OutboundRequest, ProxyExecutor, ProxyResponse,
    RelayBody, RequestTranslator,
};
