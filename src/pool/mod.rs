//! Outbound connection pool subsystem.
//!
//! # Data Flow
//! ```text
//! OutboundRequest target
//!     → route.rs (scheme + host + port key)
//!     → manager.rs (reuse idle / reserve slot / wait at cap)
//!     → connection.rs (TCP connect → optional TLS → HTTP/1.1 handshake)
//!     → PooledConnection lease handed to the executor
//!     → lease dropped: back to idle (drained, keep-alive) or closed
//!
//! Background:
//!     reaper.rs periodically closes expired idle connections
//! ```
//!
//! # Design Decisions
//! - The pool is an owned object injected where needed, never a global
//! - Caps count live connections (leased + idle), per route and in total
//! - Sizes and TLS policy are fixed at construction; reconfiguring means
//!   building a new pool

pub mod connection;
pub mod manager;
pub mod reaper;
pub mod route;
pub mod settings;
pub mod tls;

pub use connection::PooledConnection;
pub use manager::{ConnectionPool, PoolStats, RouteStats};
pub use route::{Route, RouteScheme};
pub use settings::PoolSettings;
