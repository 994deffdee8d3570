//! Inbound HTTP surface of the gateway binary.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id + trace layers)
//!     → request.rs (request id assignment)
//!     → proxy::ForwardingFilter (translate → execute → relay)
//!     → server.rs (strip hop-by-hop, map failures to 502/503/504)
//!     → Send to client
//! ```

pub mod request;
pub mod server;

pub use request::{RequestIdExt, UuidRequestId, X_REQUEST_ID};
pub use server::HttpServer;
