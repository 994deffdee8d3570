//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → FilterConfig handed to the forwarding filter at construction
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → new ForwardingFilter (and pool) built from it
//!     → atomic swap in the server state
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require rebuilding the pool
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{FilterConfig, GatewayConfig, ListenerConfig, ObservabilityConfig, UpstreamConfig};
