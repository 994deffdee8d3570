//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     broadcast → server stops accepting → in-flight requests drain
//!               → connection pool closed
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
