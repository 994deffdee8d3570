//! Forwarding core.
//!
//! # Data Flow
//! ```text
//! method + target URI + body + query params + headers
//!     → translate.rs (query merge, hop-by-hop filtering via headers.rs)
//!     → OutboundRequest
//!     → executor.rs (lease from pool, send; upload.rs tracks request-body
//!       progress so the socket timeout only fires on inactivity)
//!     → ProxyResponse { status, headers, RelayBody }
//!     → body.rs (frames relayed as received; lease released at end of body)
//! ```
//!
//! # Design Decisions
//! - One attempt per request; failures surface as `ProxyError`
//! - Bodies stream in both directions, nothing is buffered
//! - Response bytes are never decoded or re-encoded

pub mod body;
pub mod executor;
pub mod filter;
pub mod headers;
pub mod multimap;
pub mod translate;
pub mod upload;

pub use body::RelayBody;
pub use executor::{ProxyExecutor, ProxyResponse};
pub use filter::ForwardingFilter;
pub use headers::{forwardable_request_headers, strip_hop_by_hop, HOP_BY_HOP_HEADERS};
pub use multimap::MultiValueMap;
pub use translate::{merge_query, InboundContext, OutboundRequest, RequestTranslator};
