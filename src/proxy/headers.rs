//! Hop-by-hop header handling.
//!
//! # Responsibilities
//! - Drop headers that only describe the client-to-gateway connection
//! - Honour extra names listed in the `Connection` header
//! - Leave every end-to-end header (including `content-encoding`) untouched
//!
//! # Design Decisions
//! - `host` and `content-length` are dropped from the inbound set; the
//!   executor and the inbound context supply them for the outbound hop

use hyper::header::{HeaderMap, HeaderName, CONNECTION};

/// Connection-scoped headers per RFC 9110 §7.6.1, plus common legacy ones.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Headers the outbound hop recomputes itself.
const FRAMING_HEADERS: &[&str] = &["host", "content-length"];

/// Names listed in `Connection` header values, lowercased.
pub fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Copy `headers`, dropping hop-by-hop, framing and `ignored` names.
/// Duplicate values and their order are preserved.
pub fn forwardable_request_headers(headers: &HeaderMap, ignored: &[HeaderName]) -> HeaderMap {
    let tokens = connection_tokens(headers);
    let mut out = HeaderMap::with_capacity(headers.len());

    for (name, value) in headers.iter() {
        let lowered = name.as_str();
        if is_hop_by_hop(name)
            || FRAMING_HEADERS.contains(&lowered)
            || ignored.contains(name)
            || tokens.iter().any(|t| t == lowered)
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Remove hop-by-hop headers in place, for a caller writing a relayed
/// response onto its own client connection.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for token in connection_tokens(headers) {
        headers.remove(token.as_str());
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}
