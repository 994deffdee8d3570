//! Inbound → outbound request reconstruction.
//!
//! # Responsibilities
//! - Pass method and target URI through verbatim
//! - Merge separately supplied query parameters into the target's query
//! - Attach the inbound body as a stream, whatever the method
//! - Filter hop-by-hop headers, keep everything else in order
//!
//! # Design Decisions
//! - Already-encoded query components are never re-encoded: `%` is left
//!   alone, only bytes that are illegal in a query are escaped
//! - The declared inbound length becomes the outbound `content-length`;
//!   without it the body goes out chunked

use std::net::SocketAddr;

use axum::body::Body;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH};
use hyper::http::uri::PathAndQuery;
use hyper::{Method, Request, Uri};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::error::ProxyError;
use crate::pool::Route;
use crate::proxy::headers::forwardable_request_headers;
use crate::proxy::multimap::MultiValueMap;

/// Bytes escaped when appending a parameter. `%` is deliberately absent so
/// existing escapes survive; `&`, `=` and `#` would change the query's shape.
const QUERY_COMPONENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'&')
    .add(b'<')
    .add(b'=')
    .add(b'>');

/// Facts about the inbound request that are not part of its header set.
#[derive(Debug, Clone, Default)]
pub struct InboundContext {
    /// Declared body length, if the client sent one.
    pub content_length: Option<u64>,
    /// Correlation id used on log events.
    pub request_id: Option<String>,
    /// Peer that sent the inbound request, logged as `client`.
    pub remote_addr: Option<SocketAddr>,
}

impl InboundContext {
    /// Read `content-length` and `x-request-id` from inbound headers.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            content_length: headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok()),
            request_id: headers
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
            remote_addr: None,
        }
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

/// A reconstructed request, ready for the executor. Immutable once built.
#[derive(Debug)]
pub struct OutboundRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Option<Body>,
    request_id: Option<String>,
}

impl OutboundRequest {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn into_body(self) -> Option<Body> {
        self.body
    }

    /// Build the wire request: origin-form request line, `host` from the route.
    pub(crate) fn into_http(self, route: &Route) -> Result<Request<Body>, ProxyError> {
        let path = self
            .uri
            .path_and_query()
            .map(PathAndQuery::as_str)
            .filter(|p| !p.is_empty())
            .unwrap_or("/");

        let mut builder = Request::builder().method(self.method).uri(path);
        if let Some(headers) = builder.headers_mut() {
            *headers = self.headers;
            let host = HeaderValue::from_str(&route.authority()).map_err(hyper::http::Error::from)?;
            headers.insert(hyper::header::HOST, host);
        }
        Ok(builder.body(self.body.unwrap_or_else(Body::empty))?)
    }
}

/// Builds [`OutboundRequest`]s from inbound request descriptions.
#[derive(Debug, Clone, Default)]
pub struct RequestTranslator {
    ignored_headers: Vec<HeaderName>,
}

impl RequestTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also drop these request headers. Invalid names are skipped.
    pub fn with_ignored_headers<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ignored_headers = names
            .into_iter()
            .filter_map(|name| {
                let parsed = HeaderName::from_bytes(name.as_ref().trim().as_bytes()).ok();
                if parsed.is_none() {
                    tracing::warn!(header = name.as_ref(), "Ignoring invalid header name");
                }
                parsed
            })
            .collect();
        Self { ignored_headers }
    }

    pub fn translate(
        &self,
        method: Method,
        target: &Uri,
        body: Option<Body>,
        query_params: &MultiValueMap,
        headers: &HeaderMap,
        context: &InboundContext,
    ) -> Result<OutboundRequest, ProxyError> {
        let uri = merge_query(target, query_params)?;
        let mut headers = forwardable_request_headers(headers, &self.ignored_headers);

        if body.is_some() {
            if let Some(length) = context.content_length {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
            }
        }

        tracing::trace!(
            request_id = context.request_id.as_deref().unwrap_or("-"),
            method = %method,
            uri = %uri,
            headers = headers.len(),
            has_body = body.is_some(),
            "Translated request"
        );

        Ok(OutboundRequest {
            method,
            uri,
            headers,
            body,
            request_id: context.request_id.clone(),
        })
    }
}

/// Append `params` to the target's existing query, preserving both orders.
pub fn merge_query(target: &Uri, params: &MultiValueMap) -> Result<Uri, ProxyError> {
    if params.is_empty() {
        return Ok(target.clone());
    }

    let mut query = target.query().unwrap_or_default().to_owned();
    for (name, values) in params.iter() {
        for value in values {
            if !query.is_empty() {
                query.push('&');
            }
            query.extend(utf8_percent_encode(name, QUERY_COMPONENT));
            if let Some(value) = value {
                query.push('=');
                query.extend(utf8_percent_encode(value, QUERY_COMPONENT));
            }
        }
    }

    let path_and_query: PathAndQuery = format!("{}?{}", target.path(), query)
        .parse()
        .map_err(|_| ProxyError::InvalidTarget {
            uri: target.to_string(),
            reason: "query parameters produce an invalid uri",
        })?;

    let mut parts = target.clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    Uri::from_parts(parts).map_err(|_| ProxyError::InvalidTarget {
        uri: target.to_string(),
        reason: "query parameters produce an invalid uri",
    })
}
