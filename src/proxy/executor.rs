//! Single-attempt execution of an outbound request.
//!
//! # Responsibilities
//! - Lease a connection for the target's route
//! - Send the request, failing once the exchange has been idle for the
//!   socket timeout (request body streaming counts as activity)
//! - Hand back status, headers and a streaming body exactly as received
//!
//! # Design Decisions
//! - No retries and no fallback responses: every failure is a typed error
//! - No content decoding: `content-encoding` and the body bytes pass through
//! - The lease moves into the response body and is released when the body
//!   has been drained, or discarded on error or early drop

use std::time::Duration;

use axum::body::Body;
use hyper::body::{Body as HttpBody, Incoming};
use hyper::header::HeaderMap;
use hyper::http::response::Parts;
use hyper::{Request, Response, StatusCode, Version};

use crate::config::FilterConfig;
use crate::error::ProxyError;
use crate::pool::{ConnectionPool, PooledConnection, Route};
use crate::proxy::body::RelayBody;
use crate::proxy::headers::connection_tokens;
use crate::proxy::translate::OutboundRequest;
use crate::proxy::upload::{Activity, UploadBody};

/// An origin response: status and headers as received, body still streaming.
#[derive(Debug)]
pub struct ProxyResponse {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    body: RelayBody,
}

impl ProxyResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &RelayBody {
        &self.body
    }

    pub fn into_body(self) -> RelayBody {
        self.body
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, RelayBody) {
        (self.status, self.headers, self.body)
    }

    /// Convert for an axum handler. Headers are copied unmodified, including
    /// `content-encoding` and any hop-by-hop headers the origin sent.
    pub fn into_response(self) -> Response<axum::body::Body> {
        let mut response = Response::new(axum::body::Body::new(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Runs one outbound exchange per call against a shared pool.
#[derive(Debug, Clone)]
pub struct ProxyExecutor {
    pool: ConnectionPool,
    socket_timeout: Option<Duration>,
}

impl ProxyExecutor {
    pub fn new(pool: ConnectionPool, config: &FilterConfig) -> Self {
        Self {
            pool,
            socket_timeout: config.socket_timeout(),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub async fn execute(&self, request: OutboundRequest) -> Result<ProxyResponse, ProxyError> {
        let route = Route::from_uri(request.uri())?;
        let mut lease = self.pool.acquire(&route).await?;
        let reused = lease.is_reused();
        let wire = request.into_http(&route)?;

        let response = match self.socket_timeout {
            Some(limit) => send_until_idle(&mut lease, wire, &route, limit).await?,
            None => lease.send(wire).await.map_err(|source| ProxyError::Upstream {
                route: route.clone(),
                source,
            })?,
        };

        let (parts, body) = response.into_parts();
        if !allows_reuse(&parts) {
            lease.disable_keep_alive();
        }

        tracing::debug!(
            route = %route,
            status = parts.status.as_u16(),
            reused,
            "Origin responded"
        );

        Ok(ProxyResponse {
            status: parts.status,
            version: parts.version,
            body: RelayBody::new(body, lease, self.socket_timeout),
            headers: parts.headers,
        })
    }
}

/// Send `wire` and wait for the response head, failing only after `limit`
/// passes with neither request-body progress nor a response.
async fn send_until_idle(
    lease: &mut PooledConnection,
    wire: Request<Body>,
    route: &Route,
    limit: Duration,
) -> Result<Response<Incoming>, ProxyError> {
    let activity = Activity::new();
    let (parts, body) = wire.into_parts();
    let body = if body.is_end_stream() {
        body
    } else {
        Body::new(UploadBody::new(body, activity.clone()))
    };

    let send = lease.send(Request::from_parts(parts, body));
    tokio::pin!(send);

    loop {
        let deadline = activity.last() + limit;
        tokio::select! {
            sent = &mut send => {
                return sent.map_err(|source| ProxyError::Upstream {
                    route: route.clone(),
                    source,
                });
            }
            _ = tokio::time::sleep_until(deadline) => {
                // The upload may have progressed while we slept.
                if activity.last() + limit <= tokio::time::Instant::now() {
                    return Err(ProxyError::ResponseTimeout {
                        route: route.clone(),
                        timeout: limit,
                    });
                }
            }
        }
    }
}

/// Whether the origin left the connection open for another request.
fn allows_reuse(parts: &Parts) -> bool {
    let tokens = connection_tokens(&parts.headers);
    if tokens.iter().any(|t| t == "close") {
        return false;
    }
    parts.version != Version::HTTP_10 || tokens.iter().any(|t| t == "keep-alive")
}
