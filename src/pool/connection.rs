//! Outbound connection establishment and the lease handed to callers.
//!
//! # Responsibilities
//! - Open TCP (and TLS) connections and run the HTTP/1.1 handshake
//! - Spawn one driver task per connection
//! - Return the connection to its pool, or discard it, when the lease drops

use std::sync::Arc;

use axum::body::Body;
use hyper::body::Incoming;
use hyper::client::conn::http1::{self, SendRequest};
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;

use crate::error::ProxyError;
use crate::pool::manager::PoolInner;
use crate::pool::route::Route;
use crate::pool::settings::PoolSettings;

/// An established connection, pooled or leased.
pub(crate) struct LiveConnection {
    pub(crate) sender: SendRequest<Body>,
    pub(crate) created: Instant,
}

impl LiveConnection {
    pub(crate) fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Open a new connection to `route`, bounded by the connect timeout.
pub(crate) async fn establish(
    route: &Route,
    settings: &PoolSettings,
    tls: &TlsConnector,
) -> Result<LiveConnection, ProxyError> {
    let sender = match settings.connect_timeout {
        Some(limit) => tokio::time::timeout(limit, open(route, tls))
            .await
            .map_err(|_| ProxyError::ConnectTimeout {
                route: route.clone(),
                timeout: limit,
            })??,
        None => open(route, tls).await?,
    };

    tracing::debug!(route = %route, "Opened outbound connection");
    Ok(LiveConnection {
        sender,
        created: Instant::now(),
    })
}

async fn open(route: &Route, tls: &TlsConnector) -> Result<SendRequest<Body>, ProxyError> {
    let stream = TcpStream::connect((route.connect_host(), route.port()))
        .await
        .map_err(|source| ProxyError::Connect {
            route: route.clone(),
            source,
        })?;
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(route = %route, error = %e, "Failed to set TCP_NODELAY");
    }

    if !route.is_tls() {
        return handshake(route, stream).await;
    }

    let server_name = ServerName::try_from(route.connect_host().to_owned()).map_err(|_| {
        ProxyError::InvalidTarget {
            uri: route.to_string(),
            reason: "host is not a valid TLS server name",
        }
    })?;
    let stream = tls
        .connect(server_name, stream)
        .await
        .map_err(|source| ProxyError::Tls {
            route: route.clone(),
            source,
        })?;
    handshake(route, stream).await
}

async fn handshake<S>(route: &Route, io: S) -> Result<SendRequest<Body>, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, connection) = http1::Builder::new()
        .handshake::<_, Body>(TokioIo::new(io))
        .await
        .map_err(|source| ProxyError::Upstream {
            route: route.clone(),
            source,
        })?;

    let route = route.clone();
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!(route = %route, error = %e, "Connection closed with error");
        }
    });

    Ok(sender)
}

/// A leased connection slot.
///
/// Dropping the lease returns the connection to the pool only when the
/// exchange completed and the origin allows reuse; otherwise the connection
/// is closed and its slot freed. Either way waiters are woken.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    route: Route,
    conn: Option<LiveConnection>,
    reused: bool,
    keep_alive: bool,
    completed: bool,
}

impl PooledConnection {
    /// A slot that has been counted but not yet connected.
    pub(crate) fn reserved(pool: Arc<PoolInner>, route: Route) -> Self {
        Self {
            pool,
            route,
            conn: None,
            reused: false,
            keep_alive: true,
            completed: false,
        }
    }

    pub(crate) fn reused(pool: Arc<PoolInner>, route: Route, conn: LiveConnection) -> Self {
        Self {
            pool,
            route,
            conn: Some(conn),
            reused: true,
            keep_alive: true,
            completed: false,
        }
    }

    pub(crate) fn attach(&mut self, conn: LiveConnection) {
        self.conn = Some(conn);
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    /// True when this lease picked up an idle connection.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    /// Prevent reuse, e.g. when the origin answered `Connection: close`.
    pub fn disable_keep_alive(&mut self) {
        self.keep_alive = false;
    }

    /// Mark the exchange as fully consumed so the connection may be pooled.
    pub fn complete(&mut self) {
        self.completed = true;
    }

    fn sender(&mut self) -> &mut SendRequest<Body> {
        &mut self
            .conn
            .as_mut()
            .expect("lease holds a connection once acquired")
            .sender
    }

    /// Wait until the connection can accept a request; false if it is dead.
    pub(crate) async fn ready(&mut self) -> bool {
        self.sender().ready().await.is_ok()
    }

    pub async fn send(&mut self, request: Request<Body>) -> Result<Response<Incoming>, hyper::Error> {
        self.sender().send_request(request).await
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("route", &self.route)
            .field("reused", &self.reused)
            .field("keep_alive", &self.keep_alive)
            .field("completed", &self.completed)
            .finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let reusable = self.completed && self.keep_alive;
        self.pool.release(&self.route, self.conn.take(), reusable);
    }
}
