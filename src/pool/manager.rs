//! Bounded, route-keyed connection pool.
//!
//! # Responsibilities
//! - Enforce the global and per-route caps on live connections
//! - Reuse idle keep-alive connections (most recently used first)
//! - Block acquisitions at a cap until a slot frees up or the deadline passes
//! - Lazily close idle connections past the keep-alive window or lifetime
//!
//! # Design Decisions
//! - One short critical section per acquire/release; connecting, TLS and
//!   request I/O all happen outside the lock, so routes never wait on each
//!   other except for slots
//! - A live connection is either leased or idle; `total` counts both
//! - At the global cap, an idle connection of another route is closed to make
//!   room before resorting to waiting

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use rustls::RootCertStore;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;

use crate::config::FilterConfig;
use crate::error::ProxyError;
use crate::pool::connection::{self, LiveConnection, PooledConnection};
use crate::pool::route::Route;
use crate::pool::settings::PoolSettings;
use crate::pool::tls;

/// Aggregate pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Live connections, leased plus idle.
    pub total: usize,
    pub leased: usize,
    pub idle: usize,
    /// Routes with at least one live connection.
    pub routes: usize,
}

/// Counters for a single route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteStats {
    pub leased: usize,
    pub idle: usize,
}

impl RouteStats {
    pub fn live(&self) -> usize {
        self.leased + self.idle
    }
}

/// Shared outbound connection pool. Cloning is cheap and shares the pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Build a pool from configuration, trusting the public web PKI roots.
    pub fn configure(config: &FilterConfig) -> Result<Self, ProxyError> {
        Self::with_roots(config, tls::default_roots())
    }

    /// Build a pool that trusts the given root certificates.
    pub fn with_roots(config: &FilterConfig, roots: Arc<RootCertStore>) -> Result<Self, ProxyError> {
        let settings = PoolSettings::from_config(config);
        let tls_config = tls::client_config(roots, settings.ssl_hostname_validation)?;

        tracing::info!(
            max_total = settings.max_total,
            max_per_route = settings.max_per_route,
            ssl_hostname_validation = settings.ssl_hostname_validation,
            "Connection pool configured"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                settings,
                connector: TlsConnector::from(tls_config),
                state: Mutex::new(PoolState::default()),
                released: Notify::new(),
            }),
        })
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }

    pub fn max_total(&self) -> usize {
        self.inner.settings.max_total
    }

    pub fn max_per_route(&self) -> usize {
        self.inner.settings.max_per_route
    }

    pub fn is_ssl_hostname_validation_enabled(&self) -> bool {
        self.inner.settings.ssl_hostname_validation
    }

    /// Lease a connection for `route`, reusing an idle one when possible.
    ///
    /// Waits while the route or the whole pool is at its cap. Fails with
    /// [`ProxyError::PoolTimeout`] once the acquisition timeout elapses.
    pub async fn acquire(&self, route: &Route) -> Result<PooledConnection, ProxyError> {
        let started = Instant::now();
        let deadline = self.inner.settings.acquire_timeout.map(|t| started + t);

        loop {
            // Registered before inspecting state so a release in between is not missed.
            let released = self.inner.released.notified();

            match self.inner.reserve(route)? {
                Slot::Reused(conn) => {
                    let mut lease = PooledConnection::reused(self.inner.clone(), route.clone(), conn);
                    if lease.ready().await {
                        tracing::trace!(route = %route, "Reusing pooled connection");
                        return Ok(lease);
                    }
                    tracing::debug!(route = %route, "Discarding stale pooled connection");
                }
                Slot::Fresh => {
                    // The reserved slot is freed again if connecting fails.
                    let mut lease = PooledConnection::reserved(self.inner.clone(), route.clone());
                    let conn =
                        connection::establish(route, &self.inner.settings, &self.inner.connector)
                            .await?;
                    lease.attach(conn);
                    return Ok(lease);
                }
                Slot::Exhausted => {
                    tracing::trace!(route = %route, "Pool at capacity, waiting for a release");
                    match deadline {
                        Some(deadline) => {
                            if tokio::time::timeout_at(deadline, released).await.is_err() {
                                return Err(ProxyError::PoolTimeout {
                                    route: route.clone(),
                                    waited: started.elapsed(),
                                });
                            }
                        }
                        None => released.await,
                    }
                }
            }
        }
    }

    /// Close idle connections past the keep-alive window or lifetime.
    /// Returns how many were closed.
    pub fn close_expired(&self) -> usize {
        self.inner.close_expired()
    }

    /// Close every idle connection and refuse further acquisitions.
    /// Outstanding leases are discarded when they are returned.
    pub fn shutdown(&self) {
        let closed = {
            let mut state = self.inner.lock();
            state.closed = true;
            let idle: usize = state.routes.values().map(|e| e.idle.len()).sum();
            for entry in state.routes.values_mut() {
                entry.idle.clear();
            }
            state.routes.retain(|_, e| !e.is_empty());
            state.total -= idle;
            idle
        };
        self.inner.released.notify_waiters();
        tracing::info!(closed_idle = closed, "Connection pool shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.stats()
    }

    pub fn route_stats(&self, route: &Route) -> RouteStats {
        let state = self.inner.lock();
        state
            .routes
            .get(route)
            .map(|e| RouteStats {
                leased: e.leased,
                idle: e.idle.len(),
            })
            .unwrap_or_default()
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<PoolInner> {
        Arc::downgrade(&self.inner)
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("settings", &self.inner.settings)
            .field("stats", &self.stats())
            .finish()
    }
}

pub(crate) struct PoolInner {
    settings: PoolSettings,
    connector: TlsConnector,
    state: Mutex<PoolState>,
    released: Notify,
}

#[derive(Default)]
struct PoolState {
    total: usize,
    routes: HashMap<Route, RouteEntry>,
    closed: bool,
}

#[derive(Default)]
struct RouteEntry {
    leased: usize,
    /// Oldest at the front.
    idle: VecDeque<IdleConnection>,
}

impl RouteEntry {
    fn live(&self) -> usize {
        self.leased + self.idle.len()
    }

    fn is_empty(&self) -> bool {
        self.live() == 0
    }
}

struct IdleConnection {
    conn: LiveConnection,
    idle_since: Instant,
}

enum Slot {
    Reused(LiveConnection),
    Fresh,
    Exhausted,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().expect("connection pool mutex poisoned")
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let state = self.lock();
        let mut stats = PoolStats {
            total: state.total,
            routes: state.routes.len(),
            ..PoolStats::default()
        };
        for entry in state.routes.values() {
            stats.leased += entry.leased;
            stats.idle += entry.idle.len();
        }
        stats
    }

    fn outlived(&self, conn: &LiveConnection, now: Instant) -> bool {
        self.settings
            .time_to_live
            .is_some_and(|ttl| now.duration_since(conn.created) >= ttl)
    }

    fn is_expired(&self, idle: &IdleConnection, now: Instant) -> bool {
        idle.conn.is_closed()
            || self.outlived(&idle.conn, now)
            || self
                .settings
                .idle_timeout
                .is_some_and(|t| now.duration_since(idle.idle_since) >= t)
    }

    /// Claim a slot for `route`: an idle connection, room for a new one, or nothing.
    fn reserve(&self, route: &Route) -> Result<Slot, ProxyError> {
        let mut state = self.lock();
        if state.closed {
            return Err(ProxyError::PoolClosed);
        }
        let now = Instant::now();
        let PoolState { total, routes, .. } = &mut *state;

        if let Some(entry) = routes.get_mut(route) {
            while let Some(idle) = entry.idle.pop_back() {
                if self.is_expired(&idle, now) {
                    *total -= 1;
                    continue;
                }
                entry.leased += 1;
                return Ok(Slot::Reused(idle.conn));
            }
            if entry.live() >= self.settings.max_per_route {
                return Ok(Slot::Exhausted);
            }
        }

        if *total >= self.settings.max_total {
            let victim = routes
                .iter()
                .filter(|(key, entry)| *key != route && !entry.idle.is_empty())
                .min_by_key(|(_, entry)| entry.idle.front().map(|c| c.idle_since))
                .map(|(key, _)| key.clone());
            let Some(victim) = victim else {
                return Ok(Slot::Exhausted);
            };
            if let Some(entry) = routes.get_mut(&victim) {
                entry.idle.pop_front();
                if entry.is_empty() {
                    routes.remove(&victim);
                }
            }
            *total -= 1;
            tracing::trace!(evicted = %victim, route = %route, "Closed idle connection to make room");
        }

        routes.entry(route.clone()).or_default().leased += 1;
        *total += 1;
        Ok(Slot::Fresh)
    }

    /// Return a lease's slot. `conn` is pooled only if `reusable` and still healthy.
    pub(crate) fn release(&self, route: &Route, conn: Option<LiveConnection>, reusable: bool) {
        {
            let mut state = self.lock();
            let now = Instant::now();
            let PoolState {
                total,
                routes,
                closed,
            } = &mut *state;

            if let Some(entry) = routes.get_mut(route) {
                entry.leased -= 1;
                match conn {
                    Some(conn) if reusable && !*closed && !conn.is_closed() && !self.outlived(&conn, now) => {
                        entry.idle.push_back(IdleConnection {
                            conn,
                            idle_since: now,
                        });
                    }
                    _ => *total -= 1,
                }
                if entry.is_empty() {
                    routes.remove(route);
                }
            }
        }
        self.released.notify_waiters();
    }

    pub(crate) fn close_expired(&self) -> usize {
        let closed = {
            let mut state = self.lock();
            let now = Instant::now();
            let mut closed = 0;
            for entry in state.routes.values_mut() {
                let before = entry.idle.len();
                entry.idle.retain(|idle| !self.is_expired(idle, now));
                closed += before - entry.idle.len();
            }
            state.routes.retain(|_, e| !e.is_empty());
            state.total -= closed;
            closed
        };
        if closed > 0 {
            self.released.notify_waiters();
        }
        closed
    }
}
