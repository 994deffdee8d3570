//! Streaming response body tied to its pooled connection.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use hyper::body::{Body, Bytes, Frame, Incoming, SizeHint};
use tokio::time::{Instant, Sleep};

use crate::error::ProxyError;
use crate::pool::{PooledConnection, Route};

/// Relays the origin's body frames unmodified.
///
/// Holds the connection lease for as long as the body is being read. The
/// connection goes back to the pool only after the body has been read to its
/// end; an error, a stall or dropping the body early discards it.
pub struct RelayBody {
    inner: Incoming,
    lease: Option<PooledConnection>,
    route: Route,
    read_timeout: Option<Duration>,
    idle: Option<Pin<Box<Sleep>>>,
    relayed: u64,
    done: bool,
}

impl RelayBody {
    pub(crate) fn new(
        inner: Incoming,
        mut lease: PooledConnection,
        read_timeout: Option<Duration>,
    ) -> Self {
        let route = lease.route().clone();

        // Nothing to drain (HEAD, 204, 304, empty bodies): release right away.
        if inner.is_end_stream() {
            lease.complete();
            drop(lease);
            return Self {
                inner,
                lease: None,
                route,
                read_timeout,
                idle: None,
                relayed: 0,
                done: true,
            };
        }

        Self {
            inner,
            lease: Some(lease),
            route,
            read_timeout,
            idle: read_timeout.map(|t| Box::pin(tokio::time::sleep(t))),
            relayed: 0,
            done: false,
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Data bytes relayed so far.
    pub fn relayed(&self) -> u64 {
        self.relayed
    }

    /// True while the body still holds its connection lease.
    pub fn holds_connection(&self) -> bool {
        self.lease.is_some()
    }

    fn finish(&mut self) {
        self.done = true;
        self.idle = None;
        if let Some(mut lease) = self.lease.take() {
            lease.complete();
            tracing::trace!(route = %self.route, bytes = self.relayed, "Response body drained");
        }
    }

    fn abort(&mut self) {
        self.done = true;
        self.idle = None;
        // Dropped without `complete()`: the connection is closed, not pooled.
        self.lease.take();
    }
}

impl Body for RelayBody {
    type Data = Bytes;
    type Error = ProxyError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.relayed += data.len() as u64;
                }
                if let (Some(idle), Some(limit)) = (this.idle.as_mut(), this.read_timeout) {
                    idle.as_mut().reset(Instant::now() + limit);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(source))) => {
                tracing::debug!(
                    route = %this.route,
                    bytes = this.relayed,
                    error = %source,
                    "Response body interrupted"
                );
                this.abort();
                Poll::Ready(Some(Err(ProxyError::Relay {
                    route: this.route.clone(),
                    source,
                })))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => {
                let stalled = this
                    .idle
                    .as_mut()
                    .is_some_and(|idle| idle.as_mut().poll(cx).is_ready());
                if !stalled {
                    return Poll::Pending;
                }
                let timeout = this.read_timeout.unwrap_or_default();
                tracing::debug!(route = %this.route, bytes = this.relayed, "Response body stalled");
                this.abort();
                Poll::Ready(Some(Err(ProxyError::RelayTimeout {
                    route: this.route.clone(),
                    timeout,
                })))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        if self.done {
            return SizeHint::with_exact(0);
        }
        self.inner.size_hint()
    }
}

impl std::fmt::Debug for RelayBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayBody")
            .field("route", &self.route)
            .field("relayed", &self.relayed)
            .field("done", &self.done)
            .finish()
    }
}
