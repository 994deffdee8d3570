//! Background sweep of expired idle connections.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time;

use crate::observability::metrics;
use crate::pool::manager::{ConnectionPool, PoolInner};

impl ConnectionPool {
    /// Periodically close idle connections past the keep-alive window or
    /// lifetime, then sample the pool gauges. The task holds only a weak
    /// reference and stops once the pool is dropped or shut down.
    pub fn spawn_reaper(&self, period: Duration) -> JoinHandle<()> {
        let pool = self.downgrade();

        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(inner) = pool.upgrade() else {
                    break;
                };
                if inner.is_closed() {
                    break;
                }
                sweep(&inner);
            }
            tracing::debug!("Connection reaper stopped");
        })
    }
}

/// One reaper tick. Gauges are refreshed here because leases are released
/// when response bodies drain, long after the forward call has returned.
fn sweep(inner: &PoolInner) -> usize {
    let closed = inner.close_expired();
    if closed > 0 {
        tracing::debug!(closed, "Closed expired idle connections");
    }
    metrics::record_pool(&inner.stats());
    closed
}
