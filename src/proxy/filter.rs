//! The forwarding filter: translator, executor and pool behind one handle.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use hyper::header::HeaderMap;
use hyper::{Method, Uri};
use tokio::task::JoinHandle;

use crate::config::FilterConfig;
use crate::error::ProxyError;
use crate::observability::metrics;
use crate::pool::ConnectionPool;
use crate::proxy::executor::{ProxyExecutor, ProxyResponse};
use crate::proxy::multimap::MultiValueMap;
use crate::proxy::translate::{InboundContext, RequestTranslator};

/// Forwards inbound requests to absolute target URIs over a shared pool.
///
/// Built once from a [`FilterConfig`] snapshot. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct ForwardingFilter {
    config: Arc<FilterConfig>,
    translator: RequestTranslator,
    executor: ProxyExecutor,
    reaper: Option<Arc<JoinHandle<()>>>,
}

impl ForwardingFilter {
    /// Build the filter and its pool, trusting the public web PKI roots.
    pub fn new(config: FilterConfig) -> Result<Self, ProxyError> {
        let pool = ConnectionPool::configure(&config)?;
        Ok(Self::with_pool(config, pool))
    }

    /// Build the filter around an existing pool (e.g. one with custom roots).
    ///
    /// The expired-connection sweep is started when called inside a Tokio
    /// runtime and `idle_check_interval_ms` is positive.
    pub fn with_pool(config: FilterConfig, pool: ConnectionPool) -> Self {
        let reaper = match (config.idle_check_interval(), tokio::runtime::Handle::try_current()) {
            (Some(period), Ok(_)) => Some(Arc::new(pool.spawn_reaper(period))),
            (Some(_), Err(_)) => {
                tracing::warn!("No Tokio runtime, idle connections are only closed lazily");
                None
            }
            (None, _) => None,
        };

        Self {
            translator: RequestTranslator::with_ignored_headers(&config.ignored_headers),
            executor: ProxyExecutor::new(pool, &config),
            config: Arc::new(config),
            reaper,
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn pool(&self) -> &ConnectionPool {
        self.executor.pool()
    }

    pub fn translator(&self) -> &RequestTranslator {
        &self.translator
    }

    pub fn executor(&self) -> &ProxyExecutor {
        &self.executor
    }

    pub fn is_ssl_hostname_validation_enabled(&self) -> bool {
        self.pool().is_ssl_hostname_validation_enabled()
    }

    /// Translate and execute one inbound request.
    ///
    /// The returned body must be consumed or dropped for the connection to
    /// be released.
    pub async fn forward(
        &self,
        method: Method,
        target: &Uri,
        body: Option<Body>,
        query_params: &MultiValueMap,
        headers: &HeaderMap,
        context: &InboundContext,
    ) -> Result<ProxyResponse, ProxyError> {
        let started = Instant::now();
        let request_id = context.request_id.as_deref().unwrap_or("-");
        let client = context
            .remote_addr
            .map_or_else(|| "-".to_string(), |addr| addr.to_string());
        let method_label = method.to_string();

        let outcome = match self
            .translator
            .translate(method, target, body, query_params, headers, context)
        {
            Ok(outbound) => self.executor.execute(outbound).await,
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(response) => {
                tracing::info!(
                    request_id,
                    client = %client,
                    method = %method_label,
                    target = %target,
                    status = response.status().as_u16(),
                    latency_ms = started.elapsed().as_millis() as u64,
                    "Forwarded request"
                );
                metrics::record_forward(&method_label, response.status().as_u16(), started);
            }
            Err(e) => {
                tracing::warn!(
                    request_id,
                    client = %client,
                    method = %method_label,
                    target = %target,
                    error = %e,
                    kind = e.kind(),
                    latency_ms = started.elapsed().as_millis() as u64,
                    "Forwarding failed"
                );
                metrics::record_failure(e.kind());
            }
        }
        metrics::record_pool(&self.pool().stats());

        outcome
    }

    /// Stop the sweep, close idle connections and refuse new work.
    pub fn shutdown(&self) {
        if let Some(reaper) = &self.reaper {
            reaper.abort();
        }
        self.pool().shutdown();
    }
}
