//! Gateway HTTP server.
//!
//! # Responsibilities
//! - Accept inbound requests on the configured listener
//! - Map each request onto the upstream base URL and hand it to the filter
//! - Map forwarding failures to gateway status codes
//! - Swap in a freshly built filter when the configuration changes
//!
//! # Design Decisions
//! - The handler only adapts; translation, pooling and relay live in `proxy`
//! - A reload builds a new pool; the old one is dropped once its in-flight
//!   requests finish

use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper::body::Body as _;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::error::ProxyError;
use crate::http::request::UuidRequestId;
use crate::proxy::{strip_hop_by_hop, ForwardingFilter, InboundContext, MultiValueMap};

/// The filter and upstream currently in effect.
#[derive(Debug)]
struct Gateway {
    filter: ForwardingFilter,
    upstream: Upstream,
}

impl Gateway {
    fn build(config: &GatewayConfig) -> Result<Self, ProxyError> {
        Ok(Self {
            filter: ForwardingFilter::new(config.host.clone())?,
            upstream: Upstream::parse(&config.upstream.url)?,
        })
    }
}

/// Upstream base URL, split so inbound paths can be appended.
#[derive(Debug, Clone)]
struct Upstream {
    origin: String,
    base_path: String,
}

impl Upstream {
    fn parse(url: &str) -> Result<Self, ProxyError> {
        let uri: Uri = url.parse().map_err(|_| ProxyError::InvalidTarget {
            uri: url.to_string(),
            reason: "upstream url does not parse",
        })?;
        let (Some(scheme), Some(authority)) = (uri.scheme_str(), uri.authority()) else {
            return Err(ProxyError::InvalidTarget {
                uri: url.to_string(),
                reason: "upstream url must be absolute",
            });
        };
        Ok(Self {
            origin: format!("{scheme}://{authority}"),
            base_path: uri.path().trim_end_matches('/').to_string(),
        })
    }

    /// Absolute target for an inbound path. The query travels separately.
    fn target(&self, inbound: &Uri) -> Result<Uri, ProxyError> {
        let target = format!("{}{}{}", self.origin, self.base_path, inbound.path());
        target.parse().map_err(|_| ProxyError::InvalidTarget {
            uri: target,
            reason: "inbound path produces an invalid uri",
        })
    }
}

type SharedGateway = Arc<ArcSwap<Gateway>>;

/// HTTP server fronting a single upstream.
pub struct HttpServer {
    config: GatewayConfig,
    gateway: SharedGateway,
}

impl HttpServer {
    pub fn new(config: GatewayConfig) -> Result<Self, ProxyError> {
        let gateway = Gateway::build(&config)?;
        Ok(Self {
            config,
            gateway: Arc::new(ArcSwap::from_pointee(gateway)),
        })
    }

    /// Use a prepared filter, e.g. one whose pool trusts extra roots.
    pub fn with_filter(config: GatewayConfig, filter: ForwardingFilter) -> Result<Self, ProxyError> {
        let upstream = Upstream::parse(&config.upstream.url)?;
        Ok(Self {
            config,
            gateway: Arc::new(ArcSwap::from_pointee(Gateway { filter, upstream })),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// The filter currently serving requests.
    pub fn filter(&self) -> ForwardingFilter {
        self.gateway.load().filter.clone()
    }

    fn build_router(gateway: SharedGateway) -> Router {
        Router::new()
            .route("/", any(forward_handler))
            .route("/{*path}", any(forward_handler))
            .with_state(gateway)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
    }

    /// Serve until `shutdown` fires, applying configuration updates as they arrive.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.config.upstream.url,
            "HTTP server starting"
        );

        let reload = {
            let gateway = self.gateway.clone();
            tokio::spawn(async move {
                while let Some(config) = config_updates.recv().await {
                    match Gateway::build(&config) {
                        Ok(next) => {
                            tracing::info!(
                                upstream = %config.upstream.url,
                                max_total = next.filter.pool().max_total(),
                                max_per_route = next.filter.pool().max_per_route(),
                                "Configuration reloaded"
                            );
                            gateway.store(Arc::new(next));
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Rejected reloaded configuration");
                        }
                    }
                }
            })
        };

        let app = Self::build_router(self.gateway.clone())
            .into_make_service_with_connect_info::<SocketAddr>();

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await;

        reload.abort();
        self.gateway.load().filter.shutdown();
        served?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn forward_handler(
    State(gateway): State<SharedGateway>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let gateway = gateway.load_full();
    let (parts, body) = request.into_parts();

    let target = match gateway.upstream.target(&parts.uri) {
        Ok(target) => target,
        Err(e) => return error_response(&e),
    };
    let params = parts
        .uri
        .query()
        .map(MultiValueMap::from_query)
        .unwrap_or_default();
    let context = InboundContext::from_headers(&parts.headers).with_remote_addr(remote);
    let body = (!body.is_end_stream()).then_some(body);

    match gateway
        .filter
        .forward(parts.method, &target, body, &params, &parts.headers, &context)
        .await
    {
        Ok(response) => {
            let mut response = response.into_response();
            strip_hop_by_hop(response.headers_mut());
            response
        }
        Err(e) => error_response(&e),
    }
}

fn error_response(error: &ProxyError) -> Response {
    let status = if error.is_timeout() {
        StatusCode::GATEWAY_TIMEOUT
    } else if matches!(error, ProxyError::PoolClosed) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::BAD_GATEWAY
    };
    (status, status.canonical_reason().unwrap_or("Gateway error")).into_response()
}
