//! End-to-end behaviour of the forwarding filter against mock origins.

use std::io::Read;
use std::time::Duration;

use axum::body::Body;
use flate2::read::GzDecoder;
use host_forwarder::config::FilterConfig;
use host_forwarder::{ForwardingFilter, InboundContext, MultiValueMap, ProxyError, ProxyResponse};
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderValue};
use hyper::{Method, Response, StatusCode};

mod common;

async fn send(
    filter: &ForwardingFilter,
    method: Method,
    url: &str,
    body: Option<Body>,
) -> Result<ProxyResponse, ProxyError> {
    filter
        .forward(
            method,
            &url.parse().unwrap(),
            body,
            &MultiValueMap::new(),
            &HeaderMap::new(),
            &InboundContext::default(),
        )
        .await
}

fn text(status: u16, body: &'static str) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn gzip_response_is_relayed_without_decompression() {
    let compressed = common::gzip(b"Get 1");
    let payload = compressed.clone();
    let origin = common::start_origin(move |_req| {
        let payload = payload.clone();
        async move {
            Response::builder()
                .header("content-encoding", "gzip")
                .body(Body::from(payload))
                .unwrap()
        }
    })
    .await;

    let filter = ForwardingFilter::new(common::test_config()).unwrap();
    let mut headers = HeaderMap::new();
    headers.insert("accept-encoding", HeaderValue::from_static("gzip"));
    let response = filter
        .forward(
            Method::GET,
            &origin.url("/app/compressed/get/1").parse().unwrap(),
            None,
            &MultiValueMap::new(),
            &headers,
            &InboundContext::default(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-encoding"], "gzip");

    let relayed = common::collect(response.into_body()).await.unwrap();
    assert_eq!(relayed, compressed);

    let mut decoded = String::new();
    GzDecoder::new(&relayed[..]).read_to_string(&mut decoded).unwrap();
    assert_eq!(decoded, "Get 1");
}

#[tokio::test]
async fn plain_response_is_relayed_verbatim() {
    let origin = common::start_origin(|_req| async { text(200, "Get 1") }).await;
    let filter = ForwardingFilter::new(common::test_config()).unwrap();

    let response = send(&filter, Method::GET, &origin.url("/app/get/1"), None)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("content-encoding").is_none());
    assert_eq!(common::collect(response.into_body()).await.unwrap(), b"Get 1");
}

#[tokio::test]
async fn error_statuses_are_relayed_not_raised() {
    let origin = common::start_origin(|_req| async { text(503, "busy") }).await;
    let filter = ForwardingFilter::new(common::test_config()).unwrap();

    let response = send(&filter, Method::GET, &origin.url("/"), None).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(common::collect(response.into_body()).await.unwrap(), b"busy");
}

async fn echo_origin() -> common::Origin {
    common::start_origin(|req: hyper::Request<hyper::body::Incoming>| async move {
        let method = req.method().to_string();
        let body = axum::body::to_bytes(Body::new(req.into_body()), usize::MAX)
            .await
            .unwrap();
        Response::builder()
            .header("x-echo-method", method)
            .body(Body::from(body))
            .unwrap()
    })
    .await
}

#[tokio::test]
async fn delete_with_body_reaches_origin() {
    let origin = echo_origin().await;
    let filter = ForwardingFilter::new(common::test_config()).unwrap();

    let response = send(
        &filter,
        Method::DELETE,
        &origin.url("/app/delete"),
        Some(Body::from(vec![1u8])),
    )
    .await
    .unwrap();
    assert_eq!(response.headers()["x-echo-method"], "DELETE");
    assert_eq!(common::collect(response.into_body()).await.unwrap(), [1u8]);
}

#[tokio::test]
async fn request_body_is_streamed_chunk_by_chunk() {
    let origin = echo_origin().await;
    let filter = ForwardingFilter::new(common::test_config()).unwrap();

    let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
        Ok(Bytes::from_static(b"first,")),
        Ok(Bytes::from_static(b"second,")),
        Ok(Bytes::from_static(b"third")),
    ];
    let body = Body::from_stream(futures_util::stream::iter(chunks));

    let response = send(&filter, Method::POST, &origin.url("/upload"), Some(body))
        .await
        .unwrap();
    assert_eq!(
        common::collect(response.into_body()).await.unwrap(),
        b"first,second,third"
    );
}

fn trickle(chunks: usize, gap: Duration) -> Body {
    let stream = futures_util::stream::unfold(0, move |sent| async move {
        if sent == chunks {
            return None;
        }
        tokio::time::sleep(gap).await;
        Some((Ok::<_, std::io::Error>(Bytes::from_static(b"x")), sent + 1))
    });
    Body::from_stream(stream)
}

#[tokio::test]
async fn slow_upload_outlasting_socket_timeout_succeeds() {
    let origin = echo_origin().await;
    let filter = ForwardingFilter::new(FilterConfig {
        socket_timeout_ms: 300,
        ..common::test_config()
    })
    .unwrap();

    // 6 chunks 150ms apart: ~900ms in total, never 300ms without progress.
    let body = trickle(6, Duration::from_millis(150));
    let response = send(&filter, Method::POST, &origin.url("/upload"), Some(body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(common::collect(response.into_body()).await.unwrap(), b"xxxxxx");
}

#[tokio::test]
async fn stalled_upload_is_a_response_timeout() {
    let origin = echo_origin().await;
    let filter = ForwardingFilter::new(FilterConfig {
        socket_timeout_ms: 300,
        ..common::test_config()
    })
    .unwrap();

    let first = futures_util::stream::iter([Ok::<_, std::io::Error>(Bytes::from_static(b"x"))]);
    let body = Body::from_stream(futures_util::StreamExt::chain(
        first,
        futures_util::stream::pending(),
    ));

    let started = std::time::Instant::now();
    let err = send(&filter, Method::POST, &origin.url("/upload"), Some(body))
        .await
        .unwrap_err();
    assert!(matches!(err, ProxyError::ResponseTimeout { .. }), "{err}");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn query_and_headers_reach_origin_as_translated() {
    let origin = common::start_origin(|req: hyper::Request<hyper::body::Incoming>| async move {
        let dup: Vec<_> = req
            .headers()
            .get_all("x-dup")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        Response::builder()
            .header("x-seen-uri", req.uri().to_string())
            .header("x-seen-dup", dup.join("|"))
            .header("x-seen-hint", req.headers().contains_key("x-hint").to_string())
            .header("x-seen-te", req.headers().contains_key("te").to_string())
            .header("x-seen-host", req.headers()["host"].clone())
            .body(Body::empty())
            .unwrap()
    })
    .await;
    let filter = ForwardingFilter::new(common::test_config()).unwrap();

    let mut headers = HeaderMap::new();
    headers.append("connection", HeaderValue::from_static("x-hint"));
    headers.append("x-hint", HeaderValue::from_static("drop me"));
    headers.append("te", HeaderValue::from_static("trailers"));
    headers.append("x-dup", HeaderValue::from_static("one"));
    headers.append("x-dup", HeaderValue::from_static("two"));
    headers.append("host", HeaderValue::from_static("gateway.local"));

    let params: MultiValueMap = [("q", "a%2Fb"), ("tag", "x"), ("q", "c")].into_iter().collect();
    let response = filter
        .forward(
            Method::GET,
            &origin.url("/search?lang=en").parse().unwrap(),
            None,
            &params,
            &headers,
            &InboundContext::default(),
        )
        .await
        .unwrap();

    let seen = response.headers();
    assert_eq!(seen["x-seen-uri"], "/search?lang=en&q=a%2Fb&q=c&tag=x");
    assert_eq!(seen["x-seen-dup"], "one|two");
    assert_eq!(seen["x-seen-hint"], "false");
    assert_eq!(seen["x-seen-te"], "false");
    assert_eq!(seen["x-seen-host"], origin.addr.to_string().as_str());
}

#[tokio::test]
async fn refused_connection_is_a_connect_failure() {
    let addr = common::refused_addr().await;
    let filter = ForwardingFilter::new(common::test_config()).unwrap();

    let err = send(&filter, Method::GET, &format!("http://{addr}/"), None)
        .await
        .unwrap_err();
    assert!(err.is_connect_failure(), "{err}");
    assert!(!err.is_timeout());
    assert_eq!(filter.pool().stats().total, 0);
}

#[tokio::test]
async fn silent_origin_is_a_response_timeout() {
    let addr = common::start_silent_origin().await;
    let filter = ForwardingFilter::new(FilterConfig {
        socket_timeout_ms: 200,
        ..common::test_config()
    })
    .unwrap();

    let err = send(&filter, Method::GET, &format!("http://{addr}/"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ProxyError::ResponseTimeout { .. }), "{err}");
    assert_eq!(filter.pool().stats().total, 0);
}

#[tokio::test]
async fn truncated_body_fails_relay_and_discards_connection() {
    let addr = common::start_truncating_origin(100, b"0123456789").await;
    let filter = ForwardingFilter::new(common::test_config()).unwrap();

    let response = send(&filter, Method::GET, &format!("http://{addr}/"), None)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let err = common::collect(response.into_body()).await.unwrap_err();
    assert!(matches!(err, ProxyError::Relay { .. }), "{err}");
    assert_eq!(filter.pool().stats().total, 0);
}

#[tokio::test]
async fn stalled_body_fails_with_relay_timeout() {
    let addr = common::start_stalling_origin().await;
    let filter = ForwardingFilter::new(FilterConfig {
        socket_timeout_ms: 300,
        ..common::test_config()
    })
    .unwrap();

    let response = send(&filter, Method::GET, &format!("http://{addr}/"), None)
        .await
        .unwrap();
    let err = common::collect(response.into_body()).await.unwrap_err();
    assert!(matches!(err, ProxyError::RelayTimeout { .. }), "{err}");
    assert!(err.is_timeout());
    assert_eq!(filter.pool().stats().total, 0);
}

#[tokio::test]
async fn forward_events_name_the_client() {
    let origin = common::start_origin(|_req| async { text(200, "ok") }).await;
    let filter = ForwardingFilter::new(common::test_config()).unwrap();
    let refused = common::refused_addr().await;
    let context = InboundContext {
        request_id: Some("req-7".to_string()),
        ..InboundContext::default()
    }
    .with_remote_addr("10.1.2.3:4567".parse().unwrap());

    let (logs, _guard) = common::capture_logs();
    for url in [origin.url("/"), format!("http://{refused}/")] {
        let _ = filter
            .forward(
                Method::GET,
                &url.parse().unwrap(),
                None,
                &MultiValueMap::new(),
                &HeaderMap::new(),
                &context,
            )
            .await;
    }

    let output = logs.contents();
    assert!(output.contains("Forwarded request"), "{output}");
    assert!(output.contains("Forwarding failed"), "{output}");
    assert_eq!(output.matches("client=10.1.2.3:4567").count(), 2, "{output}");
    assert!(output.contains("request_id=\"req-7\"") || output.contains("request_id=req-7"));
}

#[tokio::test]
async fn drained_connections_are_reused() {
    let origin = common::start_origin(|_req| async { text(200, "ok") }).await;
    let filter = ForwardingFilter::new(common::test_config()).unwrap();

    for _ in 0..3 {
        let response = send(&filter, Method::GET, &origin.url("/"), None).await.unwrap();
        assert_eq!(common::collect(response.into_body()).await.unwrap(), b"ok");
    }

    assert_eq!(origin.stats.requests(), 3);
    assert_eq!(origin.stats.connections(), 1);
    let stats = filter.pool().stats();
    assert_eq!((stats.total, stats.idle, stats.leased), (1, 1, 0));
}

#[tokio::test]
async fn connection_close_prevents_pooling() {
    let origin = common::start_origin(|_req| async {
        Response::builder()
            .header("connection", "close")
            .body(Body::from("bye"))
            .unwrap()
    })
    .await;
    let filter = ForwardingFilter::new(common::test_config()).unwrap();

    let response = send(&filter, Method::GET, &origin.url("/"), None).await.unwrap();
    assert_eq!(common::collect(response.into_body()).await.unwrap(), b"bye");
    assert_eq!(filter.pool().stats().total, 0);
}

#[tokio::test]
async fn bodiless_response_releases_connection_immediately() {
    let origin = common::start_origin(|_req| async {
        Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Body::empty())
            .unwrap()
    })
    .await;
    let filter = ForwardingFilter::new(common::test_config()).unwrap();

    let response = send(&filter, Method::GET, &origin.url("/"), None).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(!response.body().holds_connection());
    assert_eq!(filter.pool().stats().idle, 1);
}

#[tokio::test]
async fn dropping_an_unread_body_discards_the_connection() {
    let big = vec![b'x'; 256 * 1024];
    let origin = common::start_origin(move |_req| {
        let big = big.clone();
        async move { Response::new(Body::from(big)) }
    })
    .await;
    let filter = ForwardingFilter::new(common::test_config()).unwrap();

    let response = send(&filter, Method::GET, &origin.url("/"), None).await.unwrap();
    assert_eq!(filter.pool().stats().leased, 1);
    drop(response);
    assert_eq!(filter.pool().stats().total, 0);

    // The next request needs a fresh connection.
    let response = send(&filter, Method::GET, &origin.url("/"), None).await.unwrap();
    assert_eq!(common::collect(response.into_body()).await.unwrap().len(), 256 * 1024);
    assert_eq!(origin.stats.connections(), 2);
}

#[tokio::test]
async fn cancelled_forward_frees_its_slot() {
    let addr = common::start_silent_origin().await;
    let filter = ForwardingFilter::new(FilterConfig {
        socket_timeout_ms: 30_000,
        ..common::test_config()
    })
    .unwrap();

    let task = {
        let filter = filter.clone();
        tokio::spawn(async move { send(&filter, Method::GET, &format!("http://{addr}/"), None).await })
    };
    assert!(common::eventually(|| filter.pool().stats().leased == 1).await);

    task.abort();
    let _ = task.await;
    assert!(common::eventually(|| filter.pool().stats().total == 0).await);
}

#[tokio::test]
async fn invalid_target_is_rejected_before_connecting() {
    let filter = ForwardingFilter::new(common::test_config()).unwrap();
    let err = send(&filter, Method::GET, "/relative/only", None).await.unwrap_err();
    assert!(matches!(err, ProxyError::InvalidTarget { .. }), "{err}");

    let err = send(&filter, Method::GET, "ftp://origin.test/", None).await.unwrap_err();
    assert!(matches!(err, ProxyError::InvalidTarget { .. }), "{err}");
}

#[tokio::test]
async fn shut_down_filter_refuses_work() {
    let origin = common::start_origin(|_req| async { text(200, "ok") }).await;
    let filter = ForwardingFilter::new(common::test_config()).unwrap();
    filter.shutdown();

    let err = send(&filter, Method::GET, &origin.url("/"), None).await.unwrap_err();
    assert!(matches!(err, ProxyError::PoolClosed));
    assert_eq!(origin.stats.connections(), 0);
}

#[tokio::test]
async fn slow_origin_bodies_stream_while_in_flight() {
    let origin = common::start_origin(|_req| async {
        let chunks = futures_util::stream::unfold(0u8, |n| async move {
            if n == 3 {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            Some((Ok::<_, std::io::Error>(Bytes::from(vec![b'a' + n])), n + 1))
        });
        Response::new(Body::from_stream(chunks))
    })
    .await;
    let filter = ForwardingFilter::new(common::test_config()).unwrap();

    let response = send(&filter, Method::GET, &origin.url("/"), None).await.unwrap();
    assert!(response.headers().get("content-length").is_none());
    assert_eq!(common::collect(response.into_body()).await.unwrap(), b"abc");
}
