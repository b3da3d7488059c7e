//! Byte-faithful request relay.
//!
//! Everything under the configured prefix goes to the upstream engine.
//! Bodies are never buffered or parsed in either direction: the request
//! body is streamed upstream and the upstream body is streamed back chunk
//! by chunk, pulled by the client connection.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{
    HeaderName, ACCEPT, ACCEPT_ENCODING, CACHE_CONTROL, CONNECTION, CONTENT_LENGTH,
    CONTENT_TYPE, HOST, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE, TRAILER,
    TRANSFER_ENCODING, UPGRADE,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::json;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::state::RelayState;

const EVENT_STREAM: &str = "text/event-stream";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream timed out: {0}")]
    UpstreamTimeout(String),
}

impl RelayError {
    fn from_request(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RelayError::UpstreamTimeout(err.to_string())
        } else {
            RelayError::UpstreamUnavailable(err.to_string())
        }
    }

    fn code(&self) -> &'static str {
        match self {
            RelayError::UpstreamUnavailable(_) => "upstream_unavailable",
            RelayError::UpstreamTimeout(_) => "upstream_timeout",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            RelayError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            RelayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.code(), "message": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

pub fn router(state: Arc<RelayState>) -> Router {
    let prefix = state.routes.prefix().to_string();
    Router::new()
        .route("/health", get(health_handler))
        .route(&format!("{prefix}/{{*path}}"), any(relay_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    Json(json!({ "status": "ok", "activeStreams": state.active_streams() }))
}

async fn relay_handler(
    State(state): State<Arc<RelayState>>,
    request: Request,
) -> Result<Response, RelayError> {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(path.as_str());
    let streaming = state.routes.is_streaming(&path);
    let url = state.routes.upstream_url(path_and_query);

    let has_body = parts.headers.contains_key(CONTENT_LENGTH)
        || parts.headers.contains_key(TRANSFER_ENCODING);
    let mut headers = forwardable(&parts.headers);
    headers.remove(HOST);
    if streaming {
        headers.insert(ACCEPT, HeaderValue::from_static(EVENT_STREAM));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    }

    debug!(
        component = "relay",
        event = "relay.request",
        method = %parts.method,
        path = %path,
        streaming,
    );

    let mut upstream = state
        .client
        .request(parts.method.clone(), &url)
        .headers(headers);
    if has_body {
        upstream = upstream.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    let response = upstream.send().await.map_err(|e| {
        let err = RelayError::from_request(e);
        warn!(
            component = "relay",
            event = "relay.upstream_failed",
            method = %parts.method,
            path = %path,
            error = %err,
            "Upstream request failed"
        );
        err
    })?;

    let status = response.status();
    let mut headers = forwardable(response.headers());

    if !streaming {
        let body = Body::from_stream(response.bytes_stream());
        return Ok((status, headers, body).into_response());
    }

    headers.remove(CONTENT_LENGTH);
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    headers
        .entry(CONTENT_TYPE)
        .or_insert(HeaderValue::from_static(EVENT_STREAM));

    // The guard travels with the body and closes the registry entry when
    // the client connection is done with it.
    let mut guard = state.open_stream(&path);
    let stream_id = guard.id();
    let body = response.bytes_stream().map(move |chunk| {
        match &chunk {
            Ok(bytes) => guard.record(bytes.len()),
            Err(e) => warn!(
                component = "relay",
                event = "relay.stream.upstream_error",
                stream_id,
                error = %e,
                "Upstream stream broke mid-response"
            ),
        }
        chunk
    });

    Ok((status, headers, Body::from_stream(body)).into_response())
}

/// Copy headers minus hop-by-hop ones.
fn forwardable(source: &HeaderMap) -> HeaderMap {
    const HOP_BY_HOP: [HeaderName; 7] = [
        CONNECTION,
        PROXY_AUTHENTICATE,
        PROXY_AUTHORIZATION,
        TE,
        TRAILER,
        TRANSFER_ENCODING,
        UPGRADE,
    ];
    let mut headers = HeaderMap::with_capacity(source.len());
    for (name, value) in source {
        if HOP_BY_HOP.contains(name) || name.as_str() == "keep-alive" {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use std::time::Duration;

    use axum::extract::RawQuery;
    use bytes::Bytes;

    use super::*;
    use crate::config::RelayRoutes;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn relay_to(upstream: SocketAddr) -> (SocketAddr, Arc<RelayState>) {
        let routes = RelayRoutes::new(
            &format!("http://{upstream}"),
            "/api",
            vec!["/stream".into()],
            true,
        );
        let state = Arc::new(RelayState::new(routes, Duration::from_secs(2)).unwrap());
        (serve(router(state.clone())).await, state)
    }

    /// SSE chunks deliberately split mid-frame and inside a multi-byte char.
    fn sse_chunks() -> Vec<Vec<u8>> {
        let text = "event: expert_thinking\ndata: {\"participantName\":\"E1\"}\n\n\
                    event: contribution\ndata: {\"participantName\":\"E1\",\"content\":\"caf\u{e9} \u{1f680}\",\"order\":0}\n\n\
                    event: complete\ndata: {}\n\n";
        let bytes = text.as_bytes();
        let rocket = text.find('\u{1f680}').unwrap() + 1;
        vec![
            bytes[..30].to_vec(),
            bytes[30..rocket].to_vec(),
            bytes[rocket..].to_vec(),
        ]
    }

    const BROKEN_FRAME: &[u8] = b"event: expert_thinking\ndata: {\"participantName\":\"E1\"}\n\n";

    async fn wait_for_streams(state: &RelayState, expected: usize) {
        for _ in 0..100 {
            if state.active_streams() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(state.active_streams(), expected);
    }

    async fn stream_handler(headers: HeaderMap) -> Response {
        let ok = headers.get(ACCEPT).map(|v| v.as_bytes()) == Some(b"text/event-stream".as_slice())
            && headers.get(ACCEPT_ENCODING).map(|v| v.as_bytes()) == Some(b"identity".as_slice())
            && headers.get(CACHE_CONTROL).map(|v| v.as_bytes()) == Some(b"no-cache".as_slice());
        if !ok {
            return StatusCode::BAD_REQUEST.into_response();
        }
        let chunks = sse_chunks()
            .into_iter()
            .map(|c| Ok::<_, Infallible>(Bytes::from(c)));
        (
            [(CONTENT_TYPE, "text/event-stream; charset=utf-8")],
            Body::from_stream(futures::stream::iter(chunks)),
        )
            .into_response()
    }

    async fn echo_handler(
        method: axum::http::Method,
        RawQuery(query): RawQuery,
        body: Bytes,
    ) -> Response {
        let echoed = format!(
            "{} {} {}",
            method,
            query.unwrap_or_default(),
            String::from_utf8_lossy(&body)
        );
        (
            StatusCode::CREATED,
            [("x-engine", "council")],
            echoed,
        )
            .into_response()
    }

    fn upstream_app() -> Router {
        Router::new()
            .route("/council/chat/{id}/stream", get(stream_handler))
            .route("/council/experts", any(echo_handler))
            .route(
                "/council/chat/{id}/broken/stream",
                get(|| async {
                    let frame = futures::stream::once(async {
                        Ok::<_, std::io::Error>(Bytes::from_static(BROKEN_FRAME))
                    });
                    let failure = futures::stream::once(async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Err(std::io::Error::other("engine crashed"))
                    });
                    Body::from_stream(frame.chain(failure))
                }),
            )
            .route(
                "/council/chat/{id}/held/stream",
                get(|| async {
                    let first = futures::stream::once(async {
                        Ok::<_, Infallible>(Bytes::from_static(b": open\n\n"))
                    });
                    Body::from_stream(first.chain(futures::stream::pending()))
                }),
            )
    }

    #[tokio::test]
    async fn streaming_bytes_are_forwarded_unchanged() {
        let upstream = serve(upstream_app()).await;
        let (relay, _) = relay_to(upstream).await;

        let response = reqwest::get(format!(
            "http://{relay}/api/council/chat/s-1/stream?message=How%20to%20grow"
        ))
        .await
        .unwrap();

        assert_eq!(response.status(), 200);
        let headers = response.headers().clone();
        assert_eq!(headers[CACHE_CONTROL], "no-cache, no-transform");
        assert_eq!(headers["x-accel-buffering"], "no");
        assert_eq!(headers[CONTENT_TYPE], "text/event-stream; charset=utf-8");
        assert!(headers.get(CONTENT_LENGTH).is_none());

        let body = response.bytes().await.unwrap();
        assert_eq!(body.as_ref(), sse_chunks().concat().as_slice());
    }

    #[tokio::test]
    async fn ordinary_requests_pass_through() {
        let upstream = serve(upstream_app()).await;
        let (relay, state) = relay_to(upstream).await;

        let response = reqwest::Client::new()
            .post(format!("http://{relay}/api/council/experts?page=2"))
            .body("{\"name\":\"E1\"}")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 201);
        assert_eq!(response.headers()["x-engine"], "council");
        assert_eq!(
            response.text().await.unwrap(),
            "POST page=2 {\"name\":\"E1\"}"
        );
        assert_eq!(state.active_streams(), 0);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_structured_502() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = listener.local_addr().unwrap();
        drop(listener);
        let (relay, _) = relay_to(dead).await;

        let response = reqwest::get(format!("http://{relay}/api/council/chat/s-1/stream"))
            .await
            .unwrap();
        assert_eq!(response.status(), 502);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], "upstream_unavailable");
        assert!(body["message"].as_str().unwrap().contains("upstream"));
    }

    #[tokio::test]
    async fn health_counts_open_streams() {
        let upstream = serve(upstream_app()).await;
        let (relay, state) = relay_to(upstream).await;

        let health: serde_json::Value = reqwest::get(format!("http://{relay}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health, json!({ "status": "ok", "activeStreams": 0 }));

        let mut held = reqwest::get(format!("http://{relay}/api/council/chat/s-1/held/stream"))
            .await
            .unwrap();
        let first = held.chunk().await.unwrap().unwrap();
        assert_eq!(first.as_ref(), b": open\n\n");
        assert_eq!(state.active_streams(), 1);

        let health: serde_json::Value = reqwest::get(format!("http://{relay}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["activeStreams"], 1);
    }

    #[tokio::test]
    async fn upstream_failure_mid_stream_ends_only_that_connection() {
        let upstream = serve(upstream_app()).await;
        let (relay, state) = relay_to(upstream).await;

        let mut held = reqwest::get(format!("http://{relay}/api/council/chat/s-2/held/stream"))
            .await
            .unwrap();
        held.chunk().await.unwrap().unwrap();

        let mut broken = reqwest::get(format!("http://{relay}/api/council/chat/s-1/broken/stream"))
            .await
            .unwrap();
        assert_eq!(broken.status(), 200);

        let mut received = Vec::new();
        let failed = loop {
            match broken.chunk().await {
                Ok(Some(chunk)) => received.extend_from_slice(&chunk),
                Ok(None) => break false,
                Err(_) => break true,
            }
        };
        assert!(failed, "truncated stream should surface as a body error");
        assert_eq!(received, BROKEN_FRAME);

        wait_for_streams(&state, 1).await;

        // The other stream and the relay itself are unaffected.
        let health: serde_json::Value = reqwest::get(format!("http://{relay}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["activeStreams"], 1);
        assert_eq!(held.status(), 200);
    }

    #[tokio::test]
    async fn concurrent_streams_are_relayed_independently() {
        let upstream = serve(upstream_app()).await;
        let (relay, state) = relay_to(upstream).await;

        let mut held = Vec::new();
        for id in ["s-1", "s-2", "s-3"] {
            let mut response =
                reqwest::get(format!("http://{relay}/api/council/chat/{id}/held/stream"))
                    .await
                    .unwrap();
            let first = response.chunk().await.unwrap().unwrap();
            assert_eq!(first.as_ref(), b": open\n\n");
            held.push(response);
        }
        assert_eq!(state.active_streams(), 3);

        let full = reqwest::get(format!("http://{relay}/api/council/chat/s-4/stream"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(full.as_ref(), sse_chunks().concat().as_slice());

        let health: serde_json::Value = reqwest::get(format!("http://{relay}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["activeStreams"], 3);
        assert!(held.iter().all(|r| r.status() == 200));
    }

    #[tokio::test]
    async fn paths_outside_the_prefix_are_not_relayed() {
        let upstream = serve(upstream_app()).await;
        let (relay, _) = relay_to(upstream).await;

        let response = reqwest::get(format!("http://{relay}/council/experts"))
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        let mut source = HeaderMap::new();
        source.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        source.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        source.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        source.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        source.append("x-trace", HeaderValue::from_static("a"));
        source.append("x-trace", HeaderValue::from_static("b"));

        let headers = forwardable(&source);
        assert!(headers.get(CONNECTION).is_none());
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get(TRANSFER_ENCODING).is_none());
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(headers.get_all("x-trace").iter().count(), 2);
    }

    #[test]
    fn errors_map_to_gateway_statuses() {
        let unavailable = RelayError::UpstreamUnavailable("refused".into()).into_response();
        assert_eq!(unavailable.status(), StatusCode::BAD_GATEWAY);
        let timeout = RelayError::UpstreamTimeout("connect".into()).into_response();
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
