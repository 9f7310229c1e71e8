// Development reverse proxy - forwards /api/* to the remote points API
// and answers with permissive CORS headers so a page served from another
// local port can call it.

use crate::config::ProxyConfig;
use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Largest request body forwarded upstream
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const ALLOW_HEADERS: &str = "Origin, X-Requested-With, Content-Type, Accept, Authorization";

/// Shared proxy state
#[derive(Clone)]
pub struct ProxyState {
    config: Arc<ProxyConfig>,
    client: reqwest::Client,
}

impl ProxyState {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config: Arc::new(config),
            client: reqwest::Client::new(),
        }
    }
}

/// Build the proxy router
pub fn router(config: ProxyConfig) -> Router {
    let config = config.validated();
    let prefix = config.prefix.clone();
    let state = ProxyState::new(config);

    let cors = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        ));

    Router::new()
        .route(&prefix, any(forward))
        .route(&format!("{}/*rest", prefix), any(forward))
        .fallback(not_found)
        .with_state(state)
        .layer(cors)
}

async fn not_found(method: Method) -> Response {
    // Preflight is answered locally everywhere
    if method == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    StatusCode::NOT_FOUND.into_response()
}

/// Forward one request upstream and relay the response
async fn forward(State(state): State<ProxyState>, req: Request) -> Response {
    if req.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }

    let (parts, body) = req.into_parts();
    let Some(url) = state
        .config
        .upstream_url(parts.uri.path(), parts.uri.query())
    else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to read request body");
            return (StatusCode::BAD_REQUEST, "unreadable request body").into_response();
        }
    };

    let mut headers = forwardable_headers(&parts.headers);
    let body = prepare_body(&parts.method, &mut headers, bytes);

    let upstream = state
        .client
        .request(parts.method.clone(), &url)
        .headers(headers)
        .body(body)
        .send()
        .await;

    match upstream {
        Ok(resp) => {
            info!("{} {} -> {}", parts.method, parts.uri, resp.status().as_u16());
            relay_response(resp).await
        }
        Err(e) => {
            warn!(error = %e, url = %url, "upstream request failed");
            (StatusCode::BAD_GATEWAY, format!("upstream request failed: {}", e)).into_response()
        }
    }
}

async fn relay_response(resp: reqwest::Response) -> Response {
    let status = resp.status();
    let headers = forwardable_headers(resp.headers());

    let bytes = match resp.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to read upstream body");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "host"
            | "content-length"
    )
}

/// Headers worth passing across the proxy. `host` is dropped so the
/// client sets the upstream origin; lengths are recomputed.
pub(crate) fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Re-serialize JSON bodies of POST requests; other bodies pass through.
pub(crate) fn prepare_body(method: &Method, headers: &mut HeaderMap, bytes: Bytes) -> Bytes {
    if *method != Method::POST || bytes.is_empty() {
        return bytes;
    }
    match serde_json::from_slice::<serde_json::Value>(&bytes)
        .and_then(|value| serde_json::to_vec(&value))
    {
        Ok(json) => {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
            Bytes::from(json)
        }
        Err(_) => bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower::ServiceExt;

    #[test]
    fn test_forwardable_headers_drop_host_and_length() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("localhost:3000"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("12"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer x"));

        let forwarded = forwardable_headers(&headers);
        assert!(forwarded.get(header::HOST).is_none());
        assert!(forwarded.get(header::CONTENT_LENGTH).is_none());
        assert_eq!(forwarded.get(header::AUTHORIZATION).unwrap(), "Bearer x");
    }

    #[test]
    fn test_prepare_body_reserializes_json_posts() {
        let mut headers = HeaderMap::new();
        let body = prepare_body(&Method::POST, &mut headers, Bytes::from_static(b"{ \"a\" : 1 }"));

        assert_eq!(body, Bytes::from_static(b"{\"a\":1}"));
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/json");
    }

    #[test]
    fn test_prepare_body_leaves_other_bodies() {
        let mut headers = HeaderMap::new();
        let raw = Bytes::from_static(b"name=tom");

        assert_eq!(prepare_body(&Method::POST, &mut headers, raw.clone()), raw);
        let json = Bytes::from_static(b"{}");
        assert_eq!(prepare_body(&Method::PUT, &mut headers, json.clone()), json);
        assert!(headers.get(header::CONTENT_TYPE).is_none());
    }

    #[tokio::test]
    async fn test_options_answered_locally_with_cors() {
        let app = router(ProxyConfig::default());
        let req = axum::http::Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/stuStar/queryList")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
        assert_eq!(
            resp.headers().get(header::ACCESS_CONTROL_ALLOW_METHODS).unwrap(),
            ALLOW_METHODS
        );
    }

    #[tokio::test]
    async fn test_root_prefix_falls_back_to_default() {
        let config = ProxyConfig {
            prefix: "/".to_string(),
            ..ProxyConfig::default()
        };
        let app = router(config);
        let req = axum::http::Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/anything")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_paths_outside_prefix_are_not_forwarded() {
        let app = router(ProxyConfig::default());
        let req = axum::http::Request::builder()
            .uri("/index.html")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
    }
}
