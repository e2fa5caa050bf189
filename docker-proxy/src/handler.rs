//! Request entry point: cache consult, forwarding and response capture

use crate::cache::ResponseCache;
use crate::error::ProxyError;
use crate::fingerprint::{fingerprint, is_manifest_path};
use crate::forwarder::{capture_body, request_host, Forwarder};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use percent_encoding::percent_decode_str;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Shared state of the proxy handler.
#[derive(Clone)]
pub struct ProxyState {
    pub cache: Arc<dyn ResponseCache>,
    pub forwarder: Forwarder,
    /// Lifetime of entries written by this handler
    pub cache_ttl: Duration,
}

impl ProxyState {
    pub fn new(cache: Arc<dyn ResponseCache>, forwarder: Forwarder, cache_ttl: Duration) -> Self {
        Self {
            cache,
            forwarder,
            cache_ttl,
        }
    }
}

/// Router that sends every path and method through [`proxy_request`].
pub fn router(state: ProxyState) -> Router {
    Router::new()
        .fallback(proxy_request)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve a request from the cache or forward it to its origin.
pub async fn proxy_request(State(state): State<ProxyState>, request: Request) -> Response {
    match handle(&state, request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn handle(state: &ProxyState, request: Request) -> Result<Response, ProxyError> {
    let host = request_host(&request).ok_or(ProxyError::MissingHost)?;
    // Participation and keys use the decoded path; the raw one is forwarded.
    let path = percent_decode_str(request.uri().path())
        .decode_utf8_lossy()
        .into_owned();
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .unwrap_or_default();

    let key = fingerprint(&host, &path, &authorization);
    let cacheable = is_manifest_path(&path);

    if cacheable {
        if let Some(cached) = state.cache.get(&key) {
            debug!(host = %host, path = %path, "Serving manifest from cache");
            return Ok((StatusCode::OK, Body::from(cached)).into_response());
        }
        debug!(host = %host, path = %path, "Manifest cache miss");
    }

    let response = state.forwarder.forward(request, &host).await?;
    if !cacheable {
        return Ok(response);
    }

    let (response, body) = capture_body(response).await?;
    debug!(
        host = %host,
        path = %path,
        status = %response.status(),
        bytes = body.len(),
        "Caching manifest response"
    );
    state.cache.set(&key, body, state.cache_ttl);
    Ok(response)
}
