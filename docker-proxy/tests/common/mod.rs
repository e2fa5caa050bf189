//! Shared fixtures for the docker-proxy integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use axum::Router;
use docker_proxy::{router, Forwarder, MemoryCache, ProxyState, Transport, TransportError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the mock origin saw for one request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

/// How the mock origin answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginBehavior {
    /// Route by path like a small registry
    Registry,
    /// Every round trip fails as if the origin were unreachable
    Unreachable,
}

/// In-process stand-in for the network that counts and records round trips.
pub struct MockOrigin {
    calls: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
    behavior: OriginBehavior,
    delay: Option<Duration>,
}

impl MockOrigin {
    pub fn new(behavior: OriginBehavior) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            behavior,
            delay: None,
        }
    }

    /// Registry origin that holds every response for `delay` first.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(OriginBehavior::Registry)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.requests.lock().unwrap().clear();
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    fn respond(path: &str) -> Response<Body> {
        let (status, body) = if path.ends_with("/manifests/test") {
            (StatusCode::OK, "test manifest data")
        } else if path.ends_with("/manifests/denied") {
            (StatusCode::FORBIDDEN, "Access denied")
        } else {
            (StatusCode::NOT_FOUND, "Not Found")
        };
        Response::builder()
            .status(status)
            .header("content-type", "text/plain")
            .header("connection", "close")
            .body(Body::from(body))
            .unwrap()
    }
}

#[async_trait]
impl Transport for MockOrigin {
    async fn round_trip(&self, request: Request<Body>) -> Result<Response<Body>, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(RecordedRequest {
            method: request.method().clone(),
            uri: request.uri().clone(),
            headers: request.headers().clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.behavior {
            OriginBehavior::Registry => Ok(Self::respond(request.uri().path())),
            OriginBehavior::Unreachable => Err(TransportError::Unreachable(format!(
                "connection refused: {}",
                request.uri()
            ))),
        }
    }
}

/// Proxy router wired to `origin` with a fresh cache.
pub fn proxy_app(origin: Arc<MockOrigin>) -> (Router, Arc<MemoryCache>) {
    let cache = Arc::new(MemoryCache::new());
    let state = ProxyState::new(cache.clone(), Forwarder::new(origin), Duration::from_secs(3600));
    (router(state), cache)
}

/// GET request for `path` addressed to `host`, optionally authorized.
pub fn registry_request(host: &str, path: &str, authorization: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(path).header("host", host);
    if let Some(authorization) = authorization {
        builder = builder.header("authorization", authorization);
    }
    builder.body(Body::empty()).unwrap()
}
