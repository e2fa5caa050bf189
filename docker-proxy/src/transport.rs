//! Outbound HTTP transport
//!
//! The forwarder hands fully rewritten requests to a [`Transport`], which
//! performs the network round trip and returns the origin's response with a
//! streaming body. Tests substitute their own implementation.

use crate::error::TransportError;
use async_trait::async_trait;
use axum::body::{Body, HttpBody};
use axum::http::{Request, Response};
use reqwest::redirect::Policy;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Performs one request/response exchange with an origin.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn round_trip(&self, request: Request<Body>) -> Result<Response<Body>, TransportError>;
}

/// [`Transport`] backed by a shared `reqwest` client.
///
/// Redirects are returned to the caller untouched; registries answer blob
/// requests with redirects to storage backends that the client must follow
/// itself.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// `timeout` bounds connecting and each read from the origin, so a stalled
    /// origin fails while a long blob stream keeps going. `None` leaves both
    /// unbounded.
    pub fn new(timeout: Option<Duration>) -> Result<Self, TransportError> {
        let mut builder = Client::builder().redirect(Policy::none());
        if let Some(timeout) = timeout {
            builder = builder.connect_timeout(timeout).read_timeout(timeout);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Request(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn round_trip(&self, request: Request<Body>) -> Result<Response<Body>, TransportError> {
        let (parts, body) = request.into_parts();
        let url = parts.uri.to_string();
        debug!(method = %parts.method, url = %url, "Dispatching origin request");

        let mut builder = self.client.request(parts.method, url).headers(parts.headers);
        if body.size_hint().exact() != Some(0) {
            builder = builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let upstream = builder.send().await.map_err(map_reqwest_error)?;

        let status = upstream.status();
        let headers = upstream.headers().clone();
        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_builder() {
        TransportError::Request(e.to_string())
    } else {
        TransportError::Unreachable(e.to_string())
    }
}
