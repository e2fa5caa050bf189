//! Origin forwarding
//!
//! The origin of every request is derived from the request itself: the
//! inbound `Host` becomes `https://<host>`, the path and query are kept, and
//! the rewritten request is dispatched through the configured [`Transport`].

use crate::error::ProxyError;
use crate::transport::Transport;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Request, Response, Uri};
use bytes::Bytes;
use http_body_util::BodyExt;
use std::net::SocketAddr;
use std::sync::Arc;
use url::Url;

/// Header carrying the host the client originally asked for.
pub static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Header listing the client addresses a request has passed through.
pub static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Connection-scoped headers that must not be relayed by a proxy.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Scheme and authority a request is sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub scheme: String,
    pub authority: String,
}

impl Target {
    /// Derive the origin from a client-supplied host.
    ///
    /// The host is trusted as-is; there is no allow-list.
    pub fn from_host(host: &str) -> Result<Self, ProxyError> {
        let url = Url::parse(&format!("https://{host}/v2"))
            .map_err(|e| ProxyError::InvalidTarget(e.to_string()))?;

        let hostname = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ProxyError::InvalidTarget(format!("no host in {host:?}")))?;

        let authority = match url.port() {
            Some(port) => format!("{hostname}:{port}"),
            None => hostname.to_string(),
        };

        Ok(Self {
            scheme: url.scheme().to_string(),
            authority,
        })
    }

    /// Full origin URI for the given inbound URI.
    pub fn uri_for(&self, inbound: &Uri) -> Result<Uri, ProxyError> {
        let path_and_query = inbound
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        Uri::builder()
            .scheme(self.scheme.as_str())
            .authority(self.authority.as_str())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| ProxyError::InvalidTarget(e.to_string()))
    }
}

/// Host the client addressed.
///
/// An absolute-form request URI (or HTTP/2 `:authority`) wins over the `Host`
/// header, which is only consulted when the URI carries no authority.
pub fn request_host<B>(request: &Request<B>) -> Option<String> {
    request
        .uri()
        .authority()
        .map(|authority| authority.as_str().to_string())
        .filter(|host| !host.is_empty())
        .or_else(|| {
            request
                .headers()
                .get(header::HOST)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|host| !host.is_empty())
                .map(str::to_string)
        })
}

/// Sends rewritten requests to their origin.
#[derive(Clone)]
pub struct Forwarder {
    transport: Arc<dyn Transport>,
}

impl Forwarder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Rewrite `request` for `host` and dispatch it.
    ///
    /// The response body is still streaming when this returns.
    pub async fn forward(&self, mut request: Request<Body>, host: &str) -> Result<Response<Body>, ProxyError> {
        let target = Target::from_host(host)?;
        rewrite_request(&mut request, host, &target)?;

        let mut response = self.transport.round_trip(request).await?;
        strip_hop_by_hop(response.headers_mut());
        Ok(response)
    }
}

/// Point `request` at `target` and set the forwarding headers.
pub fn rewrite_request<B>(request: &mut Request<B>, host: &str, target: &Target) -> Result<(), ProxyError> {
    let uri = target.uri_for(request.uri())?;
    *request.uri_mut() = uri;

    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let headers = request.headers_mut();
    strip_hop_by_hop(headers);

    let forwarded_host =
        HeaderValue::from_str(host).map_err(|e| ProxyError::InvalidTarget(e.to_string()))?;
    headers.insert(X_FORWARDED_HOST.clone(), forwarded_host);

    let target_host = HeaderValue::from_str(&target.authority)
        .map_err(|e| ProxyError::InvalidTarget(e.to_string()))?;
    headers.insert(header::HOST, target_host);

    if let Some(ip) = client_addr {
        let chain = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(prior) if !prior.is_empty() => format!("{prior}, {ip}"),
            _ => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(X_FORWARDED_FOR.clone(), value);
        }
    }

    Ok(())
}

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Read a response body to the end and return a replayable copy.
///
/// Status and headers are untouched; the returned response carries the same
/// bytes as the captured buffer.
pub async fn capture_body(response: Response<Body>) -> Result<(Response<Body>, Bytes), ProxyError> {
    let (parts, body) = response.into_parts();
    let collected = body
        .collect()
        .await
        .map_err(|e| ProxyError::Body(e.to_string()))?;
    let bytes = collected.to_bytes();
    Ok((Response::from_parts(parts, Body::from(bytes.clone())), bytes))
}
