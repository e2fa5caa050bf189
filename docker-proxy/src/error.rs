//! # Error Handling
//!
//! Error types for the proxy request path, the origin transport seam and
//! startup. Request-path errors render as short plain-text responses:
//!
//! - **Missing host** (400 Bad Request): nothing to route to
//! - **Invalid target** (500 Internal Server Error): the host did not form a URL
//! - **Upstream / body failures** (502 Bad Gateway): the origin could not be reached
//!   or its response could not be read
//! - **Upstream timeout** (504 Gateway Timeout): the origin did not answer in time

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::path::PathBuf;

/// Failure while dispatching a request to the origin.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid outbound request: {0}")]
    Request(String),

    #[error("origin request timed out")]
    Timeout,

    #[error("origin unreachable: {0}")]
    Unreachable(String),
}

/// Errors surfaced to the proxy client.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Missing host header")]
    MissingHost,

    #[error("Failed to parse target URL: {0}")]
    InvalidTarget(String),

    #[error("Bad gateway: {0}")]
    Upstream(#[from] TransportError),

    #[error("Bad gateway: failed to read origin response: {0}")]
    Body(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingHost => StatusCode::BAD_REQUEST,
            ProxyError::InvalidTarget(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Upstream(TransportError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Upstream(_) | ProxyError::Body(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = %status, "Proxy request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Rejected proxy request");
        }

        (status, format!("{self}\n")).into_response()
    }
}

/// Configuration loading and validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("Failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Certificate loading failures.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("No private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("Unusable private key: {0}")]
    InvalidKey(#[source] rustls::Error),

    #[error("Certificate does not match private key: {0}")]
    KeyMismatch(#[source] rustls::Error),

    #[error("Failed to build TLS configuration: {0}")]
    Config(#[source] rustls::Error),
}
