//! # Docker Proxy
//!
//! A caching, host-routing HTTPS proxy for container image registries.
//! Container runtimes talk to the proxy as if it were the registry; each
//! request is forwarded to the host named in its own `Host` header, and
//! manifest responses are kept in memory so repeated pulls skip the origin.
//!
//! ## Features
//!
//! - **Host routing**: the origin is `https://<Host>`, no static backend table
//! - **Manifest caching**: any path containing `/manifests/` is cached per
//!   host, path and `Authorization` value, for a fixed TTL
//! - **Certificate hot reload**: `cert.pem` / `key.pem` are re-read every
//!   minute and picked up by the next TLS handshake
//! - **Graceful shutdown**: SIGINT/SIGTERM drain in-flight requests for up to
//!   30 seconds
//!
//! ## Architecture
//!
//! ```text
//! client ──► handler ──► cache hit? ──yes──► cached bytes
//!                           │ no
//!                           ▼
//!                       forwarder ──► transport ──► https://<Host>/...
//!                           │
//!                           └── manifest path: capture body into cache
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use docker_proxy::{server, Config};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load("/etc/docker-proxy/config.yaml".as_ref())?;
//! server::run_server(config).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod forwarder;
pub mod handler;
pub mod server;
pub mod shutdown;
pub mod tls;
pub mod transport;

// Re-export main types
pub use cache::{MemoryCache, ResponseCache};
pub use config::Config;
pub use error::{ConfigError, ProxyError, TlsError, TransportError};
pub use forwarder::Forwarder;
pub use handler::{router, ProxyState};
pub use tls::CertificateProvider;
pub use transport::{ReqwestTransport, Transport};

// Re-export server functions
pub use server::{run_server, run_server_with_shutdown};

/// Service name for logging and process management
pub const SERVICE_NAME: &str = "docker-proxy";
