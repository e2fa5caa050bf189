//! Listener lifecycle: accept loop, TLS termination and graceful shutdown

use crate::cache::MemoryCache;
use crate::config::Config;
use crate::forwarder::Forwarder;
use crate::handler::{router, ProxyState};
use crate::shutdown::{self, ShutdownSignal};
use crate::tls::{CertificateProvider, RELOAD_INTERVAL};
use crate::transport::{ReqwestTransport, Transport};
use anyhow::{Context, Result};
use axum::extract::ConnectInfo;
use axum::http::StatusCode;
use axum::Router;
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use hyper_util::server::graceful::{GracefulShutdown, Watcher};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, info, warn};

/// How long in-flight connections may run after shutdown is requested.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Connection-level limits applied by [`serve`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerOptions {
    /// Bounds the TLS handshake and reading request headers
    pub read_timeout: Option<Duration>,
    /// Bounds producing a response
    pub write_timeout: Option<Duration>,
    /// HTTP/2 keep-alive ping interval and timeout
    pub idle_timeout: Option<Duration>,
    pub shutdown_grace: Duration,
}

impl ServerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            idle_timeout: config.idle_timeout(),
            shutdown_grace: SHUTDOWN_GRACE,
        }
    }
}

/// How the server stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every connection finished within the grace period
    Clean,
    /// The grace period elapsed with connections still open
    TimedOut,
}

/// Run the proxy until SIGINT or SIGTERM.
pub async fn run_server(config: Config) -> Result<()> {
    let transport = Arc::new(
        ReqwestTransport::new(config.write_timeout()).context("Failed to create origin client")?,
    );
    let (trigger, signal) = shutdown::channel();

    let signal_task = tokio::spawn(async move {
        shutdown::wait_for_os_signal().await;
        trigger.trigger();
    });

    let result = run_server_with_shutdown(config, transport, signal).await;
    signal_task.abort();
    result
}

/// Bound the time to produce a response; a slow origin yields `504 Gateway Timeout`.
pub fn with_write_timeout(app: Router, write_timeout: Option<Duration>) -> Router {
    match write_timeout {
        Some(timeout) => app.layer(TimeoutLayer::with_status_code(StatusCode::GATEWAY_TIMEOUT, timeout)),
        None => app,
    }
}

/// Run the proxy until `shutdown` fires, dispatching through `transport`.
pub async fn run_server_with_shutdown(
    config: Config,
    transport: Arc<dyn Transport>,
    shutdown: ShutdownSignal,
) -> Result<()> {
    let addr = config.socket_addr().context("Invalid listen address")?;
    let options = ServerOptions::from_config(&config);

    let provider = if config.use_tls {
        Some(Arc::new(CertificateProvider::with_default_paths()))
    } else {
        None
    };
    let acceptor = match &provider {
        Some(provider) => Some(TlsAcceptor::from(
            provider
                .server_config()
                .context("Failed to build TLS configuration")?,
        )),
        None => None,
    };

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    let reloader = provider.map(|provider| provider.spawn_reloader(RELOAD_INTERVAL, shutdown.clone()));

    let cache = Arc::new(MemoryCache::new());
    let state = ProxyState::new(cache, Forwarder::new(transport), config.cache_ttl());
    let app = with_write_timeout(router(state), options.write_timeout);

    info!(
        addr = %addr,
        tls = config.use_tls,
        cache_ttl_secs = config.cache_eviction_secs,
        "Docker proxy listening"
    );

    let outcome = serve(listener, app, acceptor, options, shutdown).await;

    // The reloader exits on the same signal; wait so it does not outlive the server.
    if let Some(reloader) = reloader {
        let _ = reloader.await;
    }

    match outcome {
        ShutdownOutcome::Clean => info!("Server shut down successfully"),
        ShutdownOutcome::TimedOut => warn!("Server shut down with connections still open"),
    }
    Ok(())
}

/// Accept connections on `listener` until `shutdown` fires, then drain.
///
/// With an `acceptor` every connection is TLS-terminated first. Handshake
/// failures, including handshakes attempted before any certificate was
/// loaded, only drop that connection.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    acceptor: Option<TlsAcceptor>,
    options: ServerOptions,
    shutdown: ShutdownSignal,
) -> ShutdownOutcome {
    let graceful = GracefulShutdown::new();

    let mut builder = auto::Builder::new(TokioExecutor::new());
    if let Some(read_timeout) = options.read_timeout {
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(read_timeout);
    }
    if let Some(idle_timeout) = options.idle_timeout {
        builder
            .http2()
            .timer(TokioTimer::new())
            .keep_alive_interval(idle_timeout)
            .keep_alive_timeout(idle_timeout);
    }

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            },
            _ = shutdown.cancelled() => break,
        };

        let app = app.clone();
        let builder = builder.clone();
        let watcher = graceful.watcher();

        match acceptor.clone() {
            Some(acceptor) => {
                let handshake_timeout = options.read_timeout;
                tokio::spawn(async move {
                    let handshake = acceptor.accept(stream);
                    let result = match handshake_timeout {
                        Some(limit) => match tokio::time::timeout(limit, handshake).await {
                            Ok(result) => result,
                            Err(_) => {
                                debug!(peer = %peer, "TLS handshake timed out");
                                return;
                            }
                        },
                        None => handshake.await,
                    };
                    match result {
                        Ok(tls_stream) => serve_connection(builder, watcher, tls_stream, peer, app).await,
                        Err(e) => debug!(peer = %peer, error = %e, "TLS handshake failed"),
                    }
                });
            }
            None => {
                tokio::spawn(serve_connection(builder, watcher, stream, peer, app));
            }
        }
    }

    drop(listener);
    info!("Shutting down gracefully...");

    tokio::select! {
        _ = graceful.shutdown() => ShutdownOutcome::Clean,
        _ = tokio::time::sleep(options.shutdown_grace) => {
            warn!(
                grace_secs = options.shutdown_grace.as_secs(),
                "Timed out waiting for connections to close"
            );
            ShutdownOutcome::TimedOut
        }
    }
}

async fn serve_connection<I>(
    builder: auto::Builder<TokioExecutor>,
    watcher: Watcher,
    io: I,
    peer: SocketAddr,
    app: Router,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = hyper::service::service_fn(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(peer));
        app.clone().oneshot(request)
    });

    let connection = builder.serve_connection_with_upgrades(TokioIo::new(io), service);
    if let Err(e) = watcher.watch(connection).await {
        // Typically the client going away mid-response.
        debug!(peer = %peer, error = %e, "Connection ended with error");
    }
}
