//! TLS certificate hot reload
//!
//! [`CertificateProvider`] owns the single active certificate/key pair. A
//! background task reloads it from disk on a fixed interval, and the rustls
//! acceptor asks the provider for the current pair on every handshake, so new
//! certificates take effect without restarting the listener.

use crate::error::TlsError;
use crate::shutdown::ShutdownSignal;
use rustls::crypto::ring;
use rustls::pki_types::CertificateDer;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Certificate chain read by the reload loop, relative to the working directory.
pub const CERT_PATH: &str = "cert.pem";

/// Private key read by the reload loop, relative to the working directory.
pub const KEY_PATH: &str = "key.pem";

/// Time between reload attempts.
pub const RELOAD_INTERVAL: Duration = Duration::from_secs(60);

/// Holds the certificate presented by the TLS listener.
#[derive(Debug)]
pub struct CertificateProvider {
    cert_path: PathBuf,
    key_path: PathBuf,
    current: RwLock<Option<Arc<CertifiedKey>>>,
}

impl CertificateProvider {
    /// Provider with nothing loaded yet.
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            current: RwLock::new(None),
        }
    }

    /// Provider reading [`CERT_PATH`] and [`KEY_PATH`].
    pub fn with_default_paths() -> Self {
        Self::new(CERT_PATH, KEY_PATH)
    }

    /// The active pair, or `None` before the first successful load.
    pub fn current(&self) -> Option<Arc<CertifiedKey>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.current().is_some()
    }

    /// Read the pair from disk and make it the active one.
    ///
    /// On error the previously active pair stays in place.
    pub fn reload(&self) -> Result<(), TlsError> {
        let certified = load_certified_key(&self.cert_path, &self.key_path)?;
        let certified = Arc::new(certified);

        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(certified);
        Ok(())
    }

    /// Reload every `period` until shutdown, starting immediately.
    ///
    /// Failures are logged and never stop the loop.
    pub fn spawn_reloader(self: &Arc<Self>, period: Duration, shutdown: ShutdownSignal) -> JoinHandle<()> {
        let provider = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => provider.reload_and_log(),
                    _ = shutdown.cancelled() => {
                        debug!("Certificate reloader stopping");
                        break;
                    }
                }
            }
        })
    }

    fn reload_and_log(&self) {
        let was_loaded = self.is_loaded();
        match self.reload() {
            Ok(()) if was_loaded => debug!(cert = %self.cert_path.display(), "Reloaded TLS certificate"),
            Ok(()) => info!(cert = %self.cert_path.display(), "Loaded TLS certificate"),
            Err(e) => warn!(
                error = %e,
                has_previous = was_loaded,
                "Failed to load key pair"
            ),
        }
    }

    /// rustls server configuration resolving certificates through this provider.
    pub fn server_config(self: &Arc<Self>) -> Result<Arc<ServerConfig>, TlsError> {
        let mut config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(TlsError::Config)?
            .with_no_client_auth()
            .with_cert_resolver(self.clone());
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Ok(Arc::new(config))
    }
}

impl ResolvesServerCert for CertificateProvider {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let current = self.current();
        if current.is_none() {
            // rustls aborts the handshake with an alert when no certificate is returned.
            warn!(
                server_name = client_hello.server_name().unwrap_or("<none>"),
                "No TLS certificate loaded, rejecting handshake"
            );
        }
        current
    }
}

fn read_error(path: &Path) -> impl FnOnce(std::io::Error) -> TlsError {
    let path = path.to_path_buf();
    move |source| TlsError::Read { path, source }
}

fn load_certified_key(cert_path: &Path, key_path: &Path) -> Result<CertifiedKey, TlsError> {
    let cert_file = File::open(cert_path).map_err(read_error(cert_path))?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<_, _>>()
        .map_err(read_error(cert_path))?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.to_path_buf()));
    }

    let key_file = File::open(key_path).map_err(read_error(key_path))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(read_error(key_path))?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_path_buf()))?;

    let signing_key = ring::sign::any_supported_type(&key).map_err(TlsError::InvalidKey)?;
    let certified = CertifiedKey::new(certs, signing_key);
    certified.keys_match().map_err(TlsError::KeyMismatch)?;
    Ok(certified)
}
