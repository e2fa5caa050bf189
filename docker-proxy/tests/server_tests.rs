//! End-to-end tests through the listener: plain and TLS connections, and
//! draining in-flight requests on shutdown

mod common;

use common::{proxy_app, MockOrigin, OriginBehavior};
use docker_proxy::server::{serve, ServerOptions, ShutdownOutcome};
use docker_proxy::shutdown::{self, ShutdownTrigger};
use docker_proxy::CertificateProvider;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

struct RunningProxy {
    addr: SocketAddr,
    trigger: ShutdownTrigger,
    server: JoinHandle<ShutdownOutcome>,
}

impl RunningProxy {
    async fn start(origin: Arc<MockOrigin>, acceptor: Option<TlsAcceptor>, grace: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (trigger, signal) = shutdown::channel();
        let (app, _cache) = proxy_app(origin);
        let options = ServerOptions {
            read_timeout: Some(Duration::from_secs(5)),
            shutdown_grace: grace,
            ..Default::default()
        };

        let server = tokio::spawn(serve(listener, app, acceptor, options, signal));
        Self { addr, trigger, server }
    }

    async fn stop(self) -> ShutdownOutcome {
        self.trigger.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.server)
            .await
            .expect("server should stop")
            .expect("server task should not panic")
    }
}

fn write_certificate(dir: &TempDir, name: &str) -> Arc<CertificateProvider> {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec![name.to_string()]).unwrap();
    let cert_path = dir.path().join("cert.pem");
    let key_path = dir.path().join("key.pem");
    std::fs::write(&cert_path, cert.pem()).unwrap();
    std::fs::write(&key_path, key_pair.serialize_pem()).unwrap();
    Arc::new(CertificateProvider::new(cert_path, key_path))
}

fn tls_client(name: &str, addr: SocketAddr) -> reqwest::Client {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .resolve(name, addr)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_plain_listener_forwards_and_caches() {
    let origin = Arc::new(MockOrigin::new(OriginBehavior::Registry));
    let proxy = RunningProxy::start(origin.clone(), None, Duration::from_secs(1)).await;
    let client = reqwest::Client::new();
    let url = format!("http://{}/v2/app/manifests/test", proxy.addr);

    for _ in 0..2 {
        let response = client
            .get(&url)
            .header("authorization", "Bearer token")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "test manifest data");
    }
    assert_eq!(origin.calls(), 1);

    let seen = origin.last_request().unwrap();
    assert_eq!(
        seen.uri.to_string(),
        format!("https://{}/v2/app/manifests/test", proxy.addr)
    );
    assert_eq!(seen.headers.get("x-forwarded-for").unwrap(), "127.0.0.1");

    drop(client);
    assert_eq!(proxy.stop().await, ShutdownOutcome::Clean);
}

#[tokio::test]
async fn test_tls_listener_serves_loaded_certificate() {
    let temp_dir = TempDir::new().unwrap();
    let provider = write_certificate(&temp_dir, "registry.test");
    provider.reload().unwrap();
    let acceptor = TlsAcceptor::from(provider.server_config().unwrap());

    let origin = Arc::new(MockOrigin::new(OriginBehavior::Registry));
    let proxy = RunningProxy::start(origin.clone(), Some(acceptor), Duration::from_secs(1)).await;
    let client = tls_client("registry.test", proxy.addr);

    let response = client
        .get(format!("https://registry.test:{}/v2/app/manifests/test", proxy.addr.port()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "test manifest data");

    let seen = origin.last_request().unwrap();
    assert_eq!(
        seen.uri.to_string(),
        format!("https://registry.test:{}/v2/app/manifests/test", proxy.addr.port())
    );

    drop(client);
    proxy.stop().await;
}

#[tokio::test]
async fn test_tls_handshake_fails_until_certificate_loads() {
    let temp_dir = TempDir::new().unwrap();
    let provider = write_certificate(&temp_dir, "registry.test");
    let acceptor = TlsAcceptor::from(provider.server_config().unwrap());

    let origin = Arc::new(MockOrigin::new(OriginBehavior::Registry));
    let proxy = RunningProxy::start(origin.clone(), Some(acceptor), Duration::from_secs(1)).await;
    let url = format!("https://registry.test:{}/v2/app/blobs/sha256:abc", proxy.addr.port());

    let before = tls_client("registry.test", proxy.addr).get(&url).send().await;
    assert!(before.is_err());
    assert_eq!(origin.calls(), 0);

    // The next handshake picks up the new pair without restarting the listener.
    provider.reload().unwrap();
    let after = tls_client("registry.test", proxy.addr).get(&url).send().await.unwrap();
    assert_eq!(after.status(), reqwest::StatusCode::NOT_FOUND);
    assert_eq!(origin.calls(), 1);

    proxy.stop().await;
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_request() {
    let origin = Arc::new(MockOrigin::slow(Duration::from_millis(300)));
    let proxy = RunningProxy::start(origin.clone(), None, Duration::from_secs(5)).await;
    let url = format!("http://{}/v2/app/manifests/test", proxy.addr);

    let request = tokio::spawn(async move { reqwest::get(url).await });
    while origin.calls() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let outcome = proxy.stop().await;
    let response = request.await.unwrap().expect("in-flight request should complete");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(outcome, ShutdownOutcome::Clean);
}

#[tokio::test]
async fn test_shutdown_gives_up_after_grace_period() {
    let origin = Arc::new(MockOrigin::slow(Duration::from_secs(30)));
    let proxy = RunningProxy::start(origin.clone(), None, Duration::from_millis(100)).await;
    let url = format!("http://{}/v2/app/manifests/test", proxy.addr);

    let request = tokio::spawn(async move { reqwest::get(url).await });
    while origin.calls() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(proxy.stop().await, ShutdownOutcome::TimedOut);
    request.abort();
}
