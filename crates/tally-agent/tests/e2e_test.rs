//! Agent against a real in-process server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tally_agent::{build_reporter, Dispatcher, Settings};
use tally_core::{crypto, AgentConfig, ServerConfig, Transport};
use tally_storage::{MemoryStore, MetricStore};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

async fn start_http_server(config: &ServerConfig) -> (SocketAddr, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let app = tally_server::build_app(config, store.clone()).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (addr, store)
}

fn fast(config: &AgentConfig) -> Settings {
    Settings {
        poll_interval: Duration::from_millis(50),
        report_interval: Duration::from_millis(100),
        ..Settings::from_config(config)
    }
}

async fn run_agent(config: &AgentConfig, duration: Duration) {
    let reporter = build_reporter(config).await.unwrap();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Dispatcher::new(fast(config), reporter).run(cancel.clone()));
    tokio::time::sleep(duration).await;
    cancel.cancel();
    handle.await.unwrap();
}

async fn assert_received(store: &MemoryStore) {
    assert!(store.get_counter("PollCount").await.unwrap_or(0) >= 1);
    assert!(store.get_gauge("RandomValue").await.is_some());
    assert!(store.get_gauge("TotalMemory").await.is_some());
}

#[tokio::test]
async fn test_http_agent_with_signing_and_subnet() {
    let server = ServerConfig {
        key: Some("secret".into()),
        trusted_subnet: Some("127.0.0.0/8".into()),
        ..ServerConfig::default()
    };
    let (addr, store) = start_http_server(&server).await;

    let agent = AgentConfig {
        address: addr.to_string(),
        key: Some("secret".into()),
        rate_limit: 2,
        ..AgentConfig::default()
    };
    run_agent(&agent, Duration::from_millis(500)).await;

    assert_received(&store).await;
}

#[tokio::test]
async fn test_http_agent_with_encryption() {
    let dir = TempDir::new().unwrap();
    let private_path = dir.path().join("private.pem");
    let public_path = dir.path().join("public.pem");
    crypto::generate_key_pair(1024, &private_path, &public_path).unwrap();

    let server = ServerConfig {
        key: Some("secret".into()),
        crypto_key: Some(private_path),
        ..ServerConfig::default()
    };
    let (addr, store) = start_http_server(&server).await;

    let agent = AgentConfig {
        address: format!("http://{}", addr),
        key: Some("secret".into()),
        crypto_key: Some(public_path),
        ..AgentConfig::default()
    };
    run_agent(&agent, Duration::from_millis(500)).await;

    assert_received(&store).await;
}

#[tokio::test]
async fn test_wrong_key_is_rejected() {
    let server = ServerConfig {
        key: Some("secret".into()),
        ..ServerConfig::default()
    };
    let (addr, store) = start_http_server(&server).await;

    let agent = AgentConfig {
        address: addr.to_string(),
        key: Some("not-the-secret".into()),
        ..AgentConfig::default()
    };
    run_agent(&agent, Duration::from_millis(300)).await;

    assert!(store.all().await.is_empty());
}

#[tokio::test]
async fn test_grpc_agent_batches() {
    // Reserve a free port for the RPC listener
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();

    let store = Arc::new(MemoryStore::new());
    let server_cancel = CancellationToken::new();
    let server = tokio::spawn(tally_server::rpc::serve(
        addr,
        store.clone(),
        Some("127.0.0.0/8".parse().unwrap()),
        server_cancel.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let agent = AgentConfig {
        grpc_address: addr.to_string(),
        protocol: Transport::Grpc,
        ..AgentConfig::default()
    };
    run_agent(&agent, Duration::from_millis(500)).await;

    assert_received(&store).await;

    server_cancel.cancel();
    server.await.unwrap().unwrap();
}
