//! Shutdown behaviour of the composition root

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tally_core::ServerConfig;
use tally_storage::Snapshot;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn free_addr() -> SocketAddr {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
}

fn start(config: ServerConfig) -> (JoinHandle<anyhow::Result<()>>, CancellationToken) {
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(tally_server::run(config, cancel.clone()));
    (handle, cancel)
}

async fn connect(addr: SocketAddr) -> TcpStream {
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(addr).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server never started on {}", addr);
}

fn read_snapshot(path: &Path) -> Snapshot {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

/// Send the request head and the first part of a JSON update body
async fn start_update(stream: &mut TcpStream, body: &str, sent: usize) {
    let head = format!(
        "POST /update/ HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(&body.as_bytes()[..sent]).await.unwrap();
    stream.flush().await.unwrap();
}

#[tokio::test]
async fn test_update_in_flight_at_shutdown_reaches_snapshot() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("metrics.json");
    let addr = free_addr();

    let (handle, cancel) = start(ServerConfig {
        address: addr.to_string(),
        file_storage_path: Some(path.clone()),
        store_interval_secs: 3600,
        ..ServerConfig::default()
    });

    let body = r#"{"id":"Alloc","type":"gauge","value":42.5}"#;
    let mut stream = connect(addr).await;
    start_update(&mut stream, body, 10).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    cancel.cancel();
    tokio::time::sleep(Duration::from_millis(200)).await;

    stream.write_all(&body.as_bytes()[10..]).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);

    handle.await.unwrap().unwrap();

    let snapshot = read_snapshot(&path);
    assert_eq!(snapshot.gauges.get("Alloc"), Some(&42.5));
}

#[tokio::test]
async fn test_final_flush_without_traffic() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("metrics.json");
    let addr = free_addr();

    let (handle, cancel) = start(ServerConfig {
        address: addr.to_string(),
        file_storage_path: Some(path.clone()),
        store_interval_secs: 3600,
        ..ServerConfig::default()
    });

    let mut stream = connect(addr).await;
    stream
        .write_all(b"POST /update/counter/PollCount/7 HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 200"));
    assert!(!path.exists());

    cancel.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(read_snapshot(&path).counters.get("PollCount"), Some(&7));
}

#[tokio::test]
async fn test_stalled_request_does_not_block_shutdown() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("metrics.json");
    let addr = free_addr();

    let (handle, cancel) = start(ServerConfig {
        address: addr.to_string(),
        file_storage_path: Some(path.clone()),
        store_interval_secs: 3600,
        shutdown_grace_secs: 1,
        ..ServerConfig::default()
    });

    let body = r#"{"id":"Alloc","type":"gauge","value":1.0}"#;
    let mut stream = connect(addr).await;
    start_update(&mut stream, body, 5).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("shutdown exceeded the grace period")
        .unwrap()
        .unwrap();

    // the snapshot is still written after the drain is cut short
    assert!(read_snapshot(&path).gauges.is_empty());
    drop(stream);
}
