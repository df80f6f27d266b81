//! # tally-server
//!
//! The central metrics collector.
//!
//! ```text
//! agents ──HTTP──▶ pipeline (observe → origin → integrity → decrypt → gzip) ──▶ router ─┐
//!        ──gRPC──▶ origin interceptor ──▶ MetricsService ───────────────────────────────┤
//!                                                                                      ▼
//!                                                                         Backend (memory | file | db)
//! ```
//!
//! [`run`] is the composition root: it opens the backend, starts the
//! listeners and drives the graceful shutdown with a final store flush.

pub mod error;
pub mod pipeline;
pub mod router;
pub mod rpc;

use anyhow::{Context, Result};
use axum::Router;
use ipnet::IpNet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tally_core::crypto;
use tally_core::ServerConfig;
use tally_storage::{Backend, MetricStore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub use pipeline::{Pipeline, Stage};
pub use router::AppState;

/// Router wrapped in the configured pipeline
pub fn build_app(config: &ServerConfig, store: Arc<dyn MetricStore>) -> Result<Router> {
    let private_key = config
        .crypto_key
        .as_deref()
        .map(crypto::load_private_key)
        .transpose()
        .context("Failed to load private key")?;

    let pipeline = Pipeline::from_config(config, private_key)?;
    info!("Request pipeline: {}", pipeline.names().join(" → "));
    Ok(pipeline.wrap(router::routes(AppState::new(store))))
}

fn trusted_subnet(config: &ServerConfig) -> Result<Option<IpNet>> {
    config
        .trusted_subnet
        .as_deref()
        .map(|cidr| cidr.parse::<IpNet>().with_context(|| format!("Invalid trusted subnet {}", cidr)))
        .transpose()
}

/// Wait for a listener task
///
/// Once `cancel` fires the task gets `grace` to drain before it is aborted.
async fn drain<T>(
    name: &str,
    mut task: JoinHandle<T>,
    cancel: &CancellationToken,
    grace: Duration,
) -> Option<T> {
    let joined = tokio::select! {
        joined = &mut task => joined,
        _ = cancel.cancelled() => match tokio::time::timeout(grace, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!("{} server did not drain within {:?}, aborting", name, grace);
                task.abort();
                return None;
            }
        },
    };

    match joined {
        Ok(result) => Some(result),
        Err(e) => {
            error!("{} task panicked: {}", name, e);
            None
        }
    }
}

/// Run the server until `cancel` fires
///
/// Both listeners drain first. The store is flushed only after they have
/// returned, so every acknowledged write reaches the final snapshot.
pub async fn run(config: ServerConfig, cancel: CancellationToken) -> Result<()> {
    let backend = Arc::new(
        Backend::open(&config)
            .await
            .context("Failed to open metric store")?,
    );
    let store: Arc<dyn MetricStore> = backend.clone();
    let flush_cancel = CancellationToken::new();
    let flusher = backend.spawn_background(flush_cancel.clone());

    let app = build_app(&config, Arc::clone(&store))?;

    let listener = tokio::net::TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("Failed to bind {}", config.address))?;
    info!("HTTP server listening on {}", listener.local_addr()?);

    let grpc = match &config.grpc_address {
        Some(addr) => {
            let addr: SocketAddr = addr
                .parse()
                .with_context(|| format!("Invalid gRPC address {}", addr))?;
            let trusted = trusted_subnet(&config)?;
            let store = Arc::clone(&store);
            let cancel = cancel.clone();
            Some(tokio::spawn(async move {
                let result = rpc::serve(addr, store, trusted, cancel.clone()).await;
                cancel.cancel();
                result
            }))
        }
        None => None,
    };

    let http = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(cancel.clone().cancelled_owned())
                .await;
            // a failed listener takes the rest of the process down with it
            cancel.cancel();
            result
        })
    };

    let grace = config.shutdown_grace();
    let (http_result, grpc_result) = tokio::join!(drain("HTTP", http, &cancel, grace), async {
        match grpc {
            Some(task) => drain("gRPC", task, &cancel, grace).await,
            None => None,
        }
    });

    match grpc_result {
        Some(Ok(())) => info!("gRPC server stopped"),
        Some(Err(e)) => error!("gRPC server failed: {}", e),
        None => {}
    }

    flush_cancel.cancel();
    match flusher {
        Some(handle) => {
            if let Err(e) = handle.await {
                error!("Snapshot task panicked: {}", e);
            }
        }
        None => {
            if let Err(e) = backend.flush().await {
                error!("Final flush failed: {}", e);
            }
        }
    }

    if let Some(result) = http_result {
        result.context("HTTP server failed")?;
    }
    info!("Server stopped");
    Ok(())
}
