//! # tally-agent
//!
//! Samples process and host statistics and ships them to the collector.
//!
//! ```text
//! Collector / HostSampler ──▶ Dispatcher queue ──▶ Reporter (HTTP | gRPC) ──▶ tally-server
//!                                                      │
//!                                                      └─ Encoder: JSON → gzip → RSA → HMAC
//! ```

pub mod collector;
pub mod dispatcher;
pub mod encoder;
pub mod reporter;

use anyhow::{Context, Result};
use std::sync::Arc;
use tally_core::{AgentConfig, Transport};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use collector::{Collector, HostSampler, Sample};
pub use dispatcher::{Dispatcher, Settings};
pub use encoder::{EncodedBody, Encoder};
pub use reporter::{HttpReporter, Reporter, RpcReporter};

/// Reporter for the configured transport
pub async fn build_reporter(config: &AgentConfig) -> Result<Arc<dyn Reporter>> {
    let reporter: Arc<dyn Reporter> = match config.protocol {
        Transport::Http => Arc::new(
            HttpReporter::from_config(config)
                .await
                .context("Failed to set up HTTP reporter")?,
        ),
        Transport::Grpc => Arc::new(
            RpcReporter::from_config(config)
                .await
                .context("Failed to set up gRPC reporter")?,
        ),
    };
    Ok(reporter)
}

/// Run the agent until `cancel` fires
pub async fn run(config: AgentConfig, cancel: CancellationToken) -> Result<()> {
    let reporter = build_reporter(&config).await?;
    let target = match config.protocol {
        Transport::Http => &config.address,
        Transport::Grpc => &config.grpc_address,
    };
    info!("Reporting to {} over {:?}", target, config.protocol);

    Dispatcher::new(Settings::from_config(&config), reporter)
        .run(cancel)
        .await;

    info!("Agent stopped");
    Ok(())
}
