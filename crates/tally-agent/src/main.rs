//! Tally agent - samples this host and reports to the collector.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tally_core::{shutdown, AgentConfig, Transport};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tally-agent")]
#[command(author, version, about = "Tally telemetry agent")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "CONFIG")]
    config: Option<PathBuf>,

    /// Collector HTTP address
    #[arg(short, long, env = "ADDRESS")]
    address: Option<String>,

    /// Collector gRPC address
    #[arg(short, long, env = "GRPC_ADDRESS")]
    grpc_address: Option<String>,

    /// Poll interval in seconds
    #[arg(short, long, env = "POLL_INTERVAL")]
    poll_interval: Option<u64>,

    /// Report interval in seconds
    #[arg(short, long, env = "REPORT_INTERVAL")]
    report_interval: Option<u64>,

    /// HMAC-SHA256 signing key
    #[arg(short, long, env = "KEY")]
    key: Option<String>,

    /// Concurrent outbound requests
    #[arg(short = 'l', long, env = "RATE_LIMIT")]
    rate_limit: Option<usize>,

    /// RSA public key PEM
    #[arg(long, env = "CRYPTO_KEY")]
    crypto_key: Option<PathBuf>,

    /// Transport: http or grpc
    #[arg(long, env = "PROTOCOL")]
    protocol: Option<Transport>,

    /// Address sent as X-Real-IP (discovered when unset)
    #[arg(long, env = "REAL_IP")]
    real_ip: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Defaults < config file < environment < flags
    fn agent_config(&self) -> Result<AgentConfig> {
        let mut config = AgentConfig::load(self.config.as_deref())?;

        if let Some(address) = &self.address {
            config.address = address.clone();
        }
        if let Some(address) = &self.grpc_address {
            config.grpc_address = address.clone();
        }
        if let Some(secs) = self.poll_interval {
            config.poll_interval_secs = secs;
        }
        if let Some(secs) = self.report_interval {
            config.report_interval_secs = secs;
        }
        if let Some(key) = &self.key {
            config.key = Some(key.clone());
        }
        if let Some(limit) = self.rate_limit {
            config.rate_limit = limit;
        }
        if let Some(path) = &self.crypto_key {
            config.crypto_key = Some(path.clone());
        }
        if let Some(protocol) = self.protocol {
            config.protocol = protocol;
        }
        if let Some(ip) = &self.real_ip {
            config.real_ip = Some(ip.clone());
        }

        config.normalize();
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let config = cli.agent_config()?;
    let cancel = CancellationToken::new();
    shutdown::cancel_on_signal(cancel.clone());
    tally_agent::run(config, cancel).await
}
