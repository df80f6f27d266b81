//! Tally server - central metrics collector.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tally_core::{crypto, shutdown, ServerConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tally-server")]
#[command(author, version, about = "Tally metrics collector")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// TOML configuration file
    #[arg(short, long, env = "CONFIG", global = true)]
    config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(short, long, env = "ADDRESS")]
    address: Option<String>,

    /// gRPC listen address
    #[arg(short, long, env = "GRPC_ADDRESS")]
    grpc_address: Option<String>,

    /// Snapshot interval in seconds (0 = on every write)
    #[arg(short = 'i', long, env = "STORE_INTERVAL")]
    store_interval: Option<u64>,

    /// Snapshot file path
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH")]
    file_storage_path: Option<PathBuf>,

    /// Restore the store from the snapshot at startup
    #[arg(short, long, env = "RESTORE", num_args = 0..=1, default_missing_value = "true")]
    restore: Option<bool>,

    /// Database location (takes precedence over the snapshot file)
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    database_dsn: Option<String>,

    /// HMAC-SHA256 signing key
    #[arg(short, long, env = "KEY")]
    key: Option<String>,

    /// RSA private key PEM
    #[arg(long, env = "CRYPTO_KEY")]
    crypto_key: Option<PathBuf>,

    /// Trusted subnet (CIDR) for X-Real-IP
    #[arg(short, long, env = "TRUSTED_SUBNET")]
    trusted_subnet: Option<String>,

    /// Seconds to drain in-flight requests on shutdown
    #[arg(long, env = "SHUTDOWN_GRACE")]
    shutdown_grace: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the collector (default)
    Serve,

    /// Generate an RSA key pair for body encryption
    Keygen {
        /// Output path for the private key (PKCS#1 PEM)
        #[arg(long, default_value = "private.pem")]
        private: PathBuf,

        /// Output path for the public key (SPKI PEM)
        #[arg(long, default_value = "public.pem")]
        public: PathBuf,

        /// Key size in bits
        #[arg(long, default_value_t = 4096)]
        bits: usize,
    },
}

impl Cli {
    /// Defaults < config file < environment < flags
    fn server_config(&self) -> Result<ServerConfig> {
        let mut config = ServerConfig::load(self.config.as_deref())?;

        if let Some(address) = &self.address {
            config.address = address.clone();
        }
        if let Some(addr) = &self.grpc_address {
            config.grpc_address = Some(addr.clone());
        }
        if let Some(interval) = self.store_interval {
            config.store_interval_secs = interval;
        }
        if let Some(path) = &self.file_storage_path {
            config.file_storage_path = Some(path.clone());
        }
        if let Some(restore) = self.restore {
            config.restore = restore;
        }
        if let Some(dsn) = &self.database_dsn {
            config.database_dsn = Some(dsn.clone());
        }
        if let Some(key) = &self.key {
            config.key = Some(key.clone());
        }
        if let Some(path) = &self.crypto_key {
            config.crypto_key = Some(path.clone());
        }
        if let Some(subnet) = &self.trusted_subnet {
            config.trusted_subnet = Some(subnet.clone());
        }
        if let Some(secs) = self.shutdown_grace {
            config.shutdown_grace_secs = secs;
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

    match &cli.command {
        Some(Commands::Keygen {
            private,
            public,
            bits,
        }) => {
            crypto::generate_key_pair(*bits, private, public)
                .context("Failed to generate key pair")?;
            info!(
                "Wrote {} and {} ({} bits)",
                private.display(),
                public.display(),
                bits
            );
            Ok(())
        }
        Some(Commands::Serve) | None => {
            let config = cli.server_config()?;
            let cancel = CancellationToken::new();
            shutdown::cancel_on_signal(cancel.clone());
            tally_server::run(config, cancel).await
        }
    }
}
