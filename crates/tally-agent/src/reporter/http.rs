//! JSON-over-HTTP delivery to `/update/` and `/updates/`

use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use std::time::Duration;
use tally_core::{
    AgentConfig, Metric, MetricPayload, Result, TallyError, HASH_HEADER, REAL_IP_HEADER,
};
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use super::Reporter;
use crate::encoder::{EncodedBody, Encoder};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts encoded JSON to `/update/` and `/updates/`
pub struct HttpReporter {
    client: reqwest::Client,
    base_url: String,
    encoder: Encoder,
    real_ip: Option<String>,
}

/// `host:port` with any URL scheme and trailing slash removed
fn host_port(address: &str) -> &str {
    address
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_end_matches('/')
}

fn base_url(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", host_port(address))
    }
}

/// Local address of the interface that routes to `address`
///
/// Connecting a UDP socket sends nothing; it only selects the route.
pub async fn discover_real_ip(address: &str) -> Option<String> {
    let probe = async {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(host_port(address)).await?;
        socket.local_addr()
    };

    match probe.await {
        Ok(local) => Some(local.ip().to_string()),
        Err(e) => {
            warn!("Could not discover local address for {}: {}", address, e);
            None
        }
    }
}

impl HttpReporter {
    pub fn new(address: &str, encoder: Encoder, real_ip: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TallyError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url(address),
            encoder,
            real_ip,
        })
    }

    /// Configured `real_ip`, or the discovered one when unset
    pub async fn from_config(config: &AgentConfig) -> Result<Self> {
        let encoder = Encoder::from_config(config)?;
        let real_ip = match &config.real_ip {
            Some(ip) => Some(ip.clone()),
            None => discover_real_ip(&config.address).await,
        };
        debug!("Reporting to {} as {:?}", config.address, real_ip);
        Self::new(&config.address, encoder, real_ip)
    }

    pub fn real_ip(&self) -> Option<&str> {
        self.real_ip.as_deref()
    }

    async fn post(&self, path: &str, body: EncodedBody) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json");

        if body.gzip {
            request = request.header(CONTENT_ENCODING, "gzip");
        }
        if let Some(signature) = &body.signature {
            request = request.header(HASH_HEADER, signature.as_str());
        }
        if let Some(ip) = &self.real_ip {
            request = request.header(REAL_IP_HEADER, ip.as_str());
        }

        let response = request
            .body(body.bytes)
            .send()
            .await
            .map_err(|e| TallyError::Transport(format!("POST {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TallyError::Transport(format!("POST {} returned {}", url, status)));
        }
        Ok(())
    }
}

#[async_trait]
impl Reporter for HttpReporter {
    async fn send(&self, metric: &Metric) -> Result<()> {
        let body = self.encoder.encode(&MetricPayload::from(metric))?;
        self.post("/update/", body).await
    }

    async fn send_batch(&self, metrics: &[Metric]) -> Result<()> {
        if metrics.is_empty() {
            return Ok(());
        }
        let payloads: Vec<MetricPayload> = metrics.iter().map(MetricPayload::from).collect();
        let body = self.encoder.encode(&payloads)?;
        self.post("/updates/", body).await
    }
}
