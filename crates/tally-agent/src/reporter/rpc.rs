//! Delivery through the `MetricsService` RPC client

use async_trait::async_trait;
use std::time::Duration;
use tally_core::{AgentConfig, Metric, Result, TallyError};
use tally_proto::metrics_service_client::MetricsServiceClient;
use tally_proto::{UpdateMetricRequest, UpdateMetricsRequest, REAL_IP_METADATA};
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{Channel, Endpoint};

use super::{discover_real_ip, Reporter};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Calls `UpdateMetric` / `UpdateMetrics` on the collector's RPC service
pub struct RpcReporter {
    client: MetricsServiceClient<Channel>,
    real_ip: Option<MetadataValue<Ascii>>,
}

fn status_err(status: tonic::Status) -> TallyError {
    TallyError::Transport(format!("rpc {:?}: {}", status.code(), status.message()))
}

impl RpcReporter {
    /// The channel connects on first use, so a collector that is not up
    /// yet only fails individual sends
    pub fn connect_lazy(address: &str, real_ip: Option<String>) -> Result<Self> {
        let uri = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };
        let endpoint = Endpoint::from_shared(uri)
            .map_err(|e| TallyError::Config(format!("invalid RPC address {}: {}", address, e)))?
            .timeout(REQUEST_TIMEOUT);

        let real_ip = real_ip
            .map(|ip| ip.parse::<MetadataValue<Ascii>>())
            .transpose()
            .map_err(|e| TallyError::Config(format!("invalid real ip: {}", e)))?;

        Ok(Self {
            client: MetricsServiceClient::new(endpoint.connect_lazy()),
            real_ip,
        })
    }

    pub async fn from_config(config: &AgentConfig) -> Result<Self> {
        let real_ip = match &config.real_ip {
            Some(ip) => Some(ip.clone()),
            None => discover_real_ip(&config.grpc_address).await,
        };
        Self::connect_lazy(&config.grpc_address, real_ip)
    }

    fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        if let Some(ip) = &self.real_ip {
            request.metadata_mut().insert(REAL_IP_METADATA, ip.clone());
        }
        request
    }
}

#[async_trait]
impl Reporter for RpcReporter {
    async fn send(&self, metric: &Metric) -> Result<()> {
        let mut client = self.client.clone();
        client
            .update_metric(self.request(UpdateMetricRequest {
                metric: Some(metric.into()),
            }))
            .await
            .map_err(status_err)?;
        Ok(())
    }

    async fn send_batch(&self, metrics: &[Metric]) -> Result<()> {
        if metrics.is_empty() {
            return Ok(());
        }
        let mut client = self.client.clone();
        let response = client
            .update_metrics(self.request(UpdateMetricsRequest {
                metrics: metrics.iter().map(Into::into).collect(),
            }))
            .await
            .map_err(status_err)?;

        if response.into_inner().success {
            Ok(())
        } else {
            Err(TallyError::Transport("batch rejected".to_string()))
        }
    }
}
