//! Transports that deliver metrics to the collector

mod http;
mod rpc;

use async_trait::async_trait;
use tally_core::{Metric, Result};

pub use http::{discover_real_ip, HttpReporter};
pub use rpc::RpcReporter;

/// One outbound transport
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Deliver one metric update
    async fn send(&self, metric: &Metric) -> Result<()>;

    /// Deliver several updates in one request
    async fn send_batch(&self, metrics: &[Metric]) -> Result<()>;
}
