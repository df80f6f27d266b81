//! # tally-storage
//!
//! The metric store contract and its three backends.
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │   Server router / RPC service              │
//! └──────────────────┬─────────────────────────┘
//!                    │ dyn MetricStore
//! ┌──────────────────▼─────────────────────────┐
//! │   Backend (chosen once at startup)         │
//! │   • MemoryStore   two typed maps           │
//! │   • FileStore     MemoryStore + snapshot   │
//! │   • DbStore       turso tables + warm cache│
//! └────────────────────────────────────────────┘
//! ```
//!
//! Gauges overwrite, counters accumulate. The two namespaces are
//! independent, so a gauge and a counter may share an id.

use async_trait::async_trait;
use tally_core::{Metric, MetricKind, MetricValue};

mod backend;
pub mod db;
mod error;
pub mod file;
pub mod memory;

pub use backend::Backend;
pub use db::DbStore;
pub use error::{Result, StorageError};
pub use file::FileStore;
pub use memory::{MemoryStore, Snapshot};

/// Capability set shared by every backend
#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn get_gauge(&self, key: &str) -> Option<f64>;

    async fn get_counter(&self, key: &str) -> Option<i64>;

    /// Overwrite a gauge
    async fn set_gauge(&self, key: &str, value: f64) -> Result<()>;

    /// Add `delta` to a counter, creating it at `delta` when absent
    async fn set_counter(&self, key: &str, delta: i64) -> Result<()>;

    async fn keys_gauge(&self) -> Vec<String>;

    async fn keys_counter(&self) -> Vec<String>;

    /// Liveness probe
    async fn ping(&self) -> Result<()>;

    /// Persist any buffered state. No-op for backends that write through.
    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Apply one validated update
    async fn apply(&self, metric: &Metric) -> Result<()> {
        match metric.value {
            MetricValue::Gauge(v) => self.set_gauge(&metric.id, v).await,
            MetricValue::Counter(d) => self.set_counter(&metric.id, d).await,
        }
    }

    /// Current value of `(kind, key)`, if any
    async fn get(&self, kind: MetricKind, key: &str) -> Option<MetricValue> {
        match kind {
            MetricKind::Gauge => self.get_gauge(key).await.map(MetricValue::Gauge),
            MetricKind::Counter => self.get_counter(key).await.map(MetricValue::Counter),
        }
    }

    /// Every stored metric, gauges first, each kind sorted by id
    async fn all(&self) -> Vec<Metric> {
        let mut out = Vec::new();
        for key in self.keys_gauge().await {
            if let Some(v) = self.get_gauge(&key).await {
                out.push(Metric::gauge(key, v));
            }
        }
        for key in self.keys_counter().await {
            if let Some(d) = self.get_counter(&key).await {
                out.push(Metric::counter(key, d));
            }
        }
        out
    }
}
