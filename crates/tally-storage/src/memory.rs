//! In-memory backend
//!
//! Two explicitly typed maps behind their own locks. Also serves as the
//! working set of the file-snapshot backend and the warm cache of the
//! relational one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::{MetricStore, Result};

/// Serialized form of a whole store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub gauges: BTreeMap<String, f64>,
    #[serde(default)]
    pub counters: BTreeMap<String, i64>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    gauges: RwLock<HashMap<String, f64>>,
    counters: RwLock<HashMap<String, i64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding exactly the snapshot's values
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            gauges: RwLock::new(snapshot.gauges.into_iter().collect()),
            counters: RwLock::new(snapshot.counters.into_iter().collect()),
        }
    }

    pub async fn snapshot(&self) -> Snapshot {
        let gauges = self.gauges.read().await;
        let counters = self.counters.read().await;
        Snapshot {
            gauges: gauges.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            counters: counters.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }

    /// Overwrite a counter's absolute value (cache seeding)
    pub async fn put_counter(&self, key: &str, value: i64) {
        self.counters.write().await.insert(key.to_string(), value);
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn get_gauge(&self, key: &str) -> Option<f64> {
        self.gauges.read().await.get(key).copied()
    }

    async fn get_counter(&self, key: &str) -> Option<i64> {
        self.counters.read().await.get(key).copied()
    }

    async fn set_gauge(&self, key: &str, value: f64) -> Result<()> {
        self.gauges.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn set_counter(&self, key: &str, delta: i64) -> Result<()> {
        let mut counters = self.counters.write().await;
        let entry = counters.entry(key.to_string()).or_insert(0);
        *entry = entry.wrapping_add(delta);
        Ok(())
    }

    async fn keys_gauge(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.gauges.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    async fn keys_counter(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.counters.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
