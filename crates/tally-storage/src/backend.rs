//! Static backend selection

use async_trait::async_trait;
use std::sync::Arc;
use tally_core::ServerConfig;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{DbStore, FileStore, MemoryStore, MetricStore, Result};

/// The backend chosen once at startup
pub enum Backend {
    Memory(MemoryStore),
    File(Arc<FileStore>),
    Db(DbStore),
}

impl Backend {
    /// Database DSN first, then snapshot file, then pure memory
    pub async fn open(config: &ServerConfig) -> Result<Self> {
        if let Some(dsn) = &config.database_dsn {
            info!("Using relational store at {}", dsn);
            return Ok(Backend::Db(DbStore::open(dsn).await?));
        }

        if let Some(path) = &config.file_storage_path {
            info!(
                "Using file store at {} (interval {}s, restore {})",
                path.display(),
                config.store_interval_secs,
                config.restore
            );
            let store = FileStore::open(path, config.store_interval(), config.restore).await?;
            return Ok(Backend::File(Arc::new(store)));
        }

        info!("Using in-memory store");
        Ok(Backend::Memory(MemoryStore::new()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Memory(_) => "memory",
            Backend::File(_) => "file",
            Backend::Db(_) => "database",
        }
    }

    /// Start backend-owned background work (the snapshot timer)
    pub fn spawn_background(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        match self {
            Backend::File(store) => store.spawn_flusher(cancel),
            _ => None,
        }
    }

    fn inner(&self) -> &dyn MetricStore {
        match self {
            Backend::Memory(store) => store,
            Backend::File(store) => store.as_ref(),
            Backend::Db(store) => store,
        }
    }
}

#[async_trait]
impl MetricStore for Backend {
    async fn get_gauge(&self, key: &str) -> Option<f64> {
        self.inner().get_gauge(key).await
    }

    async fn get_counter(&self, key: &str) -> Option<i64> {
        self.inner().get_counter(key).await
    }

    async fn set_gauge(&self, key: &str, value: f64) -> Result<()> {
        self.inner().set_gauge(key, value).await
    }

    async fn set_counter(&self, key: &str, delta: i64) -> Result<()> {
        self.inner().set_counter(key, delta).await
    }

    async fn keys_gauge(&self) -> Vec<String> {
        self.inner().keys_gauge().await
    }

    async fn keys_counter(&self) -> Vec<String> {
        self.inner().keys_counter().await
    }

    async fn ping(&self) -> Result<()> {
        self.inner().ping().await
    }

    async fn flush(&self) -> Result<()> {
        self.inner().flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_selection_defaults_to_memory() {
        let backend = Backend::open(&ServerConfig::default()).await.unwrap();
        assert_eq!(backend.name(), "memory");
        assert!(backend.spawn_background(CancellationToken::new()).is_none());
    }

    #[tokio::test]
    async fn test_selection_prefers_database() {
        let temp = TempDir::new().unwrap();
        let config = ServerConfig {
            database_dsn: Some(temp.path().join("m.db").to_string_lossy().to_string()),
            file_storage_path: Some(temp.path().join("m.json")),
            ..ServerConfig::default()
        };
        let backend = Backend::open(&config).await.unwrap();
        assert_eq!(backend.name(), "database");
    }

    #[tokio::test]
    async fn test_selection_file() {
        let temp = TempDir::new().unwrap();
        let config = ServerConfig {
            file_storage_path: Some(temp.path().join("m.json")),
            store_interval_secs: 0,
            ..ServerConfig::default()
        };
        let backend = Backend::open(&config).await.unwrap();
        assert_eq!(backend.name(), "file");

        backend.set_counter("c", 2).await.unwrap();
        backend.set_counter("c", 3).await.unwrap();
        assert_eq!(backend.get_counter("c").await, Some(5));
        assert!(temp.path().join("m.json").exists());
    }
}
