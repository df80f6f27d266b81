//! File-snapshot backend
//!
//! Wraps a [`MemoryStore`] and persists the whole store as one JSON
//! document `{"gauges": {..}, "counters": {..}}`.
//!
//! Flush modes:
//! - interval zero: every write synchronously rewrites the snapshot
//! - otherwise: a background task rewrites it on a timer and once more on
//!   shutdown
//!
//! Snapshots are written to a sibling temporary file and renamed into place.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tally_core::RetryPolicy;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::memory::{MemoryStore, Snapshot};
use crate::{MetricStore, Result, StorageError};

pub struct FileStore {
    memory: MemoryStore,
    path: PathBuf,
    interval: Duration,
    /// Serializes snapshot writes
    flush_lock: Mutex<()>,
    retry: RetryPolicy,
}

impl FileStore {
    /// Open the store, seeding it from `path` when `restore` is set
    ///
    /// A missing snapshot file yields an empty store. Unparsable content is
    /// an error.
    pub async fn open(path: impl Into<PathBuf>, interval: Duration, restore: bool) -> Result<Self> {
        Self::open_with_retry(path, interval, restore, RetryPolicy::default()).await
    }

    pub async fn open_with_retry(
        path: impl Into<PathBuf>,
        interval: Duration,
        restore: bool,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let path = path.into();
        let memory = if restore {
            match read_snapshot(&path, &retry).await? {
                Some(snapshot) => {
                    info!(
                        "Restored {} gauges and {} counters from {}",
                        snapshot.gauges.len(),
                        snapshot.counters.len(),
                        path.display()
                    );
                    MemoryStore::from_snapshot(snapshot)
                }
                None => {
                    info!("No snapshot at {}, starting empty", path.display());
                    MemoryStore::new()
                }
            }
        } else {
            MemoryStore::new()
        };

        Ok(Self {
            memory,
            path,
            interval,
            flush_lock: Mutex::new(()),
            retry,
        })
    }

    /// True when every write is persisted synchronously
    pub fn is_sync(&self) -> bool {
        self.interval.is_zero()
    }

    /// Write the current store to disk, retrying transient failures
    pub async fn save(&self) -> Result<()> {
        let _guard = self.flush_lock.lock().await;
        let snapshot = self.memory.snapshot().await;
        let data = serde_json::to_vec(&snapshot)?;

        self.retry
            .run(
                "snapshot write",
                || write_atomic(&self.path, &data),
                StorageError::is_retriable,
            )
            .await?;

        debug!(
            "Saved snapshot ({} gauges, {} counters) to {}",
            snapshot.gauges.len(),
            snapshot.counters.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Spawn the periodic flusher
    ///
    /// Returns `None` in synchronous mode. The task saves once more when
    /// `cancel` fires, then exits.
    pub fn spawn_flusher(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        if self.is_sync() {
            return None;
        }

        let store = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(store.interval);
            // first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = store.save().await {
                            warn!("Periodic snapshot failed: {}", e);
                        }
                    }
                }
            }

            match store.save().await {
                Ok(()) => info!("Final snapshot written to {}", store.path.display()),
                Err(e) => warn!("Final snapshot failed: {}", e),
            }
        }))
    }

    async fn after_write(&self) {
        if self.is_sync() {
            if let Err(e) = self.save().await {
                warn!("Snapshot after write failed: {}", e);
            }
        }
    }
}

async fn read_snapshot(path: &Path, retry: &RetryPolicy) -> Result<Option<Snapshot>> {
    let read = retry
        .run(
            "snapshot read",
            || async move { tokio::fs::read(path).await.map_err(StorageError::from) },
            StorageError::is_retriable,
        )
        .await;

    let data = match read {
        Ok(data) => data,
        Err(StorageError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| StorageError::InvalidSnapshot {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl MetricStore for FileStore {
    async fn get_gauge(&self, key: &str) -> Option<f64> {
        self.memory.get_gauge(key).await
    }

    async fn get_counter(&self, key: &str) -> Option<i64> {
        self.memory.get_counter(key).await
    }

    async fn set_gauge(&self, key: &str, value: f64) -> Result<()> {
        self.memory.set_gauge(key, value).await?;
        self.after_write().await;
        Ok(())
    }

    async fn set_counter(&self, key: &str, delta: i64) -> Result<()> {
        self.memory.set_counter(key, delta).await?;
        self.after_write().await;
        Ok(())
    }

    async fn keys_gauge(&self) -> Vec<String> {
        self.memory.keys_gauge().await
    }

    async fn keys_counter(&self) -> Vec<String> {
        self.memory.keys_counter().await
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.save().await
    }
}
