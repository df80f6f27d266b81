//! Relational backend on Turso
//!
//! Schema:
//!   - `gauges(key TEXT PRIMARY KEY, value REAL NOT NULL)`
//!   - `counters(key TEXT PRIMARY KEY, value INTEGER NOT NULL)`
//!
//! A [`MemoryStore`] is kept as a warm cache. It is seeded from the tables
//! on open and updated on every write. Reads go to the tables first and fall
//! back to the cache on any query error, including not-found.

use async_trait::async_trait;
use std::path::Path;
use tally_core::RetryPolicy;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use turso::{params, Builder, Connection};

use crate::memory::MemoryStore;
use crate::{MetricStore, Result, StorageError};

pub struct DbStore {
    /// Guards the connection; writes and table reads are serialized
    conn: Mutex<Connection>,
    cache: MemoryStore,
    retry: RetryPolicy,
    path: String,
}

impl DbStore {
    /// Open (or create) the database at `path`, bootstrap the schema and
    /// seed the warm cache.
    ///
    /// ```no_run
    /// use tally_storage::DbStore;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let store = DbStore::open("metrics.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_retry(path, RetryPolicy::default()).await
    }

    pub async fn open_with_retry<P: AsRef<Path>>(path: P, retry: RetryPolicy) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db = Builder::new_local(&path_str).build().await?;
        let conn = db.connect()?;

        // PRAGMA statements may return rows, so use query()
        let _ = conn.query("PRAGMA journal_mode=WAL", params![]).await?;
        let _ = conn.query("PRAGMA busy_timeout=5000", params![]).await?;

        let store = Self {
            conn: Mutex::new(conn),
            cache: MemoryStore::new(),
            retry,
            path: path_str,
        };
        store.bootstrap().await?;
        store.warm_cache().await?;
        Ok(store)
    }

    /// Create both tables if they don't exist
    async fn bootstrap(&self) -> Result<()> {
        let statements = [
            r#"CREATE TABLE IF NOT EXISTS gauges (
                key TEXT PRIMARY KEY,
                value REAL NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS counters (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            )"#,
        ];

        let conn = self.conn.lock().await;
        for stmt in statements {
            conn.execute(stmt, params![]).await?;
        }
        Ok(())
    }

    async fn warm_cache(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        let mut gauges = 0usize;
        let mut rows = conn.query("SELECT key, value FROM gauges", params![]).await?;
        while let Some(row) = rows.next().await? {
            let key: String = row.get(0)?;
            let value: f64 = row.get(1)?;
            self.cache.set_gauge(&key, value).await?;
            gauges += 1;
        }

        let mut counters = 0usize;
        let mut rows = conn.query("SELECT key, value FROM counters", params![]).await?;
        while let Some(row) = rows.next().await? {
            let key: String = row.get(0)?;
            let value: i64 = row.get(1)?;
            self.cache.put_counter(&key, value).await;
            counters += 1;
        }

        info!(
            "Opened {} ({} gauges, {} counters cached)",
            self.path, gauges, counters
        );
        Ok(())
    }

    async fn upsert_gauge(&self, key: &str, value: f64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO gauges (key, value) VALUES (?, ?)
               ON CONFLICT(key) DO UPDATE SET value = excluded.value"#,
            params![key, value],
        )
        .await?;
        Ok(())
    }

    async fn upsert_counter(&self, key: &str, delta: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"INSERT INTO counters (key, value) VALUES (?, ?)
               ON CONFLICT(key) DO UPDATE SET value = counters.value + excluded.value"#,
            params![key, delta],
        )
        .await?;
        Ok(())
    }

    async fn query_gauge(&self, key: &str) -> Result<f64> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query("SELECT value FROM gauges WHERE key = ?", params![key])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Err(StorageError::Other(format!("gauge not found: {}", key))),
        }
    }

    async fn query_counter(&self, key: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query("SELECT value FROM counters WHERE key = ?", params![key])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Err(StorageError::Other(format!("counter not found: {}", key))),
        }
    }

    async fn query_keys(&self, table: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let sql = format!("SELECT key FROM {} ORDER BY key", table);
        let mut rows = conn.query(&sql, params![]).await?;
        let mut keys = Vec::new();
        while let Some(row) = rows.next().await? {
            keys.push(row.get(0)?);
        }
        Ok(keys)
    }
}

#[async_trait]
impl MetricStore for DbStore {
    async fn get_gauge(&self, key: &str) -> Option<f64> {
        match self.query_gauge(key).await {
            Ok(v) => Some(v),
            Err(e) => {
                debug!("Gauge read for {} served from cache: {}", key, e);
                self.cache.get_gauge(key).await
            }
        }
    }

    async fn get_counter(&self, key: &str) -> Option<i64> {
        match self.query_counter(key).await {
            Ok(v) => Some(v),
            Err(e) => {
                debug!("Counter read for {} served from cache: {}", key, e);
                self.cache.get_counter(key).await
            }
        }
    }

    async fn set_gauge(&self, key: &str, value: f64) -> Result<()> {
        self.cache.set_gauge(key, value).await?;
        self.retry
            .run(
                "gauge upsert",
                || self.upsert_gauge(key, value),
                StorageError::is_retriable,
            )
            .await
            .inspect_err(|e| warn!("Gauge {} not persisted: {}", key, e))
    }

    async fn set_counter(&self, key: &str, delta: i64) -> Result<()> {
        self.cache.set_counter(key, delta).await?;
        self.retry
            .run(
                "counter upsert",
                || self.upsert_counter(key, delta),
                StorageError::is_retriable,
            )
            .await
            .inspect_err(|e| warn!("Counter {} not persisted: {}", key, e))
    }

    async fn keys_gauge(&self) -> Vec<String> {
        match self.query_keys("gauges").await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Gauge key scan failed, using cache: {}", e);
                self.cache.keys_gauge().await
            }
        }
    }

    async fn keys_counter(&self) -> Vec<String> {
        match self.query_keys("counters").await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Counter key scan failed, using cache: {}", e);
                self.cache.keys_counter().await
            }
        }
    }

    async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        let mut rows = conn.query("SELECT 1", params![]).await?;
        rows.next().await?;
        Ok(())
    }
}
