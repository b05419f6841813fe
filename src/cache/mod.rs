
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{RagError, Result};

pub type CachePool = Pool<Sqlite>;

const MAX_FILE_CONNECTIONS: u32 = 5;

const DAY_SECONDS: u64 = 24 * 60 * 60;
pub const DEFAULT_EMBEDDINGS_TTL_SECONDS: u64 = 30 * DAY_SECONDS;
pub const DEFAULT_DOCUMENTS_TTL_SECONDS: u64 = 7 * DAY_SECONDS;
pub const DEFAULT_VECTOR_INDEX_TTL_SECONDS: u64 = 7 * DAY_SECONDS;
pub const DEFAULT_SEARCH_RESULTS_TTL_SECONDS: u64 = 60 * 60;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 250;
pub const DEFAULT_MAINTENANCE_INTERVAL_SECONDS: u64 = 60 * 60;

/// Independent keyspaces inside the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    Embeddings,
    Documents,
    VectorIndex,
    SearchResults,
}

impl Namespace {
    pub const ALL: [Self; 4] = [
        Self::Embeddings,
        Self::Documents,
        Self::VectorIndex,
        Self::SearchResults,
    ];

    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Embeddings => "embeddings",
            Self::Documents => "documents",
            Self::VectorIndex => "vector_index",
            Self::SearchResults => "search_results",
        }
    }
}

impl fmt::Display for Namespace {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = RagError;

    #[inline]
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|ns| ns.as_str() == normalized)
            .ok_or_else(|| RagError::Config(format!("Unknown cache namespace: {s}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub embeddings_ttl_seconds: u64,
    pub documents_ttl_seconds: u64,
    pub vector_index_ttl_seconds: u64,
    pub search_results_ttl_seconds: u64,
    pub read_timeout_ms: u64,
    pub maintenance_interval_seconds: u64,
}

impl Default for CacheSettings {
    #[inline]
    fn default() -> Self {
        Self {
            embeddings_ttl_seconds: DEFAULT_EMBEDDINGS_TTL_SECONDS,
            documents_ttl_seconds: DEFAULT_DOCUMENTS_TTL_SECONDS,
            vector_index_ttl_seconds: DEFAULT_VECTOR_INDEX_TTL_SECONDS,
            search_results_ttl_seconds: DEFAULT_SEARCH_RESULTS_TTL_SECONDS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            maintenance_interval_seconds: DEFAULT_MAINTENANCE_INTERVAL_SECONDS,
        }
    }
}

impl CacheSettings {
    #[inline]
    pub const fn ttl_for(&self, namespace: Namespace) -> Duration {
        let seconds = match namespace {
            Namespace::Embeddings => self.embeddings_ttl_seconds,
            Namespace::Documents => self.documents_ttl_seconds,
            Namespace::VectorIndex => self.vector_index_ttl_seconds,
            Namespace::SearchResults => self.search_results_ttl_seconds,
        };
        Duration::from_secs(seconds)
    }

    #[inline]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    #[inline]
    pub const fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_seconds)
    }
}

/// A decoded payload together with its bookkeeping columns
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub key: String,
    pub payload: T,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
    pub approx_size_bytes: usize,
}

impl<T> CacheEntry<T> {
    #[inline]
    pub fn expires_at(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub embeddings: u64,
    pub documents: u64,
    pub vector_index: u64,
    pub search_results: u64,
    pub total_size_bytes: u64,
}

impl CacheStats {
    #[inline]
    pub const fn count(&self, namespace: Namespace) -> u64 {
        match namespace {
            Namespace::Embeddings => self.embeddings,
            Namespace::Documents => self.documents,
            Namespace::VectorIndex => self.vector_index,
            Namespace::SearchResults => self.search_results,
        }
    }

    #[inline]
    pub const fn total_entries(&self) -> u64 {
        self.embeddings + self.documents + self.vector_index + self.search_results
    }

    const fn slot_mut(&mut self, namespace: Namespace) -> &mut u64 {
        match namespace {
            Namespace::Embeddings => &mut self.embeddings,
            Namespace::Documents => &mut self.documents,
            Namespace::VectorIndex => &mut self.vector_index,
            Namespace::SearchResults => &mut self.search_results,
        }
    }
}

/// Persistent namespaced cache with per-entry expiry.
///
/// Reads never fail: a slow, broken or expired entry is reported as a miss.
/// Writes surface [`RagError::CacheUnavailable`] and leave it to the caller to
/// decide whether a lost write matters.
#[derive(Debug, Clone)]
pub struct CacheStore {
    pool: CachePool,
    settings: CacheSettings,
}

impl CacheStore {
    #[inline]
    pub async fn open<P: AsRef<Path>>(path: P, settings: CacheSettings) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_FILE_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| {
                RagError::CacheUnavailable(format!(
                    "Failed to open cache at {}: {e}",
                    path.display()
                ))
            })?;

        let store = Self { pool, settings };
        store.run_migrations().await?;
        info!("Opened cache at {}", path.display());
        Ok(store)
    }

    /// A private cache that lives as long as the store
    #[inline]
    pub async fn in_memory(settings: CacheSettings) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| RagError::CacheUnavailable(format!("Invalid in-memory options: {e}")))?;

        // Every connection to :memory: is its own database, so keep exactly one alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| RagError::CacheUnavailable(format!("Failed to open in-memory cache: {e}")))?;

        let store = Self { pool, settings };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        debug!("Running cache migrations");

        sqlx::migrate!("src/cache/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RagError::CacheUnavailable(format!("Failed to run cache migration: {e}")))?;

        Ok(())
    }

    #[inline]
    pub const fn pool(&self) -> &CachePool {
        &self.pool
    }

    #[inline]
    pub const fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    #[inline]
    pub async fn get<T: DeserializeOwned>(&self, namespace: Namespace, key: &str) -> Option<T> {
        self.get_entry(namespace, key)
            .await
            .map(|entry| entry.payload)
    }

    #[inline]
    pub async fn get_entry<T: DeserializeOwned>(
        &self,
        namespace: Namespace,
        key: &str,
    ) -> Option<CacheEntry<T>> {
        let query = sqlx::query_as::<_, (String, i64, i64, i64)>(
            "SELECT payload, created_at, ttl_ms, size_bytes FROM cache_entries WHERE namespace = ? AND key = ?",
        )
        .bind(namespace.as_str())
        .bind(key)
        .fetch_optional(&self.pool);

        let row = match tokio::time::timeout(self.settings.read_timeout(), query).await {
            Ok(Ok(row)) => row?,
            Ok(Err(e)) => {
                warn!("Cache read failed for {}/{}: {}", namespace, key, e);
                return None;
            }
            Err(_) => {
                warn!(
                    "Cache read for {}/{} exceeded {:?}, treating as miss",
                    namespace,
                    key,
                    self.settings.read_timeout()
                );
                return None;
            }
        };

        let (payload, created_at_ms, ttl_ms, size_bytes) = row;
        if Utc::now().timestamp_millis().saturating_sub(created_at_ms) > ttl_ms {
            debug!("Cache entry {}/{} expired", namespace, key);
            self.delete_quietly(namespace, key).await;
            return None;
        }

        match serde_json::from_str(&payload) {
            Ok(payload) => Some(CacheEntry {
                key: key.to_string(),
                payload,
                created_at: DateTime::from_timestamp_millis(created_at_ms).unwrap_or_default(),
                ttl: Duration::from_millis(u64::try_from(ttl_ms).unwrap_or_default()),
                approx_size_bytes: usize::try_from(size_bytes).unwrap_or_default(),
            }),
            Err(e) => {
                warn!(
                    "Discarding undecodable cache entry {}/{}: {}",
                    namespace, key, e
                );
                self.delete_quietly(namespace, key).await;
                None
            }
        }
    }

    #[inline]
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        namespace: Namespace,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let payload = serde_json::to_string(value).map_err(|e| {
            RagError::CacheUnavailable(format!("Failed to encode {namespace}/{key}: {e}"))
        })?;
        let size_bytes = i64::try_from(payload.len()).unwrap_or(i64::MAX);
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        sqlx::query(
            r#"
            INSERT INTO cache_entries (namespace, key, payload, created_at, ttl_ms, size_bytes)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(namespace, key) DO UPDATE SET
                payload = excluded.payload,
                created_at = excluded.created_at,
                ttl_ms = excluded.ttl_ms,
                size_bytes = excluded.size_bytes
            "#,
        )
        .bind(namespace.as_str())
        .bind(key)
        .bind(&payload)
        .bind(Utc::now().timestamp_millis())
        .bind(ttl_ms)
        .bind(size_bytes)
        .execute(&self.pool)
        .await
        .map_err(|e| RagError::CacheUnavailable(format!("Failed to write {namespace}/{key}: {e}")))?;

        debug!("Cached {}/{} ({} bytes)", namespace, key, size_bytes);
        Ok(())
    }

    /// Store with the configured time-to-live for the namespace
    #[inline]
    pub async fn set_default<T: Serialize + ?Sized>(
        &self,
        namespace: Namespace,
        key: &str,
        value: &T,
    ) -> Result<()> {
        self.set(namespace, key, value, self.settings.ttl_for(namespace))
            .await
    }

    #[inline]
    pub async fn delete(&self, namespace: Namespace, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE namespace = ? AND key = ?")
            .bind(namespace.as_str())
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                RagError::CacheUnavailable(format!("Failed to delete {namespace}/{key}: {e}"))
            })?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_quietly(&self, namespace: Namespace, key: &str) {
        if let Err(e) = self.delete(namespace, key).await {
            warn!("{}", e);
        }
    }

    #[inline]
    pub async fn clear_namespace(&self, namespace: Namespace) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE namespace = ?")
            .bind(namespace.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| RagError::CacheUnavailable(format!("Failed to clear {namespace}: {e}")))?;

        info!("Cleared {} entries from {}", result.rows_affected(), namespace);
        Ok(result.rows_affected())
    }

    #[inline]
    pub async fn clear_all(&self) -> Result<u64> {
        let mut removed = 0;
        for namespace in Namespace::ALL {
            removed += self.clear_namespace(namespace).await?;
        }
        Ok(removed)
    }

    #[inline]
    pub async fn stats(&self) -> Result<CacheStats> {
        let rows = sqlx::query_as::<_, (String, i64, i64)>(
            "SELECT namespace, COUNT(*), COALESCE(SUM(size_bytes), 0) FROM cache_entries GROUP BY namespace",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RagError::CacheUnavailable(format!("Failed to read cache stats: {e}")))?;

        let mut stats = CacheStats::default();
        for (namespace, count, size_bytes) in rows {
            let Ok(namespace) = namespace.parse::<Namespace>() else {
                warn!("Ignoring rows in unknown cache namespace {}", namespace);
                continue;
            };
            *stats.slot_mut(namespace) = u64::try_from(count).unwrap_or_default();
            stats.total_size_bytes += u64::try_from(size_bytes).unwrap_or_default();
        }

        Ok(stats)
    }

    /// Drop every expired entry in every namespace
    #[inline]
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE ? - created_at > ttl_ms")
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| RagError::CacheUnavailable(format!("Failed to purge expired entries: {e}")))?;

        Ok(result.rows_affected())
    }

    /// Run [`Self::cleanup_expired`] every `interval` until the handle is aborted
    #[inline]
    pub fn spawn_maintenance(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.cleanup_expired().await {
                    Ok(0) => debug!("Cache maintenance found nothing to purge"),
                    Ok(removed) => info!("Cache maintenance purged {} expired entries", removed),
                    Err(e) => warn!("Cache maintenance failed: {}", e),
                }
            }
        })
    }

    #[inline]
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Stable cache key over several parts.
///
/// Each part is length-prefixed so `["ab", "c"]` and `["a", "bc"]` differ.
#[inline]
pub fn cache_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[inline]
pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
