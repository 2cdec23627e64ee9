//! TTL cache of resolved boundaries keyed by fingerprint.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::domain::{BoundaryResult, Fingerprint};
use crate::error::CacheError;

/// Stored value plus its expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: BoundaryResult,
    pub expires_at: Instant,
}

impl CacheEntry {
    /// Live while `now < expires_at`.
    pub fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CacheError>> + Send + 'a>>;

/// Storage behind [`BoundaryCache`]. At most one entry per fingerprint.
pub trait CacheBackend: Send + Sync {
    /// Returns the entry even when expired; expiry is judged by the caller.
    fn get<'a>(&'a self, key: &'a Fingerprint) -> CacheFuture<'a, Option<CacheEntry>>;

    /// Inserts or replaces the entry for `key`.
    fn put(&self, key: Fingerprint, entry: CacheEntry) -> CacheFuture<'_, ()>;

    fn remove<'a>(&'a self, key: &'a Fingerprint) -> CacheFuture<'a, bool>;

    /// Removes every entry with `expires_at <= now`, returning how many were removed.
    fn sweep(&self, now: Instant) -> CacheFuture<'_, usize>;

    fn clear(&self) -> CacheFuture<'_, ()>;

    fn len(&self) -> CacheFuture<'_, usize>;
}

/// Default in-process backend with an optional entry bound.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: tokio::sync::RwLock<HashMap<Fingerprint, CacheEntry>>,
    max_entries: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// When full, inserting a new key evicts the entry that expires soonest.
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            entries: tokio::sync::RwLock::default(),
            max_entries: Some(max_entries.max(1)),
        }
    }
}

impl CacheBackend for MemoryBackend {
    fn get<'a>(&'a self, key: &'a Fingerprint) -> CacheFuture<'a, Option<CacheEntry>> {
        Box::pin(async move { Ok(self.entries.read().await.get(key).cloned()) })
    }

    fn put(&self, key: Fingerprint, entry: CacheEntry) -> CacheFuture<'_, ()> {
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            if let Some(max_entries) = self.max_entries {
                if !entries.contains_key(&key) && entries.len() >= max_entries {
                    let soonest = entries
                        .iter()
                        .min_by_key(|(_, entry)| entry.expires_at)
                        .map(|(key, _)| key.clone());
                    if let Some(evicted) = soonest {
                        debug!(fingerprint = evicted.short(), "evicting cache entry at capacity");
                        entries.remove(&evicted);
                    }
                }
            }
            entries.insert(key, entry);
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a Fingerprint) -> CacheFuture<'a, bool> {
        Box::pin(async move { Ok(self.entries.write().await.remove(key).is_some()) })
    }

    fn sweep(&self, now: Instant) -> CacheFuture<'_, usize> {
        Box::pin(async move {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|_, entry| entry.is_live(now));
            Ok(before - entries.len())
        })
    }

    fn clear(&self) -> CacheFuture<'_, ()> {
        Box::pin(async move {
            self.entries.write().await.clear();
            Ok(())
        })
    }

    fn len(&self) -> CacheFuture<'_, usize> {
        Box::pin(async move { Ok(self.entries.read().await.len()) })
    }
}

/// Cache counters for health snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, zero before the first lookup.
    pub hit_rate: f64,
}

/// Cache layer used by the façade and the queue worker.
///
/// Backend failures never surface: reads degrade to misses and writes to no-ops.
#[derive(Clone)]
pub struct BoundaryCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl std::fmt::Debug for BoundaryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundaryCache")
            .field("ttl", &self.ttl)
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish()
    }
}

impl BoundaryCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        let backend: Arc<dyn CacheBackend> = match config.max_entries {
            Some(max_entries) => Arc::new(MemoryBackend::with_max_entries(max_entries)),
            None => Arc::new(MemoryBackend::new()),
        };
        Self::new(backend, config.ttl())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live entry for `key`, counted as a hit or a miss.
    pub async fn get(&self, key: &Fingerprint) -> Option<BoundaryResult> {
        let now = Instant::now();
        let found = match self.backend.get(key).await {
            Ok(entry) => entry.filter(|entry| entry.is_live(now)).map(|entry| entry.value),
            Err(error) => {
                warn!(fingerprint = key.short(), error = %error, "cache read failed, treating as miss");
                None
            }
        };

        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Entry for `key` even if expired, as long as it has not been swept.
    pub async fn get_stale(&self, key: &Fingerprint) -> Option<BoundaryResult> {
        match self.backend.get(key).await {
            Ok(entry) => entry.map(|entry| entry.value),
            Err(error) => {
                warn!(fingerprint = key.short(), error = %error, "stale cache read failed");
                None
            }
        }
    }

    pub async fn put(&self, key: Fingerprint, value: BoundaryResult) {
        self.put_with_ttl(key, value, self.ttl).await;
    }

    pub async fn put_with_ttl(&self, key: Fingerprint, value: BoundaryResult, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        let short = key.short().to_owned();
        if let Err(error) = self.backend.put(key, entry).await {
            warn!(fingerprint = %short, error = %error, "cache write failed, result not cached");
        }
    }

    pub async fn invalidate(&self, key: &Fingerprint) -> bool {
        self.backend.remove(key).await.unwrap_or_else(|error| {
            warn!(fingerprint = key.short(), error = %error, "cache invalidation failed");
            false
        })
    }

    /// Removes every expired entry.
    pub async fn sweep(&self) -> usize {
        match self.backend.sweep(Instant::now()).await {
            Ok(removed) => {
                if removed > 0 {
                    debug!(removed, "swept expired cache entries");
                }
                removed
            }
            Err(error) => {
                warn!(error = %error, "cache sweep failed");
                0
            }
        }
    }

    pub async fn clear(&self) {
        if let Err(error) = self.backend.clear().await {
            warn!(error = %error, "cache clear failed");
        }
    }

    pub async fn len(&self) -> usize {
        self.backend.len().await.unwrap_or_else(|error| {
            warn!(error = %error, "cache size lookup failed");
            0
        })
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            entries: self.len().await,
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}
