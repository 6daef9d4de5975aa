//! Content-addressed result cache with expiry.
//!
//! Records live in a `BlobStore`, one blob per `JobKey` digest, each blob
//! carrying its own creation time so metadata and payload are always written
//! together. An in-memory index (digest -> created_at) tracks the entries
//! this instance has seen, but the stored record stays authoritative because
//! other caches may share the same store. Storage failures never escape: they
//! are logged and treated as a miss.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::store::BlobStore;
use crate::domain::{JobError, JobKey, JobResult, KeyDescriptor};

/// Default freshness window (24 hours)
pub const DEFAULT_CACHE_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// A persisted cache entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Hex digest the record is stored under
    pub key: String,

    /// Inputs the digest was computed from
    pub descriptor: KeyDescriptor,

    pub result: JobResult,

    pub created_at: DateTime<Utc>,
}

impl CacheRecord {
    fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        is_fresh(self.created_at, now, ttl)
    }
}

fn is_fresh(created_at: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
    match (now - created_at).to_std() {
        Ok(age) => age < ttl,
        // Created "in the future" (clock skew): not expired
        Err(_) => true,
    }
}

/// Counters from a sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned: usize,
    pub evicted: usize,
    pub errors: usize,
}

/// Snapshot of cache contents
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub expired: usize,
    pub unreadable: usize,
}

/// Result cache over a durable blob store
pub struct ResultCache {
    store: Arc<dyn BlobStore>,
    ttl: Duration,
    index: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("ttl", &self.ttl)
            .field("indexed", &self.index().len())
            .finish()
    }
}

impl ResultCache {
    pub fn new(store: Arc<dyn BlobStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            index: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn index(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached result for `key` if present and fresh.
    ///
    /// Expired entries are evicted as a side effect. Freshness is decided by
    /// the stored record's own `created_at`.
    pub async fn lookup(&self, key: &JobKey) -> Option<JobResult> {
        let now = Utc::now();
        let indexed = self.index().get(key.as_str()).copied();

        // Another cache over the same store may have replaced the entry, so
        // an expired index entry only means the record must be re-checked
        if let Some(created_at) = indexed {
            if !is_fresh(created_at, now, self.ttl) {
                debug!(key = key.short(), "Indexed entry expired, re-reading record");
            }
        }

        let record = self.read_record(key.as_str()).await?;

        if record.descriptor != *key.descriptor() {
            error!(
                key = key.short(),
                stored_target = %record.descriptor.target,
                requested_target = %key.descriptor().target,
                "Cache key collision, ignoring stored entry"
            );
            return None;
        }

        if !record.is_fresh(now, self.ttl) {
            debug!(key = key.short(), "Cache entry expired");
            self.evict(key.as_str()).await;
            return None;
        }

        self.index()
            .insert(key.as_str().to_string(), record.created_at);
        debug!(key = key.short(), target = %record.descriptor.target, "Cache hit");

        Some(record.result)
    }

    /// Persist `result` under `key`, replacing any previous entry.
    ///
    /// Returns whether the write reached durable storage.
    pub async fn store(&self, key: &JobKey, result: &JobResult) -> bool {
        let record = CacheRecord {
            key: key.as_str().to_string(),
            descriptor: key.descriptor().clone(),
            result: result.clone(),
            created_at: Utc::now(),
        };

        let blob = match serde_json::to_vec(&record) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(key = key.short(), error = %e, "Failed to encode cache record");
                return false;
            }
        };

        match self.store.write(key.as_str(), &blob).await {
            Ok(()) => {
                self.index()
                    .insert(key.as_str().to_string(), record.created_at);
                debug!(key = key.short(), "Stored result in cache");
                true
            }
            Err(e) => {
                let err = JobError::CacheIo(e.to_string());
                warn!(key = key.short(), error = %err, "Cache write failed, continuing without it");
                false
            }
        }
    }

    /// Evict every expired or unreadable entry in the backing store
    pub async fn sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();
        let now = Utc::now();

        let keys = match self.store.list().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Cache sweep could not list entries");
                stats.errors += 1;
                return stats;
            }
        };

        for key in keys {
            stats.scanned += 1;

            let blob = match self.store.read(&key).await {
                Ok(Some(blob)) => blob,
                // Deleted concurrently
                Ok(None) => continue,
                Err(e) => {
                    warn!(%key, error = %e, "Cache sweep could not read entry");
                    stats.errors += 1;
                    continue;
                }
            };

            let expired = match serde_json::from_slice::<CacheRecord>(&blob) {
                Ok(record) => !record.is_fresh(now, self.ttl),
                Err(e) => {
                    warn!(%key, error = %e, "Evicting unreadable cache entry");
                    true
                }
            };

            if expired {
                if self.evict(&key).await {
                    stats.evicted += 1;
                } else {
                    stats.errors += 1;
                }
            }
        }

        debug!(
            scanned = stats.scanned,
            evicted = stats.evicted,
            errors = stats.errors,
            "Cache sweep finished"
        );
        stats
    }

    /// Delete every entry; returns how many were removed
    pub async fn clear(&self) -> usize {
        let keys = match self.store.list().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Cache clear could not list entries");
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys {
            if self.evict(&key).await {
                removed += 1;
            }
        }

        self.index().clear();
        removed
    }

    /// Count entries without modifying anything
    pub async fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        let now = Utc::now();

        let keys = match self.store.list().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Cache stats could not list entries");
                return stats;
            }
        };

        for key in keys {
            match self.store.read(&key).await {
                Ok(Some(blob)) => match serde_json::from_slice::<CacheRecord>(&blob) {
                    Ok(record) => {
                        stats.entries += 1;
                        if !record.is_fresh(now, self.ttl) {
                            stats.expired += 1;
                        }
                    }
                    Err(_) => stats.unreadable += 1,
                },
                Ok(None) => {}
                Err(_) => stats.unreadable += 1,
            }
        }

        stats
    }

    async fn read_record(&self, key: &str) -> Option<CacheRecord> {
        let blob = match self.store.read(key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return None,
            Err(e) => {
                let err = JobError::CacheIo(e.to_string());
                warn!(%key, error = %err, "Cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_slice::<CacheRecord>(&blob) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(%key, error = %e, "Unreadable cache entry, evicting");
                self.evict(key).await;
                None
            }
        }
    }

    /// Remove an entry from storage and index; returns whether storage agreed
    async fn evict(&self, key: &str) -> bool {
        self.index().remove(key);

        match self.store.delete(key).await {
            Ok(_) => true,
            Err(e) => {
                warn!(%key, error = %e, "Failed to evict cache entry");
                false
            }
        }
    }
}
