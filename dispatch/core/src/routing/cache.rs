//! Response Cache
//!
//! Time-bounded store of completed responses keyed by a request fingerprint.
//!
//! # Fingerprint
//!
//! SHA-256 over `prompt|task|complexity|max_tokens|temperature` with the
//! temperature formatted to two decimals, hex encoded. Privacy flag and
//! metadata are excluded: they do not change what is being asked.
//!
//! # Expiry
//!
//! ```text
//!   set(t0) ──────── hit ──────── t0 + ttl ──── miss (lazily purged)
//!                                     │
//!                       sweeper ──────┴── purge_expired() every interval
//! ```
//!
//! Cache operations never fail. A miss is simply "go compute".

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::backend::{CompletionRequest, CompletionResponse};

use super::config::CacheConfig;

/// Compute the cache key for a request
#[must_use]
pub fn fingerprint(request: &CompletionRequest) -> String {
    let material = format!(
        "{}|{}|{}|{}|{:.2}",
        request.prompt,
        request.task_type.as_str(),
        request.complexity.as_str(),
        request.max_tokens,
        request.temperature
    );
    hex::encode(Sha256::digest(material.as_bytes()))
}

// ============================================================================
// Cache Trait
// ============================================================================

/// A store of previously computed responses
///
/// Implementations must be safe to share between concurrent requests and
/// must never block on anything slower than their own lock.
pub trait CompletionCache: Send + Sync {
    /// Look up a live entry; the returned copy has `cached_result` set
    fn get(&self, request: &CompletionRequest) -> Option<CompletionResponse>;

    /// Store (or overwrite) the response for a request
    fn set(&self, request: &CompletionRequest, response: &CompletionResponse);

    /// Drop the entry for a request, returning whether one existed
    fn remove(&self, request: &CompletionRequest) -> bool;

    /// Drop every entry
    fn clear(&self);

    /// Number of stored entries, expired ones included until purged
    fn len(&self) -> usize;

    /// Whether the store is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// In-Memory Cache
// ============================================================================

struct CacheEntry {
    response: CompletionResponse,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Cache counters
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CacheStats {
    /// Stored entries
    pub entries: usize,
    /// Lookups that returned a value
    pub hits: u64,
    /// Lookups that did not
    pub misses: u64,
    /// `hits / (hits + misses)`, 0 before any lookup
    pub hit_rate: f64,
    /// When the last sweep ran
    pub last_sweep: Option<DateTime<Utc>>,
}

/// Process-local TTL cache
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    last_sweep: RwLock<Option<DateTime<Utc>>>,
}

impl InMemoryCache {
    /// Create a cache without a background sweeper
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            last_sweep: RwLock::new(None),
        }
    }

    /// Create a cache and start its sweeper
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Arc<Self> {
        let cache = Arc::new(Self::new(config.ttl()));
        // Detached; exits on its own once the cache is dropped
        drop(cache.spawn_sweeper(config.sweep_interval()));
        cache
    }

    /// Entry lifetime
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let removed = {
            let mut entries = self.entries.write();
            let before = entries.len();
            entries.retain(|_, entry| entry.is_live(now));
            before - entries.len()
        };
        *self.last_sweep.write() = Some(Utc::now());
        removed
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64
        };

        CacheStats {
            entries: self.entries.read().len(),
            hits,
            misses,
            hit_rate,
            last_sweep: *self.last_sweep.read(),
        }
    }

    /// Start a task that purges expired entries every `interval`
    ///
    /// The task holds only a weak reference and exits once the cache is
    /// dropped. Must be called from within a tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        info!(interval_secs = interval.as_secs(), "Cache sweeper started");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    debug!("Cache dropped, sweeper exiting");
                    break;
                };
                let removed = cache.purge_expired();
                if removed > 0 {
                    debug!(removed, "Swept expired cache entries");
                }
            }
        })
    }
}

impl CompletionCache for InMemoryCache {
    fn get(&self, request: &CompletionRequest) -> Option<CompletionResponse> {
        let key = fingerprint(request);
        let now = Instant::now();

        let expired = {
            let entries = self.entries.read();
            match entries.get(&key) {
                Some(entry) if entry.is_live(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    let mut response = entry.response.clone();
                    response.cached_result = true;
                    return Some(response);
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            let mut entries = self.entries.write();
            // Another writer may have refreshed the key in between
            if entries.get(&key).is_some_and(|entry| !entry.is_live(now)) {
                entries.remove(&key);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn set(&self, request: &CompletionRequest, response: &CompletionResponse) {
        let mut stored = response.clone();
        stored.cached_result = false;

        let entry = CacheEntry {
            response: stored,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.write().insert(fingerprint(request), entry);
    }

    fn remove(&self, request: &CompletionRequest) -> bool {
        self.entries.write().remove(&fingerprint(request)).is_some()
    }

    fn clear(&self) {
        self.entries.write().clear();
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}
