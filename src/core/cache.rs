//! Resolution cache with in-flight de-duplication.
//!
//! Keys are normalized identifiers (see `MediaIdentifier::cache_key`). Values
//! are either a resolved stream or an explicit "not found" marker; negative
//! entries live shorter than positive ones so newly published trailers are
//! picked up quickly.
//!
//! `get_or_compute` runs at most one computation per key at a time. Callers
//! arriving while it runs join it and receive the same result. The in-flight
//! table only holds a weak handle: once every caller has gone away the
//! computation is dropped, which aborts its extraction attempts.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{ResolveError, ResolvedStream};

type Computation = Shared<BoxFuture<'static, Result<CacheValue, ResolveError>>>;

/// Cache TTLs and bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL of resolved streams (default: 6h)
    #[serde(default = "default_positive_ttl")]
    pub positive_ttl_seconds: u64,

    /// TTL of "not found" markers (default: 30 min)
    #[serde(default = "default_negative_ttl")]
    pub negative_ttl_seconds: u64,

    /// Optional LRU bound on the number of entries
    #[serde(default)]
    pub max_entries: Option<usize>,

    /// How often expired entries are swept (default: 60s)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

fn default_positive_ttl() -> u64 {
    6 * 60 * 60
}
fn default_negative_ttl() -> u64 {
    30 * 60
}
fn default_sweep_interval() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            positive_ttl_seconds: default_positive_ttl(),
            negative_ttl_seconds: default_negative_ttl(),
            max_entries: None,
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.negative_ttl_seconds == 0 {
            anyhow::bail!("negative_ttl_seconds must be greater than zero");
        }
        if self.negative_ttl_seconds >= self.positive_ttl_seconds {
            anyhow::bail!(
                "negative_ttl_seconds ({}) must be below positive_ttl_seconds ({})",
                self.negative_ttl_seconds,
                self.positive_ttl_seconds
            );
        }
        if self.max_entries == Some(0) {
            anyhow::bail!("max_entries must be greater than zero when set");
        }
        Ok(())
    }

    pub fn positive_ttl(&self) -> Duration {
        Duration::from_secs(self.positive_ttl_seconds)
    }

    pub fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}

/// Cached outcome of a resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    Found(ResolvedStream),
    NotFound,
}

impl CacheValue {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Point-in-time view of one entry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: CacheValue,
    pub inserted_at: Instant,
    pub expires_at: Instant,
    pub hits: u64,
}

impl CacheEntry {
    pub fn ttl_remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

#[derive(Debug)]
struct StoredEntry {
    value: CacheValue,
    inserted_at: Instant,
    expires_at: Instant,
    last_access: Instant,
    hits: u64,
}

struct InFlight {
    generation: u64,
    computation: WeakShared<BoxFuture<'static, Result<CacheValue, ResolveError>>>,
}

/// Counters exposed through the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
    pub joins: u64,
    pub computations: u64,
    pub evictions: u64,
    /// hits / (hits + misses + joins)
    pub hit_rate: f64,
}

struct CacheInner {
    positive_ttl: Duration,
    negative_ttl: Duration,
    max_entries: Option<usize>,
    entries: DashMap<String, StoredEntry>,
    in_flight: DashMap<String, InFlight>,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    joins: AtomicU64,
    computations: AtomicU64,
    evictions: AtomicU64,
}

enum Lookup {
    Hit(CacheValue),
    Wait { computation: Computation, joined: bool },
}

/// Shared resolution cache; clones share the same table
#[derive(Clone)]
pub struct ResolutionCache {
    inner: Arc<CacheInner>,
}

impl ResolutionCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_ttls(config.positive_ttl(), config.negative_ttl(), config.max_entries)
    }

    pub fn with_ttls(
        positive_ttl: Duration,
        negative_ttl: Duration,
        max_entries: Option<usize>,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                positive_ttl,
                negative_ttl,
                max_entries,
                entries: DashMap::new(),
                in_flight: DashMap::new(),
                generation: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                joins: AtomicU64::new(0),
                computations: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
            }),
        }
    }

    /// Live entry for `key`; expired entries are never returned
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.inner.lookup(key, Instant::now())
    }

    /// Insert a value directly, stamping its expiry
    pub fn insert(&self, key: &str, value: CacheValue) -> CacheValue {
        self.inner.store(key, value)
    }

    /// Return the cached value or run `compute` once for all concurrent callers.
    ///
    /// Errors are handed to every joined caller but never cached.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        compute: F,
    ) -> Result<CacheValue, ResolveError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheValue, ResolveError>> + Send + 'static,
    {
        match self.join_or_start(key, compute) {
            Lookup::Hit(value) => {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Cache hit");
                Ok(value)
            }
            Lookup::Wait {
                computation,
                joined,
            } => {
                if joined {
                    self.inner.joins.fetch_add(1, Ordering::Relaxed);
                    debug!(key, "Joining in-flight resolution");
                } else {
                    self.inner.misses.fetch_add(1, Ordering::Relaxed);
                    debug!(key, "Cache miss, resolving");
                }
                computation.await
            }
        }
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.inner.entries.len();
        self.inner.entries.retain(|_, e| e.expires_at > now);
        let removed = before.saturating_sub(self.inner.entries.len());
        // Computations whose callers all gave up
        self.inner
            .in_flight
            .retain(|_, flight| flight.computation.upgrade().is_some());
        if removed > 0 {
            info!(removed, remaining = self.inner.entries.len(), "Purged expired cache entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.inner.hits.load(Ordering::Relaxed);
        let misses = self.inner.misses.load(Ordering::Relaxed);
        let joins = self.inner.joins.load(Ordering::Relaxed);
        let lookups = hits + misses + joins;
        CacheStats {
            entries: self.inner.entries.len(),
            in_flight: self
                .inner
                .in_flight
                .iter()
                .filter(|flight| flight.computation.upgrade().is_some())
                .count(),
            hits,
            misses,
            joins,
            computations: self.inner.computations.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }

    fn join_or_start<F, Fut>(&self, key: &str, compute: F) -> Lookup
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheValue, ResolveError>> + Send + 'static,
    {
        if let Some(entry) = self.inner.lookup(key, Instant::now()) {
            return Lookup::Hit(entry.value);
        }

        match self.inner.in_flight.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if let Some(computation) = occupied.get().computation.upgrade() {
                    return Lookup::Wait {
                        computation,
                        joined: true,
                    };
                }

                // Every caller of the previous computation gave up
                let (generation, computation) = self.start(key, compute);
                match computation.downgrade() {
                    Some(weak) => {
                        occupied.insert(InFlight {
                            generation,
                            computation: weak,
                        });
                    }
                    None => {
                        occupied.remove();
                    }
                }
                Lookup::Wait {
                    computation,
                    joined: false,
                }
            }
            Entry::Vacant(vacant) => {
                // A computation may have finished between the first lookup and here
                if let Some(entry) = self.inner.lookup(key, Instant::now()) {
                    return Lookup::Hit(entry.value);
                }

                let (generation, computation) = self.start(key, compute);
                if let Some(weak) = computation.downgrade() {
                    vacant.insert(InFlight {
                        generation,
                        computation: weak,
                    });
                }
                Lookup::Wait {
                    computation,
                    joined: false,
                }
            }
        }
    }

    fn start<F, Fut>(&self, key: &str, compute: F) -> (u64, Computation)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheValue, ResolveError>> + Send + 'static,
    {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        let work = compute();

        let computation = async move {
            inner.computations.fetch_add(1, Ordering::Relaxed);
            let result = work.await.map(|value| inner.store(&key, value));
            inner
                .in_flight
                .remove_if(&key, |_, flight| flight.generation == generation);
            result
        }
        .boxed()
        .shared();

        (generation, computation)
    }
}

impl CacheInner {
    fn lookup(&self, key: &str, now: Instant) -> Option<CacheEntry> {
        {
            let mut entry = self.entries.get_mut(key)?;
            if entry.expires_at > now {
                entry.hits += 1;
                entry.last_access = now;
                return Some(CacheEntry {
                    key: key.to_string(),
                    value: entry.value.clone(),
                    inserted_at: entry.inserted_at,
                    expires_at: entry.expires_at,
                    hits: entry.hits,
                });
            }
        }

        self.entries.remove_if(key, |_, e| e.expires_at <= now);
        None
    }

    fn store(&self, key: &str, value: CacheValue) -> CacheValue {
        let now = Instant::now();
        let ttl = match value {
            CacheValue::Found(_) => self.positive_ttl,
            CacheValue::NotFound => self.negative_ttl,
        };

        let value = match value {
            CacheValue::Found(mut stream) => {
                stream.expires_at = chrono::Duration::from_std(ttl)
                    .ok()
                    .map(|ttl| Utc::now() + ttl);
                CacheValue::Found(stream)
            }
            CacheValue::NotFound => CacheValue::NotFound,
        };

        self.entries.insert(
            key.to_string(),
            StoredEntry {
                value: value.clone(),
                inserted_at: now,
                expires_at: now + ttl,
                last_access: now,
                hits: 0,
            },
        );
        debug!(key, found = value.is_found(), ttl_secs = ttl.as_secs(), "Cached resolution");

        if let Some(max) = self.max_entries {
            while self.entries.len() > max {
                if !self.evict_least_recent() {
                    break;
                }
            }
        }

        value
    }

    fn evict_least_recent(&self) -> bool {
        let victim = self
            .entries
            .iter()
            .min_by_key(|e| e.value().last_access)
            .map(|e| e.key().clone());

        match victim {
            Some(key) => {
                self.entries.remove(&key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Evicted least recently used cache entry");
                true
            }
            None => false,
        }
    }
}
