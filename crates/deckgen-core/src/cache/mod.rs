//! Time-bounded response cache plus single-flight dedup.
//!
//! Entries expire `ttl` after they were stored and are evicted lazily on access
//! and by a periodic sweep. When the capacity is exceeded the oldest entry is
//! dropped. `dedupe` collapses concurrent identical calls into one.

mod flight;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::CacheConfig;
use crate::retry::TaskError;
use crate::util::lock;

pub use flight::{FlightRegistry, SharedCall};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

/// Cache of prior responses keyed by request identity.
pub struct RequestCache<V: Clone> {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    flights: FlightRegistry<V>,
}

impl<V> RequestCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
            flights: FlightRegistry::new(),
        }
    }

    pub fn from_config(cfg: &CacheConfig) -> Self {
        Self::new(Duration::from_millis(cfg.ttl_ms), cfg.max_entries)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_expired(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        now.saturating_duration_since(entry.stored_at) > self.ttl
    }

    /// Live value for `key`, or `None` if absent or expired (expired entries are evicted).
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        let expired = match entries.get(key) {
            Some(entry) if !self.is_expired(entry, now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
            tracing::trace!(key, "evicted expired cache entry");
        }
        None
    }

    /// Store `value` now; drops the single oldest entry if over capacity.
    pub fn set(&self, key: &str, value: V) {
        let mut entries = lock(&self.entries);
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
        if entries.len() > self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.stored_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                tracing::trace!(key = %oldest, "evicted oldest cache entry");
            }
        }
    }

    pub fn invalidate(&self, key: &str) -> bool {
        lock(&self.entries).remove(key).is_some()
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys with a deduplicated call in flight.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Join the in-flight call for `key` or start one via `factory`.
    ///
    /// Every caller gets the same result, error included. The registration is
    /// dropped when the call settles, so nothing is cached here; use `set` for that.
    pub fn dedupe<F, Fut>(&self, key: &str, factory: F) -> SharedCall<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, TaskError>> + Send + 'static,
    {
        self.flights.join_or_start(key, factory)
    }

    /// Evict every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|_, e| now.saturating_duration_since(e.stored_at) <= self.ttl);
        before - entries.len()
    }

    /// Run `sweep_expired` every `period` until `shutdown` is cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = period.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.sweep_expired();
                        if removed > 0 {
                            tracing::debug!(removed, "cache sweep");
                        }
                    }
                }
            }
        })
    }
}
