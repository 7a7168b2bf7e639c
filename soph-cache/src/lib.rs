//! A TTL cache with scheduled expiry sweeps.
//!
//! Entries expire `ttl` after insertion. Reads of an expired entry miss
//! immediately; a background sweeper additionally reclaims expired entries
//! every `cleanup_interval` so the map does not grow unbounded under
//! write-heavy, read-light workloads.
//!
//! The sweeper holds only a [`Weak`] reference to the map: when the last
//! cache handle is dropped the next tick observes a dead upgrade and the
//! task terminates. Owners that want deterministic shutdown call
//! [`TtlCache::close`], which is what the entity services do.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

struct Shared<V> {
    map: RwLock<HashMap<String, Entry<V>>>,
    ttl: Duration,
}

/// A clonable handle to a TTL cache. All clones share one map and one
/// sweeper.
pub struct TtlCache<V> {
    shared: Arc<Shared<V>>,
    sweeper: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            sweeper: Arc::clone(&self.sweeper),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    /// Create a cache and start its sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(ttl: Duration, cleanup_interval: Duration) -> Self {
        let shared = Arc::new(Shared {
            map: RwLock::new(HashMap::new()),
            ttl,
        });

        let weak = Arc::downgrade(&shared);
        let handle = tokio::spawn(sweep_loop(weak, cleanup_interval));

        Self {
            shared,
            sweeper: Arc::new(Mutex::new(Some(handle))),
        }
    }

    /// Get a value if present and not expired. Expired entries miss even
    /// before the sweeper reclaims them.
    pub async fn get(&self, key: &str) -> Option<V> {
        let map = self.shared.map.read().await;
        map.get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    /// Insert or replace a value, stamping its expiry at `now + ttl`.
    pub async fn set(&self, key: impl Into<String>, value: V) {
        let entry = Entry {
            value,
            expires_at: Instant::now() + self.shared.ttl,
        };
        self.shared.map.write().await.insert(key.into(), entry);
    }

    /// Remove an entry.
    pub async fn delete(&self, key: &str) {
        self.shared.map.write().await.remove(key);
    }

    /// Number of live (unexpired) entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let map = self.shared.map.read().await;
        map.values().filter(|e| e.expires_at > now).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop the sweeper. Idempotent; entries remain readable and continue
    /// to honour their TTL on access.
    pub fn close(&self) {
        if let Ok(mut guard) = self.sweeper.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

/// One sweep pass per tick: take the write lock once, drop every expired
/// entry, release. Readers wait for at most one pass.
async fn sweep_loop<V: Send + Sync + 'static>(
    shared: Weak<Shared<V>>,
    cleanup_interval: Duration,
) {
    let mut ticker = tokio::time::interval(cleanup_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick of a tokio interval fires immediately; skip it so the
    // first sweep happens one full interval after construction.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let now = Instant::now();
        let mut map = shared.map.write().await;
        let before = map.len();
        map.retain(|_, entry| entry.expires_at > now);
        let swept = before - map.len();
        if swept > 0 {
            tracing::trace!(swept, remaining = map.len(), "cache sweep");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_entries_miss_before_sweep() {
        let cache = TtlCache::new(Duration::from_millis(20), Duration::from_secs(3600));
        cache.set("k", 1u32).await;
        assert_eq!(cache.get("k").await, Some(1));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k").await, None);
        cache.close();
    }

    #[tokio::test]
    async fn sweeper_reclaims_expired_entries() {
        let cache = TtlCache::new(Duration::from_millis(10), Duration::from_millis(20));
        cache.set("a", 1u32).await;
        cache.set("b", 2u32).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        // The sweep removed the entries outright, not just hid them.
        assert_eq!(cache.shared.map.read().await.len(), 0);
        cache.close();
    }

    #[tokio::test]
    async fn sweeper_stops_when_handles_drop() {
        let cache: TtlCache<u32> =
            TtlCache::new(Duration::from_millis(10), Duration::from_millis(10));
        let weak = Arc::downgrade(&cache.shared);
        drop(cache);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(weak.upgrade().is_none());
    }
}
