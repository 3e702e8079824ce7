//! Registry of per-client sliding window counters.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

use super::client::ClientKey;
use super::counter::{SlidingWindowCounter, WindowLimit};

/// Concurrent map from client key to that client's counter.
///
/// The map is sharded; only insertion and removal take a shard's write lock.
/// Admission itself runs under the counter's own lock.
pub struct LimiterRegistry {
    limit: WindowLimit,
    clients: DashMap<ClientKey, Arc<SlidingWindowCounter>>,
}

impl LimiterRegistry {
    /// Create an empty registry whose counters all enforce `limit`.
    pub fn new(limit: WindowLimit) -> Self {
        Self {
            limit,
            clients: DashMap::new(),
        }
    }

    /// Get the limit applied to every client.
    pub fn limit(&self) -> WindowLimit {
        self.limit
    }

    /// Return the counter for `key`, creating it on first sight.
    ///
    /// Concurrent first requests for the same key observe the same counter.
    pub fn get_or_create(&self, key: &str) -> Arc<SlidingWindowCounter> {
        if let Some(counter) = self.clients.get(key) {
            return Arc::clone(counter.value());
        }

        let entry = self.clients.entry(key.to_string()).or_insert_with(|| {
            debug!(
                client = %key,
                max_requests = self.limit.max_requests(),
                window = ?self.limit.window(),
                "Creating new sliding window counter"
            );
            Arc::new(SlidingWindowCounter::new(self.limit))
        });
        Arc::clone(entry.value())
    }

    /// Copy out the current `(key, counter)` pairs.
    ///
    /// No registry lock is held once this returns.
    pub fn snapshot(&self) -> Vec<(ClientKey, Arc<SlidingWindowCounter>)> {
        self.clients
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Remove `key` if its window is fully expired at `now`.
    ///
    /// Staleness is re-checked under the shard lock, so a request that landed
    /// after a sweep's snapshot keeps the entry alive. Returns whether the
    /// entry was removed; a missing key is a no-op.
    pub fn remove_if_stale(&self, key: &str, now: Instant) -> bool {
        self.clients
            .remove_if(key, |_, counter| counter.retire_if_stale(now))
            .is_some()
    }

    /// Evict every client whose window has fully expired at `now`.
    ///
    /// Returns the number of evicted clients.
    pub fn sweep(&self, now: Instant) -> usize {
        let keys: Vec<ClientKey> = self.clients.iter().map(|entry| entry.key().clone()).collect();
        let scanned = keys.len();

        let evicted = keys
            .iter()
            .filter(|key| self.remove_if_stale(key, now))
            .count();

        trace!(scanned, evicted, remaining = self.len(), "Sweep finished");
        evicted
    }

    /// Whether a counter exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.clients.contains_key(key)
    }

    /// Get the number of tracked clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no clients are tracked.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Clear all counters.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.clients.clear();
    }
}

impl std::fmt::Debug for LimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterRegistry")
            .field("limit", &self.limit)
            .field("clients", &self.clients.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::Decision;
    use std::time::Duration;

    fn registry(max_requests: usize, window: Duration) -> LimiterRegistry {
        LimiterRegistry::new(WindowLimit::new(max_requests, window).unwrap())
    }

    #[test]
    fn test_registry_creation() {
        let registry = registry(10, Duration::from_secs(1));
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_get_or_create_returns_same_counter() {
        let registry = registry(10, Duration::from_secs(1));

        let first = registry.get_or_create("192.168.1.1");
        let second = registry.get_or_create("192.168.1.1");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_first_access_creates_one_counter() {
        let registry = registry(1000, Duration::from_secs(60));
        let now = Instant::now();

        let counters: Vec<Arc<SlidingWindowCounter>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    scope.spawn(|| {
                        let counter = registry.get_or_create("203.0.113.9");
                        counter.try_admit(now);
                        counter
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(registry.len(), 1);
        assert!(counters.iter().all(|c| Arc::ptr_eq(c, &counters[0])));
        assert_eq!(counters[0].in_window(now), 16);
    }

    #[test]
    fn test_clients_are_independent() {
        let registry = registry(2, Duration::from_secs(1));
        let now = Instant::now();

        let a = registry.get_or_create("A");
        let b = registry.get_or_create("B");

        assert!(a.try_admit(now).is_allowed());
        assert!(a.try_admit(now).is_allowed());
        assert!(!a.try_admit(now).is_allowed());

        assert!(b.try_admit(now).is_allowed());
        assert!(b.try_admit(now).is_allowed());
        assert!(!b.try_admit(now).is_allowed());
    }

    #[test]
    fn test_snapshot_lists_all_clients() {
        let registry = registry(10, Duration::from_secs(1));
        for key in ["a", "b", "c"] {
            registry.get_or_create(key);
        }

        let mut keys: Vec<_> = registry.snapshot().into_iter().map(|(k, _)| k).collect();
        keys.sort();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_remove_if_stale_keeps_active_clients() {
        let window = Duration::from_secs(1);
        let registry = registry(10, window);
        let start = Instant::now();

        registry.get_or_create("busy").try_admit(start);

        assert!(!registry.remove_if_stale("busy", start + Duration::from_millis(500)));
        assert!(registry.contains("busy"));

        assert!(registry.remove_if_stale("busy", start + window));
        assert!(!registry.contains("busy"));
    }

    #[test]
    fn test_remove_if_stale_missing_key_is_noop() {
        let registry = registry(10, Duration::from_secs(1));
        assert!(!registry.remove_if_stale("ghost", Instant::now()));
    }

    #[test]
    fn test_sweep_evicts_idle_and_empty_clients() {
        let window = Duration::from_secs(1);
        let registry = registry(10, window);
        let start = Instant::now();

        registry.get_or_create("empty");
        registry.get_or_create("idle").try_admit(start);
        registry
            .get_or_create("active")
            .try_admit(start + Duration::from_millis(900));

        let evicted = registry.sweep(start + Duration::from_millis(1200));

        assert_eq!(evicted, 2);
        assert!(registry.contains("active"));
        assert!(!registry.contains("idle"));
        assert!(!registry.contains("empty"));
    }

    #[test]
    fn test_client_after_eviction_gets_full_quota() {
        let window = Duration::from_secs(10);
        let registry = registry(1, window);
        let start = Instant::now();

        let before = registry.get_or_create("A");
        assert!(before.try_admit(start).is_allowed());
        assert!(!before.try_admit(start).is_allowed());

        let later = start + Duration::from_millis(10_100);
        assert_eq!(registry.sweep(later), 1);

        let after = registry.get_or_create("A");
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.try_admit(later), Decision::Allowed);
        assert_eq!(after.in_window(later), 1);
    }

    #[test]
    fn test_clear_counters() {
        let registry = registry(10, Duration::from_secs(1));
        registry.get_or_create("a");
        assert_eq!(registry.len(), 1);

        registry.clear();
        assert!(registry.is_empty());
    }
}
