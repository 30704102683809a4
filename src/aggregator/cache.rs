//! Concurrent counter cache keyed by (user, event type).
//!
//! The cache is the only shared mutable state in the pipeline: the
//! consumer loop increments while the flusher snapshots and drains.
//! Storage is a sharded concurrent map, so an increment only contends
//! with other operations on the same shard and never takes a map-wide
//! lock.
//!
//! Drain policy: subtract-on-remove. A snapshot records the count each
//! counter had at capture time; after the store commit succeeds,
//! `remove_drained` subtracts exactly that amount from the live counter
//! under the shard lock and removes the key only when the remainder is
//! zero. An increment that lands between snapshot and drain therefore
//! survives into the next flush, so stored + cached always equals the
//! total number of increments observed.

use dashmap::DashMap;

use crate::events::{StatsKey, UserEventStats};

pub struct AggregationCache {
    counters: DashMap<StatsKey, i64>,
}

impl AggregationCache {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    /// Adds one to the counter for `(user_id, event_type)`, creating it at
    /// 1 when absent, and returns the count after the increment. Atomic per
    /// key. Inputs are assumed validated (the domain event already was).
    pub fn increment(&self, user_id: i64, event_type: &str) -> i64 {
        let mut entry = self
            .counters
            .entry(StatsKey::new(user_id, event_type))
            .or_insert(0);
        *entry += 1;
        *entry
    }

    /// Point-in-time copy of all counters. Later mutations never alter the
    /// returned snapshot.
    pub fn snapshot(&self) -> Vec<UserEventStats> {
        self.counters
            .iter()
            .map(|entry| {
                UserEventStats::from_parts(
                    entry.key().user_id,
                    entry.key().event_type.as_str(),
                    *entry.value(),
                )
            })
            .collect()
    }

    /// Subtracts each snapshotted count from its live counter, removing
    /// keys whose counter reaches zero. Counts added after the snapshot are
    /// preserved for the next drain.
    pub fn remove_drained(&self, drained: &[UserEventStats]) {
        for stats in drained {
            let key = stats.key();

            let hit_zero = match self.counters.get_mut(&key) {
                Some(mut entry) => {
                    *entry -= stats.count();
                    *entry <= 0
                }
                None => false,
            };

            if hit_zero {
                // Re-checked under the shard lock: a concurrent increment
                // between the subtraction above and this call keeps the key.
                self.counters.remove_if(&key, |_, count| *count <= 0);
            }
        }
    }

    /// Current count for one key, zero when absent.
    pub fn count(&self, user_id: i64, event_type: &str) -> i64 {
        self.counters
            .get(&StatsKey::new(user_id, event_type))
            .map(|entry| *entry.value())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }
}

impl Default for AggregationCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_creates_then_adds() {
        let cache = AggregationCache::new();

        assert_eq!(cache.increment(1, "click"), 1);
        assert_eq!(cache.increment(1, "click"), 2);
        assert_eq!(cache.increment(1, "hover"), 1);
        assert_eq!(cache.increment(2, "click"), 1);

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.count(1, "click"), 2);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_mutation() {
        let cache = AggregationCache::new();
        cache.increment(1, "click");

        let snapshot = cache.snapshot();
        cache.increment(1, "click");

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].count(), 1);
        assert_eq!(cache.count(1, "click"), 2);
    }

    #[test]
    fn test_remove_drained_clears_flushed_keys() {
        let cache = AggregationCache::new();
        cache.increment(1, "click");
        cache.increment(1, "click");
        cache.increment(2, "hover");

        let snapshot = cache.snapshot();
        cache.remove_drained(&snapshot);

        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_drained_keeps_increments_after_snapshot() {
        let cache = AggregationCache::new();
        cache.increment(1, "click");

        let snapshot = cache.snapshot();

        // Lands between snapshot and drain
        cache.increment(1, "click");

        cache.remove_drained(&snapshot);

        assert_eq!(cache.count(1, "click"), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_remove_drained_tolerates_missing_keys() {
        let cache = AggregationCache::new();
        let ghost = vec![UserEventStats::with_count(9, "click", 4).unwrap()];

        cache.remove_drained(&ghost);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let cache = AggregationCache::new();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..1_000 {
                        cache.increment(1, "click");
                    }
                });
            }
        });

        assert_eq!(cache.count(1, "click"), 8_000);
    }

    #[test]
    fn test_concurrent_drain_conserves_total() {
        // stored + cached must equal total increments no matter how drains
        // interleave with increments.
        let cache = AggregationCache::new();
        let stored = std::sync::atomic::AtomicI64::new(0);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..10_000 {
                    cache.increment(7, "click");
                }
            });

            scope.spawn(|| {
                for _ in 0..50 {
                    let snapshot = cache.snapshot();
                    let drained: i64 = snapshot.iter().map(|s| s.count()).sum();
                    stored.fetch_add(drained, std::sync::atomic::Ordering::SeqCst);
                    cache.remove_drained(&snapshot);
                }
            });
        });

        let total = stored.load(std::sync::atomic::Ordering::SeqCst) + cache.count(7, "click");
        assert_eq!(total, 10_000);
    }
}
