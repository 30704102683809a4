//! In-memory store double for tests and local development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use super::{StatsStore, StoreError};
use crate::events::UserEventStats;

/// Hash-map backed [`StatsStore`] with the same merge semantics as the
/// Postgres implementation, plus failure injection for exercising the
/// flush retry path.
pub struct InMemoryStatsStore {
    rows: Mutex<HashMap<(i64, String), i64>>,
    transactions: AtomicU64,
    failures_to_inject: AtomicU32,
}

impl InMemoryStatsStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            transactions: AtomicU64::new(0),
            failures_to_inject: AtomicU32::new(0),
        }
    }

    /// Number of committed (non-empty) upsert transactions so far.
    pub fn transaction_count(&self) -> u64 {
        self.transactions.load(Ordering::SeqCst)
    }

    /// Durable count for one key, zero when absent.
    pub fn stored_count(&self, user_id: i64, event_type: &str) -> i64 {
        self.rows
            .lock()
            .unwrap()
            .get(&(user_id, event_type.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    /// Makes the next `n` write transactions fail with a transient error.
    pub fn inject_failures(&self, n: u32) {
        self.failures_to_inject.store(n, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.failures_to_inject
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

impl Default for InMemoryStatsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatsStore for InMemoryStatsStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn upsert_batch(&self, stats: &[UserEventStats]) -> Result<(), StoreError> {
        if stats.is_empty() {
            return Ok(());
        }
        if self.take_injected_failure() {
            return Err(StoreError::Transient("injected store failure".to_string()));
        }

        let mut rows = self.rows.lock().unwrap();
        for stat in stats {
            *rows
                .entry((stat.user_id(), stat.event_type().to_string()))
                .or_insert(0) += stat.count();
        }
        self.transactions.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }

    async fn upsert(&self, stats: &UserEventStats) -> Result<(), StoreError> {
        self.upsert_batch(std::slice::from_ref(stats)).await
    }

    async fn get(
        &self,
        user_id: i64,
        event_type: &str,
    ) -> Result<Option<UserEventStats>, StoreError> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .get(&(user_id, event_type.to_string()))
            .map(|count| UserEventStats::from_parts(user_id, event_type, *count)))
    }

    async fn get_user(&self, user_id: i64) -> Result<Vec<UserEventStats>, StoreError> {
        let rows = self.rows.lock().unwrap();
        let mut stats: Vec<UserEventStats> = rows
            .iter()
            .filter(|((id, _), _)| *id == user_id)
            .map(|((id, event_type), count)| {
                UserEventStats::from_parts(*id, event_type.as_str(), *count)
            })
            .collect();
        stats.sort_by(|a, b| a.event_type().cmp(b.event_type()));
        Ok(stats)
    }
}
