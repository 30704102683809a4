//! Durable store interface for aggregated counters.
//!
//! The pipeline depends only on [`StatsStore`]; the Postgres
//! implementation lives in [`postgres`], and [`memory`] provides the
//! in-process double used by tests and local development.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::events::UserEventStats;

pub use memory::InMemoryStatsStore;
pub use postgres::PgStatsStore;

#[derive(Debug)]
pub enum StoreError {
    /// Connection-level failures and timeouts; safe to retry.
    Transient(String),
    /// Everything else; surfaces to the caller immediately.
    Fatal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Transient(msg) => write!(f, "Transient store error: {}", msg),
            StoreError::Fatal(msg) => write!(f, "Store error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Counter persistence contract.
///
/// `upsert_batch` is the hot path: one transaction that merges every row
/// via counter addition. Re-delivering the same delta after a restart only
/// ever adds; the store never rolls a count backward.
#[async_trait]
pub trait StatsStore: Send + Sync {
    /// Ensure the target table and supporting index exist.
    async fn initialize(&self) -> Result<(), StoreError>;

    /// Merge all rows inside a single transaction: insert each
    /// `(user_id, event_type, delta)`, adding the delta to the existing
    /// count on key conflict. Commits on success, rolls back entirely on
    /// any failure. Empty input is a no-op.
    async fn upsert_batch(&self, stats: &[UserEventStats]) -> Result<(), StoreError>;

    /// Single-row variant of [`StatsStore::upsert_batch`]; not on the hot
    /// path.
    async fn upsert(&self, stats: &UserEventStats) -> Result<(), StoreError>;

    /// Durable count for one key; `None` when the row does not exist. Not
    /// merged with any in-memory state.
    async fn get(
        &self,
        user_id: i64,
        event_type: &str,
    ) -> Result<Option<UserEventStats>, StoreError>;

    /// All durable counters for one user.
    async fn get_user(&self, user_id: i64) -> Result<Vec<UserEventStats>, StoreError>;
}
