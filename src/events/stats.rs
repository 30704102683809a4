//! Aggregated counter type keyed by (user, event type).

use super::user_event::ValidationError;
use std::hash::{Hash, Hasher};

/// Owned key for one counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatsKey {
    pub user_id: i64,
    pub event_type: String,
}

impl StatsKey {
    pub fn new(user_id: i64, event_type: impl Into<String>) -> Self {
        Self {
            user_id,
            event_type: event_type.into(),
        }
    }
}

/// Running counter for one `(user_id, event_type)` pair.
///
/// Identity, equality and hashing are defined by the key pair only; the
/// count is payload and never participates in either.
#[derive(Debug, Clone)]
pub struct UserEventStats {
    user_id: i64,
    event_type: String,
    count: i64,
}

impl UserEventStats {
    /// New counter at zero.
    pub fn new(user_id: i64, event_type: impl Into<String>) -> Result<Self, ValidationError> {
        Self::with_count(user_id, event_type, 0)
    }

    pub fn with_count(
        user_id: i64,
        event_type: impl Into<String>,
        count: i64,
    ) -> Result<Self, ValidationError> {
        if user_id < 1 {
            return Err(ValidationError::InvalidUserId(user_id));
        }
        let event_type = event_type.into();
        if event_type.trim().is_empty() {
            return Err(ValidationError::EmptyEventType);
        }
        if count < 0 {
            return Err(ValidationError::NegativeCount(count));
        }

        Ok(Self {
            user_id,
            event_type,
            count,
        })
    }

    // Skips validation; only for keys that already passed it (cache
    // snapshots, store reads of rows this service wrote).
    pub(crate) fn from_parts(user_id: i64, event_type: impl Into<String>, count: i64) -> Self {
        Self {
            user_id,
            event_type: event_type.into(),
            count,
        }
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn set_count(&mut self, count: i64) -> Result<(), ValidationError> {
        if count < 0 {
            return Err(ValidationError::NegativeCount(count));
        }
        self.count = count;
        Ok(())
    }

    /// Adds one and returns the new count.
    pub fn increment(&mut self) -> i64 {
        self.count += 1;
        self.count
    }

    pub fn key(&self) -> StatsKey {
        StatsKey::new(self.user_id, self.event_type.clone())
    }
}

impl PartialEq for UserEventStats {
    fn eq(&self, other: &Self) -> bool {
        self.user_id == other.user_id && self.event_type == other.event_type
    }
}

impl Eq for UserEventStats {}

impl Hash for UserEventStats {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.user_id.hash(state);
        self.event_type.hash(state);
    }
}
