//! Domain event type and the inbound wire record it is validated from.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, PartialEq, Eq)]
pub enum ValidationError {
    InvalidUserId(i64),
    EmptyEventType,
    NegativeCount(i64),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::InvalidUserId(id) => {
                write!(f, "user_id must be positive, got {}", id)
            }
            ValidationError::EmptyEventType => write!(f, "event_type cannot be empty"),
            ValidationError::NegativeCount(count) => {
                write!(f, "count cannot be negative, got {}", count)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Inbound record as it appears on the topic: UTF-8 JSON with camelCase
/// field names. snake_case aliases are accepted for producers that have not
/// migrated. Unknown fields under `data` are retained verbatim.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEventRecord {
    #[serde(alias = "user_id")]
    pub user_id: i64,
    #[serde(alias = "event_type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
}

/// A validated user-activity event.
///
/// Constructed only through [`UserEvent::new`] (or `TryFrom` a wire
/// record), immutable afterwards. The timestamp is accepted as given and
/// never validated against the clock.
#[derive(Debug, Clone)]
pub struct UserEvent {
    user_id: i64,
    event_type: String,
    timestamp: DateTime<Utc>,
    data: HashMap<String, serde_json::Value>,
}

impl UserEvent {
    /// Validates `user_id >= 1` and a non-blank `event_type`; the stored
    /// event type is trimmed.
    pub fn new(
        user_id: i64,
        event_type: impl Into<String>,
        timestamp: DateTime<Utc>,
        data: HashMap<String, serde_json::Value>,
    ) -> Result<Self, ValidationError> {
        if user_id < 1 {
            return Err(ValidationError::InvalidUserId(user_id));
        }

        let event_type = event_type.into().trim().to_string();
        if event_type.is_empty() {
            return Err(ValidationError::EmptyEventType);
        }

        Ok(Self {
            user_id,
            event_type,
            timestamp,
            data,
        })
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn data(&self) -> &HashMap<String, serde_json::Value> {
        &self.data
    }

    /// The distinguished `buttonId` entry of the payload, when present and
    /// a string.
    pub fn button_id(&self) -> Option<&str> {
        self.data.get("buttonId").and_then(|value| value.as_str())
    }
}

impl TryFrom<UserEventRecord> for UserEvent {
    type Error = ValidationError;

    fn try_from(record: UserEventRecord) -> Result<Self, Self::Error> {
        UserEvent::new(
            record.user_id,
            record.event_type,
            record.timestamp,
            record.data,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        "2025-01-07T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn test_valid_event_construction() {
        let event = UserEvent::new(123, "click", ts(), HashMap::new()).unwrap();

        assert_eq!(event.user_id(), 123);
        assert_eq!(event.event_type(), "click");
        assert_eq!(event.timestamp(), ts());
        assert!(event.button_id().is_none());
    }

    #[test]
    fn test_event_type_is_trimmed() {
        let event = UserEvent::new(1, "  hover \n", ts(), HashMap::new()).unwrap();
        assert_eq!(event.event_type(), "hover");
    }

    #[test]
    fn test_rejects_non_positive_user_id() {
        assert_eq!(
            UserEvent::new(0, "click", ts(), HashMap::new()).unwrap_err(),
            ValidationError::InvalidUserId(0)
        );
        assert_eq!(
            UserEvent::new(-7, "click", ts(), HashMap::new()).unwrap_err(),
            ValidationError::InvalidUserId(-7)
        );
    }

    #[test]
    fn test_rejects_blank_event_type() {
        assert_eq!(
            UserEvent::new(1, "   ", ts(), HashMap::new()).unwrap_err(),
            ValidationError::EmptyEventType
        );
        assert_eq!(
            UserEvent::new(1, "", ts(), HashMap::new()).unwrap_err(),
            ValidationError::EmptyEventType
        );
    }

    #[test]
    fn test_wire_record_camel_case() {
        let json = r#"{
            "userId": 123,
            "eventType": "click",
            "timestamp": "2025-01-07T00:00:00Z",
            "data": { "buttonId": "submit", "page": "/checkout" }
        }"#;

        let record: UserEventRecord = serde_json::from_str(json).unwrap();
        let event = UserEvent::try_from(record).unwrap();

        assert_eq!(event.user_id(), 123);
        assert_eq!(event.event_type(), "click");
        assert_eq!(event.button_id(), Some("submit"));
        // Unknown data fields are kept
        assert_eq!(
            event.data().get("page").and_then(|v| v.as_str()),
            Some("/checkout")
        );
    }

    #[test]
    fn test_wire_record_snake_case_aliases() {
        let json = r#"{
            "user_id": 5,
            "event_type": "hover",
            "timestamp": "2025-01-07T12:30:00Z"
        }"#;

        let record: UserEventRecord = serde_json::from_str(json).unwrap();
        let event = UserEvent::try_from(record).unwrap();

        assert_eq!(event.user_id(), 5);
        assert_eq!(event.event_type(), "hover");
        assert!(event.data().is_empty());
    }

    #[test]
    fn test_wire_record_invalid_user_id_fails_validation() {
        let json = r#"{"userId": 0, "eventType": "click", "timestamp": "2025-01-07T00:00:00Z"}"#;

        let record: UserEventRecord = serde_json::from_str(json).unwrap();
        assert!(UserEvent::try_from(record).is_err());
    }
}
