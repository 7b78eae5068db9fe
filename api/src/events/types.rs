//! Canonical event model.
//!
//! Every accepted delivery, whatever its source payload shape, is reduced to
//! a [`CanonicalEvent`] before it reaches storage. Once stored it is read back
//! as a [`StoredEvent`], which adds the storage-assigned id and the ingestion
//! time.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed set of actions a canonical event can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventAction {
    Push,
    PullRequest,
    Merge,
}

impl EventAction {
    pub const ALL: [EventAction; 3] = [EventAction::Push, EventAction::PullRequest, EventAction::Merge];

    /// Storage and wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Push => "PUSH",
            EventAction::PullRequest => "PULL_REQUEST",
            EventAction::Merge => "MERGE",
        }
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name one of the three actions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid action '{0}', expected one of PUSH, PULL_REQUEST, MERGE")]
pub struct UnknownAction(pub String);

impl FromStr for EventAction {
    type Err = UnknownAction;

    /// Case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventAction::ALL
            .into_iter()
            .find(|action| action.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

/// A normalized event, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalEvent {
    /// Delivery id; the idempotency key.
    pub request_id: String,
    pub author: String,
    pub action: EventAction,
    /// Always `None` for pushes.
    pub from_branch: Option<String>,
    pub to_branch: String,
    /// When the source event happened, not when it was received.
    pub timestamp: DateTime<Utc>,
    /// The original payload, kept for audit.
    #[serde(skip)]
    pub raw_payload: serde_json::Value,
}

/// Validation failures for a [`CanonicalEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

impl CanonicalEvent {
    /// Check the invariants storage relies on.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.author.is_empty() {
            return Err(EventError::MissingField("author"));
        }
        if self.to_branch.is_empty() {
            return Err(EventError::MissingField("to_branch"));
        }
        Ok(())
    }
}

/// An event as read back from storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEvent {
    pub id: String,
    pub request_id: String,
    pub author: String,
    pub action: EventAction,
    pub from_branch: Option<String>,
    pub to_branch: String,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Build the stored view of a freshly persisted event.
    pub fn from_canonical(id: String, event: &CanonicalEvent, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            request_id: event.request_id.clone(),
            author: event.author.clone(),
            action: event.action,
            from_branch: event.from_branch.clone(),
            to_branch: event.to_branch.clone(),
            timestamp: event.timestamp,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_event() -> CanonicalEvent {
        CanonicalEvent {
            request_id: "delivery-1".to_string(),
            author: "alice".to_string(),
            action: EventAction::Push,
            from_branch: None,
            to_branch: "main".to_string(),
            timestamp: Utc::now(),
            raw_payload: json!({"ref": "refs/heads/main"}),
        }
    }

    #[test]
    fn test_action_from_str_case_insensitive() {
        assert_eq!("push".parse::<EventAction>(), Ok(EventAction::Push));
        assert_eq!("Pull_Request".parse::<EventAction>(), Ok(EventAction::PullRequest));
        assert_eq!("MERGE".parse::<EventAction>(), Ok(EventAction::Merge));
        assert!("deploy".parse::<EventAction>().is_err());
        assert!("".parse::<EventAction>().is_err());
    }

    #[test]
    fn test_action_serializes_screaming_snake_case() {
        assert_eq!(
            serde_json::to_value(EventAction::PullRequest).unwrap(),
            json!("PULL_REQUEST")
        );
        assert_eq!(EventAction::Merge.to_string(), "MERGE");
    }

    #[test]
    fn test_validate_accepts_complete_event() {
        assert!(sample_event().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_fields() {
        let mut event = sample_event();
        event.to_branch.clear();
        assert_eq!(event.validate(), Err(EventError::MissingField("to_branch")));

        let mut event = sample_event();
        event.author.clear();
        assert_eq!(event.validate(), Err(EventError::MissingField("author")));
    }

    #[test]
    fn test_raw_payload_not_serialized() {
        let value = serde_json::to_value(sample_event()).unwrap();
        assert!(value.get("raw_payload").is_none());
        assert_eq!(value["action"], "PUSH");
        assert!(value["from_branch"].is_null());
    }
}
