//! Ingestion of a single webhook delivery.
//!
//! ```text
//! headers → verify signature → parse JSON → classify → save → IngestOutcome
//! ```
//!
//! Each stage short-circuits on failure, so a rejected delivery is never
//! classified or persisted. Nothing is retried here: senders redeliver on
//! failure, and idempotent saves make their retries safe.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::events::{classify, ignored_reason, CanonicalEvent, EventAction};
use crate::store::{EventStore, SaveOutcome, StoreError};
use crate::web::signature::verify_signature;

/// Header carrying the event kind.
pub const HEADER_EVENT: &str = "x-github-event";
/// Header carrying the unique delivery id.
pub const HEADER_DELIVERY: &str = "x-github-delivery";
/// Header carrying the HMAC-SHA256 signature.
pub const HEADER_SIGNATURE: &str = "x-hub-signature-256";

/// Transport-level view of one delivery.
#[derive(Debug, Clone, Copy)]
pub struct Delivery<'a> {
    pub event_type: Option<&'a str>,
    pub delivery_id: Option<&'a str>,
    pub signature: Option<&'a str>,
    pub body: &'a [u8],
}

/// Errors that reject a delivery.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Missing or empty required header.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// Signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,

    /// Body is not valid JSON.
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The store could not persist the event.
    #[error("failed to persist event: {0}")]
    Persistence(#[from] StoreError),
}

/// Event fields echoed back to the sender.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventSummary {
    pub request_id: String,
    pub author: String,
    pub action: EventAction,
    pub from_branch: Option<String>,
    pub to_branch: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&CanonicalEvent> for EventSummary {
    fn from(event: &CanonicalEvent) -> Self {
        Self {
            request_id: event.request_id.clone(),
            author: event.author.clone(),
            action: event.action,
            from_branch: event.from_branch.clone(),
            to_branch: event.to_branch.clone(),
            timestamp: event.timestamp,
        }
    }
}

/// Successful handling of a delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// The event was classified and stored (or was already stored).
    Received {
        event: EventSummary,
        duplicate: bool,
        inserted_id: Option<String>,
    },
    /// The event kind is not tracked; nothing was stored.
    Ignored { reason: String },
}

fn required<'a>(value: Option<&'a str>, header: &'static str) -> Result<&'a str, IngestError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(IngestError::MissingHeader(header)),
    }
}

/// Run one delivery through verification, classification and persistence.
pub async fn ingest(
    store: &dyn EventStore,
    secret: &str,
    delivery: Delivery<'_>,
) -> Result<IngestOutcome, IngestError> {
    let event_type = required(delivery.event_type, HEADER_EVENT)?;
    let delivery_id = required(delivery.delivery_id, HEADER_DELIVERY)?;

    info!(
        delivery_id = %delivery_id,
        event_type = %event_type,
        body_length = delivery.body.len(),
        "webhook_received"
    );

    // Verify over the raw bytes, before any parsing.
    if !verify_signature(delivery.body, secret, delivery.signature.unwrap_or_default()) {
        warn!(delivery_id = %delivery_id, "webhook_signature_invalid");
        return Err(IngestError::InvalidSignature);
    }

    let payload: Value = serde_json::from_slice(delivery.body).map_err(|e| {
        warn!(delivery_id = %delivery_id, error = %e, "webhook_invalid_json");
        IngestError::InvalidJson(e)
    })?;

    let event = match classify(event_type, delivery_id, &payload) {
        Some(event) => event,
        None => {
            let reason = ignored_reason(event_type, &payload);
            info!(delivery_id = %delivery_id, reason = %reason, "webhook_ignored");
            return Ok(IngestOutcome::Ignored { reason });
        }
    };

    let outcome = store.save(&event).await.map_err(|e| {
        error!(delivery_id = %delivery_id, error = %e, "webhook_persist_failed");
        IngestError::Persistence(e)
    })?;

    info!(
        delivery_id = %delivery_id,
        action = %event.action,
        author = %event.author,
        to_branch = %event.to_branch,
        duplicate = outcome.is_duplicate(),
        "webhook_stored"
    );

    Ok(IngestOutcome::Received {
        event: EventSummary::from(&event),
        duplicate: outcome.is_duplicate(),
        inserted_id: match outcome {
            SaveOutcome::Inserted { id } => Some(id),
            SaveOutcome::Duplicate => None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StoredEvent;
    use crate::store::{EventQuery, InMemoryEventStore, SchemaInfo};
    use crate::web::signature::{compute_signature, format_signature_header};
    use async_trait::async_trait;
    use serde_json::json;

    const SECRET: &str = "test-secret";

    /// Store that reads as empty and rejects every write.
    struct RejectingStore;

    #[async_trait]
    impl EventStore for RejectingStore {
        async fn save(&self, _event: &CanonicalEvent) -> Result<SaveOutcome, StoreError> {
            Err(StoreError::Corrupt("write rejected".to_string()))
        }

        async fn query(&self, _query: &EventQuery) -> Result<Vec<StoredEvent>, StoreError> {
            Ok(Vec::new())
        }

        async fn count(&self, _action: Option<EventAction>) -> Result<u64, StoreError> {
            Ok(0)
        }

        async fn find_by_request_id(&self, _request_id: &str) -> Result<Option<StoredEvent>, StoreError> {
            Ok(None)
        }

        async fn ping(&self) -> bool {
            false
        }

        async fn schema(&self) -> Result<SchemaInfo, StoreError> {
            Err(StoreError::Corrupt("unavailable".to_string()))
        }

        async fn close(&self) {}
    }

    fn signed(body: &[u8]) -> String {
        format_signature_header(&compute_signature(body, SECRET))
    }

    fn delivery<'a>(event_type: &'a str, id: &'a str, sig: &'a str, body: &'a [u8]) -> Delivery<'a> {
        Delivery {
            event_type: Some(event_type),
            delivery_id: Some(id),
            signature: Some(sig),
            body,
        }
    }

    fn push_body() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "ref": "refs/heads/main",
            "pusher": {"name": "alice"}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_push_is_received_and_stored() {
        let store = InMemoryEventStore::new();
        let body = push_body();
        let sig = signed(&body);

        let outcome = ingest(&store, SECRET, delivery("push", "d-1", &sig, &body))
            .await
            .unwrap();

        match outcome {
            IngestOutcome::Received { event, duplicate, inserted_id } => {
                assert_eq!(event.action, EventAction::Push);
                assert_eq!(event.author, "alice");
                assert_eq!(event.to_branch, "main");
                assert_eq!(event.from_branch, None);
                assert!((Utc::now() - event.timestamp).num_seconds().abs() < 60);
                assert!(!duplicate);
                assert!(inserted_id.is_some());
            }
            other => panic!("Expected Received, got {:?}", other),
        }

        assert_eq!(store.count(None).await.unwrap(), 1);
        assert_eq!(
            store.raw_payload("d-1").await,
            Some(serde_json::from_slice::<Value>(&body).unwrap())
        );
    }

    #[tokio::test]
    async fn test_redelivery_is_duplicate() {
        let store = InMemoryEventStore::new();
        let body = push_body();
        let sig = signed(&body);

        ingest(&store, SECRET, delivery("push", "d-1", &sig, &body)).await.unwrap();
        let second = ingest(&store, SECRET, delivery("push", "d-1", &sig, &body))
            .await
            .unwrap();

        match second {
            IngestOutcome::Received { duplicate, inserted_id, .. } => {
                assert!(duplicate);
                assert_eq!(inserted_id, None);
            }
            other => panic!("Expected Received, got {:?}", other),
        }
        assert_eq!(store.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_headers_rejected() {
        let store = InMemoryEventStore::new();
        let body = push_body();
        let sig = signed(&body);

        let mut d = delivery("push", "d-1", &sig, &body);
        d.event_type = None;
        assert!(matches!(
            ingest(&store, SECRET, d).await,
            Err(IngestError::MissingHeader(HEADER_EVENT))
        ));

        let d = delivery("push", "", &sig, &body);
        assert!(matches!(
            ingest(&store, SECRET, d).await,
            Err(IngestError::MissingHeader(HEADER_DELIVERY))
        ));
    }

    #[tokio::test]
    async fn test_bad_signature_stops_pipeline() {
        let store = InMemoryEventStore::new();
        // Not even JSON: the signature check must fail first.
        let body = b"not json";

        let result = ingest(&store, SECRET, delivery("push", "d-1", "sha256=deadbeef", body)).await;
        assert!(matches!(result, Err(IngestError::InvalidSignature)));

        let mut d = delivery("push", "d-2", "", &body[..]);
        d.signature = None;
        assert!(matches!(
            ingest(&store, SECRET, d).await,
            Err(IngestError::InvalidSignature)
        ));

        assert_eq!(store.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_open_mode_skips_signature() {
        let store = InMemoryEventStore::new();
        let body = push_body();
        let mut d = delivery("push", "d-1", "", &body);
        d.signature = None;

        let outcome = ingest(&store, "", d).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Received { .. }));
    }

    #[tokio::test]
    async fn test_invalid_json_rejected() {
        let store = InMemoryEventStore::new();
        let body = b"{not json";
        let sig = signed(body);

        let result = ingest(&store, SECRET, delivery("push", "d-1", &sig, body)).await;
        assert!(matches!(result, Err(IngestError::InvalidJson(_))));
    }

    #[tokio::test]
    async fn test_unhandled_action_ignored_without_write() {
        let store = InMemoryEventStore::new();
        let body = serde_json::to_vec(&json!({
            "action": "labeled",
            "pull_request": {"user": {"login": "carol"}}
        }))
        .unwrap();
        let sig = signed(&body);

        let outcome = ingest(&store, SECRET, delivery("pull_request", "d-1", &sig, &body))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            IngestOutcome::Ignored {
                reason: "pull_request action 'labeled' is not tracked".to_string()
            }
        );
        assert!(store.query(&EventQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_merge_received() {
        let store = InMemoryEventStore::new();
        let body = serde_json::to_vec(&json!({
            "action": "closed",
            "pull_request": {
                "merged": true,
                "merged_by": {"login": "bob"},
                "user": {"login": "carol"},
                "head": {"ref": "feature"},
                "base": {"ref": "main"},
                "merged_at": "2024-03-02T10:00:00Z"
            }
        }))
        .unwrap();
        let sig = signed(&body);

        let outcome = ingest(&store, SECRET, delivery("pull_request", "d-1", &sig, &body))
            .await
            .unwrap();

        match outcome {
            IngestOutcome::Received { event, .. } => {
                assert_eq!(event.action, EventAction::Merge);
                assert_eq!(event.author, "bob");
                assert_eq!(event.from_branch.as_deref(), Some("feature"));
            }
            other => panic!("Expected Received, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_persistence_error() {
        let body = push_body();
        let sig = signed(&body);

        let result = ingest(&RejectingStore, SECRET, delivery("push", "d-1", &sig, &body)).await;
        assert!(matches!(
            result,
            Err(IngestError::Persistence(StoreError::Corrupt(_)))
        ));
    }

    #[tokio::test]
    async fn test_ignored_delivery_never_reaches_store() {
        let body = serde_json::to_vec(&json!({"action": "opened"})).unwrap();
        let sig = signed(&body);

        // An ignored event must not attempt a write, so the rejecting store is fine.
        let outcome = ingest(&RejectingStore, SECRET, delivery("issues", "d-1", &sig, &body))
            .await
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Ignored { .. }));
    }
}
