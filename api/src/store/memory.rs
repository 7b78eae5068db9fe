//! In-memory event store.
//!
//! Keeps every record in a vector with a `request_id` index next to it, both
//! behind one lock. The duplicate check and the insert happen under the same
//! write guard, which is what makes `save` atomic for concurrent deliveries.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::{EventQuery, EventStore, IndexInfo, SaveOutcome, SchemaInfo, StoreError, EVENTS_TABLE};
use crate::events::{CanonicalEvent, EventAction, StoredEvent};

struct Record {
    event: StoredEvent,
    raw_payload: Value,
}

#[derive(Default)]
struct Inner {
    by_request_id: HashMap<String, usize>,
    records: Vec<Record>,
}

/// Process-local [`EventStore`].
#[derive(Default)]
pub struct InMemoryEventStore {
    inner: RwLock<Inner>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The payload stored with an event, if the event exists.
    pub async fn raw_payload(&self, request_id: &str) -> Option<Value> {
        let inner = self.inner.read().await;
        inner
            .by_request_id
            .get(request_id)
            .map(|&index| inner.records[index].raw_payload.clone())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn save(&self, event: &CanonicalEvent) -> Result<SaveOutcome, StoreError> {
        event.validate()?;

        let mut inner = self.inner.write().await;

        if inner.by_request_id.contains_key(&event.request_id) {
            debug!(request_id = %event.request_id, "memory_store_duplicate");
            return Ok(SaveOutcome::Duplicate);
        }

        let id = Uuid::new_v4().to_string();
        let index = inner.records.len();
        inner.records.push(Record {
            event: StoredEvent::from_canonical(id.clone(), event, Utc::now()),
            raw_payload: event.raw_payload.clone(),
        });
        inner.by_request_id.insert(event.request_id.clone(), index);

        Ok(SaveOutcome::Inserted { id })
    }

    async fn query(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, StoreError> {
        let inner = self.inner.read().await;

        let mut matching: Vec<&StoredEvent> = inner
            .records
            .iter()
            .map(|r| &r.event)
            .filter(|e| query.action().map_or(true, |action| e.action == action))
            .collect();

        matching.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });

        Ok(matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit() as usize)
            .cloned()
            .collect())
    }

    async fn count(&self, action: Option<EventAction>) -> Result<u64, StoreError> {
        let inner = self.inner.read().await;
        let count = inner
            .records
            .iter()
            .filter(|r| action.map_or(true, |action| r.event.action == action))
            .count();
        Ok(count as u64)
    }

    async fn find_by_request_id(&self, request_id: &str) -> Result<Option<StoredEvent>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .by_request_id
            .get(request_id)
            .map(|&index| inner.records[index].event.clone()))
    }

    async fn exists(&self, request_id: &str) -> Result<bool, StoreError> {
        Ok(self.inner.read().await.by_request_id.contains_key(request_id))
    }

    async fn ping(&self) -> bool {
        true
    }

    async fn schema(&self) -> Result<SchemaInfo, StoreError> {
        let document_count = self.inner.read().await.records.len() as u64;
        let index = |name: &str, definition: &str| IndexInfo {
            name: name.to_string(),
            definition: definition.to_string(),
        };

        Ok(SchemaInfo {
            collection: EVENTS_TABLE.to_string(),
            indexes: vec![
                index("events_request_id_key", "UNIQUE (request_id)"),
                index("events_timestamp_idx", "(timestamp DESC)"),
                index("events_action_idx", "(action)"),
            ],
            document_count,
        })
    }

    async fn close(&self) {
        info!("memory_store_closed");
    }
}
