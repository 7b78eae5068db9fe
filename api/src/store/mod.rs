//! Event storage.
//!
//! This module provides:
//! - The [`EventStore`] trait shared by every backend
//! - A Postgres backend ([`PgEventStore`]) for deployments
//! - An in-memory backend ([`InMemoryEventStore`]) for tests and local runs
//!
//! The store is append-only. Uniqueness of `request_id` is enforced by the
//! backend itself in a single atomic step, so concurrent retries of the same
//! delivery produce exactly one record and a duplicate signal for the rest.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::events::{CanonicalEvent, EventAction, EventError, StoredEvent};
use crate::Config;

pub use memory::InMemoryEventStore;
pub use postgres::PgEventStore;

/// Name of the events table.
pub const EVENTS_TABLE: &str = "events";

/// `DATABASE_URL` value selecting the in-memory backend.
pub const MEMORY_URL: &str = "memory://";

/// Default page size for queries.
pub const DEFAULT_LIMIT: i64 = 50;

/// Largest page a query may request.
pub const MAX_LIMIT: i64 = 100;

/// Errors raised by a storage backend.
///
/// Duplicate deliveries are not errors; they are reported through
/// [`SaveOutcome::Duplicate`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid event: {0}")]
    InvalidEvent(#[from] EventError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Result of a save attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A new record was written under the given id.
    Inserted { id: String },
    /// A record with the same `request_id` already exists; nothing was written.
    Duplicate,
}

impl SaveOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, SaveOutcome::Duplicate)
    }

    pub fn inserted_id(&self) -> Option<&str> {
        match self {
            SaveOutcome::Inserted { id } => Some(id),
            SaveOutcome::Duplicate => None,
        }
    }
}

/// A clamped page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventQuery {
    limit: i64,
    offset: i64,
    action: Option<EventAction>,
}

impl EventQuery {
    /// Build a query, clamping `limit` to `1..=100` and `offset` to `>= 0`.
    pub fn new(limit: Option<i64>, offset: Option<i64>, action: Option<EventAction>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
            offset: offset.unwrap_or(0).max(0),
            action,
        }
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn action(&self) -> Option<EventAction> {
        self.action
    }
}

impl Default for EventQuery {
    fn default() -> Self {
        Self::new(None, None, None)
    }
}

/// Pagination metadata returned alongside a page of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
    pub total: u64,
    pub has_more: bool,
}

impl Pagination {
    pub fn new(query: &EventQuery, returned: usize, total: u64) -> Self {
        let seen = query.offset as u64 + returned as u64;
        Self {
            limit: query.limit,
            offset: query.offset,
            total,
            has_more: seen < total,
        }
    }
}

/// One index on the events collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexInfo {
    pub name: String,
    pub definition: String,
}

/// Description of the events collection, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaInfo {
    pub collection: String,
    pub indexes: Vec<IndexInfo>,
    pub document_count: u64,
}

/// Append-only storage for canonical events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert an event unless one with the same `request_id` exists.
    async fn save(&self, event: &CanonicalEvent) -> Result<SaveOutcome, StoreError>;

    /// Fetch one page of events, newest `timestamp` first.
    async fn query(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, StoreError>;

    /// Count events, optionally restricted to one action.
    async fn count(&self, action: Option<EventAction>) -> Result<u64, StoreError>;

    async fn find_by_request_id(&self, request_id: &str) -> Result<Option<StoredEvent>, StoreError>;

    async fn exists(&self, request_id: &str) -> Result<bool, StoreError> {
        Ok(self.find_by_request_id(request_id).await?.is_some())
    }

    /// Check that the backend is reachable.
    async fn ping(&self) -> bool;

    async fn schema(&self) -> Result<SchemaInfo, StoreError>;

    /// Release connections. The store must not be used afterwards.
    async fn close(&self);
}

/// Build the store selected by `config.database_url`.
///
/// The Postgres pool connects lazily, so this does not touch the network.
pub fn connect(config: &Config) -> Result<Arc<dyn EventStore>, StoreError> {
    if config.database_url == MEMORY_URL {
        info!("event_store_in_memory");
        return Ok(Arc::new(InMemoryEventStore::new()));
    }

    let store = PgEventStore::connect_lazy(
        &config.database_url,
        config.database_max_connections,
        config.database_connect_timeout(),
    )?;
    info!(
        max_connections = config.database_max_connections,
        "event_store_postgres"
    );
    Ok(Arc::new(store))
}
