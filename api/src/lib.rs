//! Gitevents - webhook receiver for version-control events.
//!
//! Pushes, pull requests and merges arrive as GitHub-style webhooks. Each
//! delivery is authenticated, normalized into a canonical event and stored
//! idempotently under its delivery id, so sender retries never create
//! duplicates.
//!
//! ## Architecture
//!
//! ```text
//! Webhook → web::handlers → ingest (verify → classify → save) → store
//!                                                              ↑
//!                        GET /api/events → EventQuery ─────────┘
//! ```

pub mod config;
pub mod events;
pub mod ingest;
pub mod store;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use events::{classify, CanonicalEvent, EventAction, StoredEvent};
pub use ingest::{ingest, Delivery, IngestError, IngestOutcome};
pub use store::{EventQuery, EventStore, InMemoryEventStore, PgEventStore, SaveOutcome, StoreError};
pub use web::{build_router, AppState};
