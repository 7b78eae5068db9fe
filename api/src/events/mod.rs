//! Canonical event model and payload classification.
//!
//! ## Processing Flow
//!
//! ```text
//! (X-GitHub-Event, X-GitHub-Delivery, JSON payload) → classify() → Option<CanonicalEvent>
//! ```

pub mod classify;
pub mod timestamp;
pub mod types;

pub use classify::{classify, classify_at, ignored_reason};
pub use timestamp::{normalize_timestamp, parse_timestamp};
pub use types::{CanonicalEvent, EventAction, EventError, StoredEvent, UnknownAction};
