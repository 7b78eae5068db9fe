//! Web server module.
//!
//! # Endpoints
//!
//! - `POST /webhook` - Receives version-control webhooks
//! - `GET /api/events` - Lists stored events, newest first
//! - `GET /api/events/:request_id` - Fetches one event by delivery id
//! - `GET /health` - 200 when the store is reachable, 503 otherwise
//! - `GET /debug/schema` - Indexes and record count of the events collection
//! - `GET /` - Service banner

pub mod handlers;
pub mod signature;

use axum::{
    routing::{get, post},
    Router,
};

pub use handlers::{
    debug_schema, get_event, health, list_events, root, webhook, AppState, HealthResponse,
    ListEventsParams, WebhookResponse,
};
pub use signature::{is_signature_verification_enabled, verify_signature};

/// Build the router with every endpoint.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/debug/schema", get(debug_schema))
        .route("/webhook", post(webhook))
        .route("/api/events", get(list_events))
        .route("/api/events/:request_id", get(get_event))
        .with_state(state)
}
