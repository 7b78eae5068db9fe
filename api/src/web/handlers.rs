//! HTTP endpoint handlers.
//!
//! Handlers only translate between HTTP and the core: headers and body go
//! into [`ingest`], query strings into [`EventQuery`], and results and errors
//! come back out as JSON with the matching status code.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::events::{EventAction, StoredEvent, UnknownAction};
use crate::ingest::{
    ingest, Delivery, EventSummary, IngestError, IngestOutcome, HEADER_DELIVERY, HEADER_EVENT,
    HEADER_SIGNATURE,
};
use crate::store::{EventQuery, EventStore, Pagination, SchemaInfo, StoreError};
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn EventStore>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn EventStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
        }
    }
}

/// Error body shared by every failing endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub error: String,
}

fn error_response(status: StatusCode, message: String) -> Response {
    (
        status,
        Json(ErrorResponse {
            status: "error",
            error: message,
        }),
    )
        .into_response()
}

// =============================================================================
// Service
// =============================================================================

#[derive(Serialize)]
pub struct ServiceResponse {
    pub service: &'static str,
    pub status: &'static str,
}

/// Service banner.
pub async fn root() -> Json<ServiceResponse> {
    Json(ServiceResponse {
        service: "gitevents",
        status: "running",
    })
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

/// Health check endpoint. Reports 503 when the store is unreachable.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    if state.store.ping().await {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                database: "connected",
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unhealthy",
                database: "disconnected",
            }),
        )
    }
}

/// Describe the events collection: indexes and record count.
pub async fn debug_schema(State(state): State<AppState>) -> Result<Json<SchemaInfo>, ApiError> {
    Ok(Json(state.store.schema().await?))
}

// =============================================================================
// Webhook
// =============================================================================

/// Webhook response.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WebhookResponse {
    Received {
        duplicate: bool,
        event: EventSummary,
        #[serde(skip_serializing_if = "Option::is_none")]
        inserted_id: Option<String>,
    },
    Ignored {
        reason: String,
    },
}

impl From<IngestOutcome> for WebhookResponse {
    fn from(outcome: IngestOutcome) -> Self {
        match outcome {
            IngestOutcome::Received {
                event,
                duplicate,
                inserted_id,
            } => WebhookResponse::Received {
                duplicate,
                event,
                inserted_id,
            },
            IngestOutcome::Ignored { reason } => WebhookResponse::Ignored { reason },
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = match &self {
            IngestError::MissingHeader(_) | IngestError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            IngestError::InvalidSignature => StatusCode::UNAUTHORIZED,
            IngestError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(status, self.to_string())
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Webhook endpoint.
///
/// This endpoint:
/// 1. Checks the `X-GitHub-Event` and `X-GitHub-Delivery` headers
/// 2. Verifies `X-Hub-Signature-256` over the raw body (if a secret is configured)
/// 3. Classifies and stores the event
///
/// # Response
///
/// - 200 OK: `received` (possibly a duplicate) or `ignored`
/// - 400 Bad Request: missing header or invalid JSON
/// - 401 Unauthorized: invalid signature
/// - 500 Internal Server Error: storage failure
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, IngestError> {
    let delivery = Delivery {
        event_type: header(&headers, HEADER_EVENT),
        delivery_id: header(&headers, HEADER_DELIVERY),
        signature: header(&headers, HEADER_SIGNATURE),
        body: &body,
    };

    let outcome = ingest(state.store.as_ref(), &state.config.webhook_secret, delivery).await?;
    Ok(Json(outcome.into()))
}

// =============================================================================
// Event queries
// =============================================================================

/// Errors from the query endpoints.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    InvalidAction(#[from] UnknownAction),

    #[error("event not found")]
    NotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::InvalidAction(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Store(e) => {
                error!(error = %e, "event_query_failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        error_response(status, self.to_string())
    }
}

/// Raw query string for `GET /api/events`.
///
/// `limit` and `offset` fall back to their defaults when they are not
/// integers; `action` must name one of the three actions when non-empty.
#[derive(Debug, Default, Deserialize)]
pub struct ListEventsParams {
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub action: Option<String>,
}

impl ListEventsParams {
    pub fn into_query(self) -> Result<EventQuery, UnknownAction> {
        let number = |raw: Option<String>| raw.and_then(|v| v.trim().parse::<i64>().ok());

        let action = match self.action.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(raw.parse::<EventAction>()?),
        };

        Ok(EventQuery::new(number(self.limit), number(self.offset), action))
    }
}

#[derive(Debug, Serialize)]
pub struct ListEventsResponse {
    pub events: Vec<StoredEvent>,
    pub pagination: Pagination,
}

/// Paginated event listing, newest first.
pub async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<ListEventsParams>,
) -> Result<Json<ListEventsResponse>, ApiError> {
    let query = params.into_query()?;

    let events = state.store.query(&query).await?;
    let total = state.store.count(query.action()).await?;
    let pagination = Pagination::new(&query, events.len(), total);

    info!(
        limit = query.limit(),
        offset = query.offset(),
        action = ?query.action(),
        returned = events.len(),
        total = total,
        "events_listed"
    );

    Ok(Json(ListEventsResponse { events, pagination }))
}

/// Look up one event by its delivery id.
pub async fn get_event(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<StoredEvent>, ApiError> {
    state
        .store
        .find_by_request_id(&request_id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}
