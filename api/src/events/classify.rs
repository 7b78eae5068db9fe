//! Classification of raw webhook payloads into canonical events.
//!
//! # Classification table
//!
//! | `X-GitHub-Event` | `action`                            | `merged` | Result         |
//! |------------------|-------------------------------------|----------|----------------|
//! | `push`           | n/a                                 | n/a      | `PUSH`         |
//! | `pull_request`   | `closed`                            | `true`   | `MERGE`        |
//! | `pull_request`   | `opened`, `synchronize`, `reopened` | any      | `PULL_REQUEST` |
//! | `pull_request`   | anything else                       | any      | ignored        |
//! | anything else    | n/a                                 | n/a      | ignored        |
//!
//! Payloads are read through typed structs in which every field is optional.
//! A field that is absent, `null`, or of the wrong JSON type reads as `None`,
//! so classification never fails on a malformed payload; it only falls back
//! to defaults.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use super::timestamp::normalize_timestamp;
use super::types::{CanonicalEvent, EventAction};

/// Author or branch placeholder when the payload does not say.
pub const UNKNOWN: &str = "unknown";

const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// Classify a delivery using the current time as the fallback timestamp.
///
/// Returns `None` when the event kind is not tracked.
pub fn classify(event_type: &str, delivery_id: &str, payload: &Value) -> Option<CanonicalEvent> {
    classify_at(event_type, delivery_id, payload, Utc::now())
}

/// Classify a delivery, using `now` wherever the payload lacks a timestamp.
pub fn classify_at(
    event_type: &str,
    delivery_id: &str,
    payload: &Value,
    now: DateTime<Utc>,
) -> Option<CanonicalEvent> {
    let event = match event_type {
        "push" => Some(classify_push(delivery_id, payload, now)),
        "pull_request" => classify_pull_request(delivery_id, payload, now),
        _ => None,
    };

    match &event {
        Some(e) => debug!(
            delivery_id = %delivery_id,
            event_type = %event_type,
            action = %e.action,
            "event_classified"
        ),
        None => debug!(delivery_id = %delivery_id, event_type = %event_type, "event_not_tracked"),
    }

    event
}

/// Human-readable explanation for a delivery that classified to `None`.
pub fn ignored_reason(event_type: &str, payload: &Value) -> String {
    match event_type {
        "pull_request" => {
            let action = PullRequestPayload::read(payload).action.unwrap_or_default();
            format!("pull_request action '{}' is not tracked", action)
        }
        other => format!("event type '{}' is not tracked", other),
    }
}

// =============================================================================
// Push
// =============================================================================

fn classify_push(delivery_id: &str, payload: &Value, now: DateTime<Utc>) -> CanonicalEvent {
    let push = PushPayload::read(payload);

    let to_branch = push
        .git_ref
        .as_deref()
        .map(branch_name)
        .filter(|branch| !branch.is_empty())
        .unwrap_or(UNKNOWN)
        .to_string();

    let author = push
        .pusher
        .and_then(|p| non_empty(p.name))
        .unwrap_or_else(|| UNKNOWN.to_string());

    let timestamp = push.head_commit.and_then(|c| c.timestamp);

    CanonicalEvent {
        request_id: delivery_id.to_string(),
        author,
        action: EventAction::Push,
        from_branch: None,
        to_branch,
        timestamp: normalize_timestamp(timestamp.as_deref(), now),
        raw_payload: payload.clone(),
    }
}

/// Strip `refs/heads/` from a ref; other refs pass through verbatim.
pub fn branch_name(git_ref: &str) -> &str {
    git_ref.strip_prefix(BRANCH_REF_PREFIX).unwrap_or(git_ref)
}

// =============================================================================
// Pull request
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PullRequestAction {
    Opened,
    Synchronize,
    Reopened,
    Closed,
    Other,
}

impl PullRequestAction {
    fn parse(action: Option<&str>) -> Self {
        match action {
            Some("opened") => PullRequestAction::Opened,
            Some("synchronize") => PullRequestAction::Synchronize,
            Some("reopened") => PullRequestAction::Reopened,
            Some("closed") => PullRequestAction::Closed,
            _ => PullRequestAction::Other,
        }
    }
}

fn classify_pull_request(
    delivery_id: &str,
    payload: &Value,
    now: DateTime<Utc>,
) -> Option<CanonicalEvent> {
    let event = PullRequestPayload::read(payload);
    let action = PullRequestAction::parse(event.action.as_deref());
    let pr = event.pull_request.unwrap_or_default();
    let merged = pr.merged == Some(true);

    let (action, author, timestamp) = match action {
        PullRequestAction::Closed if merged => {
            // Falls back to the PR author when the merger is not reported.
            let author = pr
                .merged_by
                .and_then(|u| non_empty(u.login))
                .or_else(|| pr.user.and_then(|u| non_empty(u.login)));
            (EventAction::Merge, author, pr.merged_at)
        }
        PullRequestAction::Opened | PullRequestAction::Synchronize | PullRequestAction::Reopened => {
            let author = pr.user.and_then(|u| non_empty(u.login));
            let timestamp = non_empty(pr.updated_at).or_else(|| non_empty(pr.created_at));
            (EventAction::PullRequest, author, timestamp)
        }
        PullRequestAction::Closed | PullRequestAction::Other => return None,
    };

    Some(CanonicalEvent {
        request_id: delivery_id.to_string(),
        author: author.unwrap_or_else(|| UNKNOWN.to_string()),
        action,
        from_branch: Some(ref_or_unknown(pr.head)),
        to_branch: ref_or_unknown(pr.base),
        timestamp: normalize_timestamp(timestamp.as_deref(), now),
        raw_payload: payload.clone(),
    })
}

fn ref_or_unknown(branch: Option<BranchRef>) -> String {
    branch
        .and_then(|b| non_empty(b.git_ref))
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

// =============================================================================
// Raw payload shapes
// =============================================================================

/// Deserialize a field, mapping `null` or a type mismatch to `None`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

#[derive(Debug, Default, Deserialize)]
struct PushPayload {
    #[serde(default, rename = "ref", deserialize_with = "lenient")]
    git_ref: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pusher: Option<Pusher>,
    #[serde(default, deserialize_with = "lenient")]
    head_commit: Option<HeadCommit>,
}

impl PushPayload {
    fn read(payload: &Value) -> Self {
        Self::deserialize(payload).unwrap_or_default()
    }
}

#[derive(Debug, Default, Deserialize)]
struct Pusher {
    #[serde(default, deserialize_with = "lenient")]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct HeadCommit {
    #[serde(default, deserialize_with = "lenient")]
    timestamp: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PullRequestPayload {
    #[serde(default, deserialize_with = "lenient")]
    action: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pull_request: Option<PullRequest>,
}

impl PullRequestPayload {
    fn read(payload: &Value) -> Self {
        Self::deserialize(payload).unwrap_or_default()
    }
}

#[derive(Debug, Default, Deserialize)]
struct PullRequest {
    #[serde(default, deserialize_with = "lenient")]
    merged: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    merged_by: Option<User>,
    #[serde(default, deserialize_with = "lenient")]
    user: Option<User>,
    #[serde(default, deserialize_with = "lenient")]
    head: Option<BranchRef>,
    #[serde(default, deserialize_with = "lenient")]
    base: Option<BranchRef>,
    #[serde(default, deserialize_with = "lenient")]
    merged_at: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    updated_at: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    created_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct User {
    #[serde(default, deserialize_with = "lenient")]
    login: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BranchRef {
    #[serde(default, rename = "ref", deserialize_with = "lenient")]
    git_ref: Option<String>,
}
