//! Postgres event store.
//!
//! The pool connects lazily: no connection is made until the first
//! operation, and an unreachable database surfaces as
//! [`StoreError::Database`] on that operation rather than at startup.
//!
//! The schema (table plus indexes) is created on first use, inside a
//! transaction holding an advisory lock so replicas starting together do not
//! race on `CREATE TABLE`. A failed attempt is retried by the next operation;
//! a successful one is never repeated.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use tokio::sync::OnceCell;
use tracing::{info, warn};
use uuid::Uuid;

use super::{EventQuery, EventStore, IndexInfo, SaveOutcome, SchemaInfo, StoreError, EVENTS_TABLE};
use crate::events::{CanonicalEvent, EventAction, StoredEvent};

const SCHEMA: [&str; 4] = [
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id          UUID PRIMARY KEY,
        request_id  TEXT NOT NULL,
        author      TEXT NOT NULL,
        action      TEXT NOT NULL CHECK (action IN ('PUSH', 'PULL_REQUEST', 'MERGE')),
        from_branch TEXT,
        to_branch   TEXT NOT NULL CHECK (to_branch <> ''),
        "timestamp" TIMESTAMPTZ NOT NULL,
        raw_payload JSONB NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS events_request_id_key ON events (request_id)",
    r#"CREATE INDEX IF NOT EXISTS events_timestamp_idx ON events ("timestamp" DESC)"#,
    "CREATE INDEX IF NOT EXISTS events_action_idx ON events (action)",
];

/// Advisory lock key serializing schema creation across processes.
const SCHEMA_LOCK_KEY: i64 = 0x6769_7465_7665_6e74;

const SELECT_COLUMNS: &str =
    r#"SELECT id, request_id, author, action, from_branch, to_branch, "timestamp", created_at FROM events"#;

#[derive(FromRow)]
struct EventRow {
    id: Uuid,
    request_id: String,
    author: String,
    action: String,
    from_branch: Option<String>,
    to_branch: String,
    timestamp: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for StoredEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let action: EventAction = row
            .action
            .parse()
            .map_err(|e: crate::events::UnknownAction| StoreError::Corrupt(e.to_string()))?;

        Ok(StoredEvent {
            id: row.id.to_string(),
            request_id: row.request_id,
            author: row.author,
            action,
            from_branch: row.from_branch,
            to_branch: row.to_branch,
            timestamp: row.timestamp,
            created_at: row.created_at,
        })
    }
}

/// [`EventStore`] backed by a Postgres connection pool.
pub struct PgEventStore {
    pool: PgPool,
    schema_ready: OnceCell<()>,
}

impl PgEventStore {
    /// Create a store over a lazily connecting pool.
    pub fn connect_lazy(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_lazy(url)?;

        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: OnceCell::new(),
        }
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.schema_ready
            .get_or_try_init(|| async {
                let mut tx = self.pool.begin().await?;
                sqlx::query("SELECT pg_advisory_xact_lock($1)")
                    .bind(SCHEMA_LOCK_KEY)
                    .execute(&mut *tx)
                    .await?;
                for statement in SCHEMA {
                    sqlx::query(statement).execute(&mut *tx).await?;
                }
                tx.commit().await?;
                info!(table = EVENTS_TABLE, "postgres_schema_ready");
                Ok::<(), StoreError>(())
            })
            .await
            .map_err(|e| {
                warn!(error = %e, "postgres_schema_init_failed");
                e
            })?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn save(&self, event: &CanonicalEvent) -> Result<SaveOutcome, StoreError> {
        event.validate()?;
        self.ensure_schema().await?;

        // The unique index is the arbiter; a conflicting row yields no RETURNING row.
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO events
                (id, request_id, author, action, from_branch, to_branch, "timestamp", raw_payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (request_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&event.request_id)
        .bind(&event.author)
        .bind(event.action.as_str())
        .bind(event.from_branch.as_deref())
        .bind(&event.to_branch)
        .bind(event.timestamp)
        .bind(Json(&event.raw_payload))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(match inserted {
            Some(id) => SaveOutcome::Inserted { id: id.to_string() },
            None => SaveOutcome::Duplicate,
        })
    }

    async fn query(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, StoreError> {
        self.ensure_schema().await?;

        let sql = format!(
            r#"{} WHERE ($1::text IS NULL OR action = $1) ORDER BY "timestamp" DESC, created_at DESC LIMIT $2 OFFSET $3"#,
            SELECT_COLUMNS
        );
        let rows: Vec<EventRow> = sqlx::query_as(&sql)
            .bind(query.action().map(|a| a.as_str()))
            .bind(query.limit())
            .bind(query.offset())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(StoredEvent::try_from).collect()
    }

    async fn count(&self, action: Option<EventAction>) -> Result<u64, StoreError> {
        self.ensure_schema().await?;

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE ($1::text IS NULL OR action = $1)")
                .bind(action.map(|a| a.as_str()))
                .fetch_one(&self.pool)
                .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn find_by_request_id(&self, request_id: &str) -> Result<Option<StoredEvent>, StoreError> {
        self.ensure_schema().await?;

        let sql = format!("{} WHERE request_id = $1", SELECT_COLUMNS);
        let row: Option<EventRow> = sqlx::query_as(&sql)
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(StoredEvent::try_from).transpose()
    }

    async fn exists(&self, request_id: &str) -> Result<bool, StoreError> {
        self.ensure_schema().await?;

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM events WHERE request_id = $1)")
                .bind(request_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }

    async fn ping(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "postgres_ping_failed");
                false
            }
        }
    }

    async fn schema(&self) -> Result<SchemaInfo, StoreError> {
        self.ensure_schema().await?;

        let indexes: Vec<(String, String)> = sqlx::query_as(
            "SELECT indexname, indexdef FROM pg_indexes \
             WHERE schemaname = current_schema() AND tablename = $1 ORDER BY indexname",
        )
        .bind(EVENTS_TABLE)
        .fetch_all(&self.pool)
        .await?;

        Ok(SchemaInfo {
            collection: EVENTS_TABLE.to_string(),
            indexes: indexes
                .into_iter()
                .map(|(name, definition)| IndexInfo { name, definition })
                .collect(),
            document_count: self.count(None).await?,
        })
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("postgres_pool_closed");
    }
}
