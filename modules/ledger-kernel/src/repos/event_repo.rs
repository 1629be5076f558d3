//! Persistence for the incoming event envelope.
//!
//! The envelope is the immutable source record for every posting: once a
//! row is inserted, no field may change. The application never issues
//! UPDATE/DELETE against `events`; a trigger backstops raw SQL.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

/// Stored event envelope.
#[derive(Debug, Clone, FromRow)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub event_id: Uuid,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub effective_date: NaiveDate,
    pub actor_id: Uuid,
    pub producer: String,
    pub payload: Value,
    pub payload_hash: String,
    pub schema_version: i32,
    pub ingested_at: DateTime<Utc>,
}

impl EventEnvelope {
    /// The idempotency key derived from this envelope:
    /// `producer:event_type:event_id`.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}:{}", self.producer, self.event_type, self.event_id)
    }
}

/// Envelope fields supplied by the producer at ingestion.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_id: Uuid,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub effective_date: NaiveDate,
    pub actor_id: Uuid,
    pub producer: String,
    pub payload: Value,
    pub schema_version: i32,
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, event_id, event_type, occurred_at, effective_date, actor_id,
           producer, payload, payload_hash, schema_version, ingested_at
    FROM events
"#;

pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    event: &NewEvent,
    payload_hash: &str,
    ingested_at: DateTime<Utc>,
) -> Result<EventEnvelope, sqlx::Error> {
    let row = sqlx::query_as::<_, EventEnvelope>(
        r#"
        INSERT INTO events
            (id, event_id, event_type, occurred_at, effective_date, actor_id,
             producer, payload, payload_hash, schema_version, ingested_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING id, event_id, event_type, occurred_at, effective_date, actor_id,
                  producer, payload, payload_hash, schema_version, ingested_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(event.event_id)
    .bind(&event.event_type)
    .bind(event.occurred_at)
    .bind(event.effective_date)
    .bind(event.actor_id)
    .bind(&event.producer)
    .bind(&event.payload)
    .bind(payload_hash)
    .bind(event.schema_version)
    .bind(ingested_at)
    .fetch_one(&mut **tx)
    .await?;

    Ok(row)
}

pub async fn find_by_event_id_tx(
    tx: &mut Transaction<'_, Postgres>,
    event_id: Uuid,
) -> Result<Option<EventEnvelope>, sqlx::Error> {
    sqlx::query_as::<_, EventEnvelope>(&format!("{SELECT_COLUMNS} WHERE event_id = $1"))
        .bind(event_id)
        .fetch_optional(&mut **tx)
        .await
}

pub async fn find_by_event_id(
    pool: &PgPool,
    event_id: Uuid,
) -> Result<Option<EventEnvelope>, sqlx::Error> {
    sqlx::query_as::<_, EventEnvelope>(&format!("{SELECT_COLUMNS} WHERE event_id = $1"))
        .bind(event_id)
        .fetch_optional(pool)
        .await
}
