//! Audit event rows: the persisted hash chain.
//!
//! Rows are pure-append; the unique index on `seq` prevents forks and the
//! trigger layer rejects UPDATE/DELETE outright.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct AuditEvent {
    pub id: Uuid,
    pub seq: i64,
    pub action: String,
    pub payload: Value,
    pub actor_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub prev_hash: String,
    pub hash: String,
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, seq, action, payload, actor_id, occurred_at, prev_hash, hash
    FROM audit_events
"#;

pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    seq: i64,
    action: &str,
    payload: &Value,
    actor_id: Uuid,
    occurred_at: DateTime<Utc>,
    prev_hash: &str,
    hash: &str,
) -> Result<AuditEvent, sqlx::Error> {
    sqlx::query_as::<_, AuditEvent>(
        r#"
        INSERT INTO audit_events
            (id, seq, action, payload, actor_id, occurred_at, prev_hash, hash)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, seq, action, payload, actor_id, occurred_at, prev_hash, hash
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(seq)
    .bind(action)
    .bind(payload)
    .bind(actor_id)
    .bind(occurred_at)
    .bind(prev_hash)
    .bind(hash)
    .fetch_one(&mut **tx)
    .await
}

pub async fn find_by_seq(
    tx: &mut Transaction<'_, Postgres>,
    seq: i64,
) -> Result<Option<AuditEvent>, sqlx::Error> {
    sqlx::query_as::<_, AuditEvent>(&format!("{SELECT_COLUMNS} WHERE seq = $1"))
        .bind(seq)
        .fetch_optional(&mut **tx)
        .await
}

/// All audit events in chain order.
pub async fn list_ordered(pool: &PgPool) -> Result<Vec<AuditEvent>, sqlx::Error> {
    sqlx::query_as::<_, AuditEvent>(&format!("{SELECT_COLUMNS} ORDER BY seq"))
        .fetch_all(pool)
        .await
}

/// Audit events for a given action, newest first.
pub async fn list_by_action(
    pool: &PgPool,
    action: &str,
    limit: i64,
) -> Result<Vec<AuditEvent>, sqlx::Error> {
    sqlx::query_as::<_, AuditEvent>(&format!(
        "{SELECT_COLUMNS} WHERE action = $1 ORDER BY seq DESC LIMIT $2"
    ))
    .bind(action)
    .bind(limit)
    .fetch_all(pool)
    .await
}
