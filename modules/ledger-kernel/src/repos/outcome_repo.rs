//! Economic events and interpretation outcomes, both append-only.
//!
//! One source event may yield several economic events over time; corrections
//! add rows, never mutate. The outcome row links event ↔ economic event ↔
//! journal entries (or records a rejection).

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::contracts::meaning::EconomicEventData;

#[derive(Debug, Clone, FromRow)]
pub struct EconomicEvent {
    pub id: Uuid,
    pub source_event_id: Uuid,
    pub economic_type: String,
    pub quantity: Option<Decimal>,
    pub dimensions: Option<Value>,
    pub effective_date: NaiveDate,
    pub profile_id: String,
    pub profile_version: i32,
    pub profile_hash: Option<String>,
    pub value: Option<Decimal>,
    pub currency: Option<String>,
    pub coa_version: i64,
    pub dimension_schema_version: i64,
    pub rounding_policy_version: i64,
    pub fx_rates_version: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct InterpretationOutcome {
    pub id: Uuid,
    pub source_event_id: Uuid,
    pub status: String,
    pub reason_code: Option<String>,
    pub message: Option<String>,
    pub economic_event_id: Option<Uuid>,
    pub journal_entry_ids: Option<Vec<Uuid>>,
    pub recorded_at: DateTime<Utc>,
}

pub async fn insert_economic_event(
    tx: &mut Transaction<'_, Postgres>,
    data: &EconomicEventData,
    created_at: DateTime<Utc>,
) -> Result<EconomicEvent, sqlx::Error> {
    let dimensions = data
        .dimensions
        .as_ref()
        .map(|d| serde_json::to_value(d).unwrap_or(Value::Null));

    sqlx::query_as::<_, EconomicEvent>(
        r#"
        INSERT INTO economic_events
            (id, source_event_id, economic_type, quantity, dimensions,
             effective_date, profile_id, profile_version, profile_hash,
             value, currency, coa_version, dimension_schema_version,
             rounding_policy_version, fx_rates_version, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16)
        RETURNING id, source_event_id, economic_type, quantity, dimensions,
                  effective_date, profile_id, profile_version, profile_hash,
                  value, currency, coa_version, dimension_schema_version,
                  rounding_policy_version, fx_rates_version, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(data.source_event_id)
    .bind(&data.economic_type)
    .bind(data.quantity)
    .bind(dimensions)
    .bind(data.effective_date)
    .bind(&data.profile_id)
    .bind(data.profile_version)
    .bind(&data.profile_hash)
    .bind(data.value)
    .bind(&data.currency)
    .bind(data.snapshot_versions.coa_version)
    .bind(data.snapshot_versions.dimension_schema_version)
    .bind(data.snapshot_versions.rounding_policy_version)
    .bind(data.snapshot_versions.fx_rates_version)
    .bind(created_at)
    .fetch_one(&mut **tx)
    .await
}

pub async fn insert_outcome(
    tx: &mut Transaction<'_, Postgres>,
    source_event_id: Uuid,
    status: &str,
    reason_code: Option<&str>,
    message: Option<&str>,
    economic_event_id: Option<Uuid>,
    journal_entry_ids: Option<&[Uuid]>,
    recorded_at: DateTime<Utc>,
) -> Result<InterpretationOutcome, sqlx::Error> {
    sqlx::query_as::<_, InterpretationOutcome>(
        r#"
        INSERT INTO interpretation_outcomes
            (id, source_event_id, status, reason_code, message,
             economic_event_id, journal_entry_ids, recorded_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, source_event_id, status, reason_code, message,
                  economic_event_id, journal_entry_ids, recorded_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(source_event_id)
    .bind(status)
    .bind(reason_code)
    .bind(message)
    .bind(economic_event_id)
    .bind(journal_entry_ids)
    .bind(recorded_at)
    .fetch_one(&mut **tx)
    .await
}

/// Outcomes for one source event, oldest first.
pub async fn list_by_source_event(
    pool: &PgPool,
    source_event_id: Uuid,
) -> Result<Vec<InterpretationOutcome>, sqlx::Error> {
    sqlx::query_as::<_, InterpretationOutcome>(
        r#"
        SELECT id, source_event_id, status, reason_code, message,
               economic_event_id, journal_entry_ids, recorded_at
        FROM interpretation_outcomes
        WHERE source_event_id = $1
        ORDER BY recorded_at, id
        "#,
    )
    .bind(source_event_id)
    .fetch_all(pool)
    .await
}
