//! Journal entry and line persistence: the single source of financial
//! truth.
//!
//! Entries are inserted already POSTED by the journal writer (drafts exist
//! only for manually staged work). Once POSTED, the row and all child lines
//! are immutable apart from the one legal transition POSTED->REVERSED; the
//! trigger layer backstops raw SQL.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::contracts::accounting_intent::Side;
use crate::errors::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "entry_status", rename_all = "lowercase")]
pub enum EntryStatus {
    Draft,
    Posted,
    Reversed,
}

#[derive(Debug, Clone, FromRow)]
pub struct JournalEntry {
    pub id: Uuid,
    pub source_event_id: Uuid,
    pub source_event_type: String,
    pub ledger_id: String,
    pub occurred_at: DateTime<Utc>,
    pub effective_date: NaiveDate,
    pub posted_at: Option<DateTime<Utc>>,
    pub actor_id: Uuid,
    pub status: EntryStatus,
    pub reversal_of_id: Option<Uuid>,
    pub idempotency_key: String,
    pub posting_rule_version: i32,
    pub coa_version: Option<i64>,
    pub dimension_schema_version: Option<i64>,
    pub rounding_policy_version: Option<i64>,
    pub fx_rates_version: Option<i64>,
    pub seq: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct JournalLine {
    pub id: Uuid,
    pub journal_entry_id: Uuid,
    pub account_id: Uuid,
    pub side: Side,
    pub amount: Decimal,
    pub currency: String,
    pub dimensions: Option<Value>,
    pub is_rounding: bool,
    pub line_memo: Option<String>,
    pub exchange_rate_id: Option<Uuid>,
    pub line_seq: i32,
}

impl JournalLine {
    /// Debits positive, credits negative.
    pub fn signed_amount(&self) -> Decimal {
        match self.side {
            Side::Debit => self.amount,
            Side::Credit => -self.amount,
        }
    }
}

/// Header fields for inserting a posted entry.
#[derive(Debug, Clone)]
pub struct NewJournalEntry {
    pub id: Uuid,
    pub source_event_id: Uuid,
    pub source_event_type: String,
    pub ledger_id: String,
    pub occurred_at: DateTime<Utc>,
    pub effective_date: NaiveDate,
    pub posted_at: DateTime<Utc>,
    pub actor_id: Uuid,
    pub reversal_of_id: Option<Uuid>,
    pub idempotency_key: String,
    pub posting_rule_version: i32,
    pub coa_version: i64,
    pub dimension_schema_version: i64,
    pub rounding_policy_version: i64,
    pub fx_rates_version: i64,
    pub seq: i64,
    pub description: Option<String>,
}

/// Line fields for bulk insert.
#[derive(Debug, Clone)]
pub struct NewJournalLine {
    pub account_id: Uuid,
    pub side: Side,
    pub amount: Decimal,
    pub currency: String,
    pub dimensions: Option<Value>,
    pub is_rounding: bool,
    pub line_memo: Option<String>,
    pub exchange_rate_id: Option<Uuid>,
    pub line_seq: i32,
}

const ENTRY_COLUMNS: &str = r#"
    SELECT id, source_event_id, source_event_type, ledger_id, occurred_at,
           effective_date, posted_at, actor_id, status, reversal_of_id,
           idempotency_key, posting_rule_version, coa_version,
           dimension_schema_version, rounding_policy_version, fx_rates_version,
           seq, description
    FROM journal_entries
"#;

const LINE_COLUMNS: &str = r#"
    SELECT id, journal_entry_id, account_id, side, amount, currency,
           dimensions, is_rounding, line_memo, exchange_rate_id, line_seq
    FROM journal_lines
"#;

/// Whether a sqlx error is the idempotency-key unique violation, the
/// signature of a concurrent twin that already posted.
pub fn is_idempotency_conflict(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.constraint())
        .map(|c| c == "uq_journal_idempotency")
        .unwrap_or(false)
}

pub async fn insert_posted_entry(
    tx: &mut Transaction<'_, Postgres>,
    entry: &NewJournalEntry,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO journal_entries
            (id, source_event_id, source_event_type, ledger_id, occurred_at,
             effective_date, posted_at, actor_id, status, reversal_of_id,
             idempotency_key, posting_rule_version, coa_version,
             dimension_schema_version, rounding_policy_version, fx_rates_version,
             seq, description)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'posted', $9, $10, $11, $12,
                $13, $14, $15, $16, $17)
        "#,
    )
    .bind(entry.id)
    .bind(entry.source_event_id)
    .bind(&entry.source_event_type)
    .bind(&entry.ledger_id)
    .bind(entry.occurred_at)
    .bind(entry.effective_date)
    .bind(entry.posted_at)
    .bind(entry.actor_id)
    .bind(entry.reversal_of_id)
    .bind(&entry.idempotency_key)
    .bind(entry.posting_rule_version)
    .bind(entry.coa_version)
    .bind(entry.dimension_schema_version)
    .bind(entry.rounding_policy_version)
    .bind(entry.fx_rates_version)
    .bind(entry.seq)
    .bind(&entry.description)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

pub async fn insert_lines(
    tx: &mut Transaction<'_, Postgres>,
    journal_entry_id: Uuid,
    lines: &[NewJournalLine],
) -> Result<(), sqlx::Error> {
    for line in lines {
        sqlx::query(
            r#"
            INSERT INTO journal_lines
                (id, journal_entry_id, account_id, side, amount, currency,
                 dimensions, is_rounding, line_memo, exchange_rate_id, line_seq)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(journal_entry_id)
        .bind(line.account_id)
        .bind(line.side)
        .bind(line.amount)
        .bind(&line.currency)
        .bind(&line.dimensions)
        .bind(line.is_rounding)
        .bind(&line.line_memo)
        .bind(line.exchange_rate_id)
        .bind(line.line_seq)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

/// Entries already posted (or since reversed) under idempotency keys with
/// this prefix, ordered by ledger. The bare key matches the primary ledger;
/// multi-ledger postings suffix `:<ledger_id>`.
pub async fn find_posted_by_idempotency_prefix(
    tx: &mut Transaction<'_, Postgres>,
    key_prefix: &str,
) -> Result<Vec<JournalEntry>, sqlx::Error> {
    sqlx::query_as::<_, JournalEntry>(&format!(
        r#"{ENTRY_COLUMNS}
        WHERE (idempotency_key = $1 OR idempotency_key LIKE $2)
          AND status IN ('posted', 'reversed')
        ORDER BY seq
        "#
    ))
    .bind(key_prefix)
    .bind(format!("{}:%", like_escape(key_prefix)))
    .fetch_all(&mut **tx)
    .await
}

fn like_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

pub async fn find_entry_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<JournalEntry>, sqlx::Error> {
    sqlx::query_as::<_, JournalEntry>(&format!("{ENTRY_COLUMNS} WHERE id = $1"))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
}

pub async fn find_entry(pool: &PgPool, id: Uuid) -> Result<Option<JournalEntry>, sqlx::Error> {
    sqlx::query_as::<_, JournalEntry>(&format!("{ENTRY_COLUMNS} WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_lines_tx(
    tx: &mut Transaction<'_, Postgres>,
    journal_entry_id: Uuid,
) -> Result<Vec<JournalLine>, sqlx::Error> {
    sqlx::query_as::<_, JournalLine>(&format!(
        "{LINE_COLUMNS} WHERE journal_entry_id = $1 ORDER BY line_seq"
    ))
    .bind(journal_entry_id)
    .fetch_all(&mut **tx)
    .await
}

pub async fn find_lines(
    pool: &PgPool,
    journal_entry_id: Uuid,
) -> Result<Vec<JournalLine>, sqlx::Error> {
    sqlx::query_as::<_, JournalLine>(&format!(
        "{LINE_COLUMNS} WHERE journal_entry_id = $1 ORDER BY line_seq"
    ))
    .bind(journal_entry_id)
    .fetch_all(pool)
    .await
}

/// Whether a reversal entry already points back at this entry.
pub async fn has_reversal(
    tx: &mut Transaction<'_, Postgres>,
    entry_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM journal_entries WHERE reversal_of_id = $1",
    )
    .bind(entry_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(count > 0)
}

/// Apply the one legal post-POSTED transition: POSTED -> REVERSED.
pub async fn mark_reversed(
    tx: &mut Transaction<'_, Postgres>,
    entry_id: Uuid,
) -> Result<(), LedgerError> {
    let updated = sqlx::query(
        r#"
        UPDATE journal_entries
        SET status = 'reversed', updated_at = NOW()
        WHERE id = $1 AND status = 'posted'
        "#,
    )
    .bind(entry_id)
    .execute(&mut **tx)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(LedgerError::ImmutabilityViolation {
            entity: "journal_entry",
            id: entry_id.to_string(),
            reason: "only a POSTED entry can transition to REVERSED".to_string(),
        });
    }

    Ok(())
}
