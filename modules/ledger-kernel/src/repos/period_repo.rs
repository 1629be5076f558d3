//! Fiscal period persistence and the status machine.
//!
//! Periods control when postings are accepted. Legal transitions:
//! OPEN->CLOSING, OPEN->CLOSED, CLOSING->OPEN, CLOSING->CLOSED, CLOSED->LOCKED.
//! A period with any journal entry in range can never be deleted.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::errors::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "period_status", rename_all = "lowercase")]
pub enum PeriodStatus {
    Open,
    Closing,
    Closed,
    Locked,
}

impl PeriodStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Locked => "locked",
        }
    }
}

/// The legal status transitions.
const ALLOWED_TRANSITIONS: &[(PeriodStatus, PeriodStatus)] = &[
    (PeriodStatus::Open, PeriodStatus::Closing),
    (PeriodStatus::Open, PeriodStatus::Closed),
    (PeriodStatus::Closing, PeriodStatus::Open),
    (PeriodStatus::Closing, PeriodStatus::Closed),
    (PeriodStatus::Closed, PeriodStatus::Locked),
];

pub fn transition_allowed(from: PeriodStatus, to: PeriodStatus) -> bool {
    ALLOWED_TRANSITIONS.contains(&(from, to))
}

#[derive(Debug, Clone, FromRow)]
pub struct FiscalPeriod {
    pub id: Uuid,
    pub period_code: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: PeriodStatus,
    pub allows_adjustments: bool,
    pub closing_run_id: Option<Uuid>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_by: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewPeriod {
    pub period_code: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub allows_adjustments: bool,
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, period_code, name, start_date, end_date, status,
           allows_adjustments, closing_run_id, closed_at, closed_by
    FROM fiscal_periods
"#;

pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    period: &NewPeriod,
) -> Result<FiscalPeriod, LedgerError> {
    if period.start_date > period.end_date {
        return Err(LedgerError::ValidationFailed {
            reason: format!(
                "period start {} is after end {}",
                period.start_date, period.end_date
            ),
        });
    }

    let overlapping = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM fiscal_periods
        WHERE start_date <= $2 AND end_date >= $1
        "#,
    )
    .bind(period.start_date)
    .bind(period.end_date)
    .fetch_one(&mut **tx)
    .await?;
    if overlapping > 0 {
        return Err(LedgerError::ValidationFailed {
            reason: format!(
                "period {} overlaps an existing period",
                period.period_code
            ),
        });
    }

    let row = sqlx::query_as::<_, FiscalPeriod>(
        r#"
        INSERT INTO fiscal_periods
            (id, period_code, name, start_date, end_date, status, allows_adjustments)
        VALUES ($1, $2, $3, $4, $5, 'open', $6)
        RETURNING id, period_code, name, start_date, end_date, status,
                  allows_adjustments, closing_run_id, closed_at, closed_by
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&period.period_code)
    .bind(&period.name)
    .bind(period.start_date)
    .bind(period.end_date)
    .bind(period.allows_adjustments)
    .fetch_one(&mut **tx)
    .await?;

    Ok(row)
}

pub async fn find_by_code_tx(
    tx: &mut Transaction<'_, Postgres>,
    period_code: &str,
) -> Result<Option<FiscalPeriod>, sqlx::Error> {
    sqlx::query_as::<_, FiscalPeriod>(&format!("{SELECT_COLUMNS} WHERE period_code = $1"))
        .bind(period_code)
        .fetch_optional(&mut **tx)
        .await
}

pub async fn find_by_code(
    pool: &PgPool,
    period_code: &str,
) -> Result<Option<FiscalPeriod>, sqlx::Error> {
    sqlx::query_as::<_, FiscalPeriod>(&format!("{SELECT_COLUMNS} WHERE period_code = $1"))
        .bind(period_code)
        .fetch_optional(pool)
        .await
}

/// The unique period covering an effective date, share-locked.
///
/// FOR SHARE lets concurrent posts into the same period proceed while
/// blocking a concurrent close (which takes FOR UPDATE) until this
/// transaction settles, and vice versa.
pub async fn find_covering_for_share(
    tx: &mut Transaction<'_, Postgres>,
    effective_date: NaiveDate,
) -> Result<Option<FiscalPeriod>, sqlx::Error> {
    sqlx::query_as::<_, FiscalPeriod>(&format!(
        "{SELECT_COLUMNS} WHERE start_date <= $1 AND end_date >= $1 FOR SHARE"
    ))
    .bind(effective_date)
    .fetch_optional(&mut **tx)
    .await
}

/// Lock a period row for a status transition.
pub async fn find_by_code_for_update(
    tx: &mut Transaction<'_, Postgres>,
    period_code: &str,
) -> Result<Option<FiscalPeriod>, sqlx::Error> {
    sqlx::query_as::<_, FiscalPeriod>(&format!(
        "{SELECT_COLUMNS} WHERE period_code = $1 FOR UPDATE"
    ))
    .bind(period_code)
    .fetch_optional(&mut **tx)
    .await
}

/// Apply a status transition, enforcing the legal transition set.
pub async fn transition(
    tx: &mut Transaction<'_, Postgres>,
    period: &FiscalPeriod,
    to: PeriodStatus,
    closing_run_id: Option<Uuid>,
    closed_at: Option<DateTime<Utc>>,
    closed_by: Option<Uuid>,
) -> Result<FiscalPeriod, LedgerError> {
    if !transition_allowed(period.status, to) {
        return Err(LedgerError::ImmutabilityViolation {
            entity: "fiscal_period",
            id: period.id.to_string(),
            reason: format!(
                "illegal status transition {} -> {}",
                period.status.as_str(),
                to.as_str()
            ),
        });
    }

    let row = sqlx::query_as::<_, FiscalPeriod>(
        r#"
        UPDATE fiscal_periods
        SET status = $2, closing_run_id = $3, closed_at = $4, closed_by = $5,
            updated_at = NOW()
        WHERE id = $1
        RETURNING id, period_code, name, start_date, end_date, status,
                  allows_adjustments, closing_run_id, closed_at, closed_by
        "#,
    )
    .bind(period.id)
    .bind(to)
    .bind(closing_run_id)
    .bind(closed_at)
    .bind(closed_by)
    .fetch_one(&mut **tx)
    .await?;

    Ok(row)
}

/// Ids of DRAFT journal entries whose effective date falls in the period.
pub async fn draft_entries_in_range(
    tx: &mut Transaction<'_, Postgres>,
    period: &FiscalPeriod,
) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT id FROM journal_entries
        WHERE status = 'draft'
          AND effective_date >= $1
          AND effective_date <= $2
        ORDER BY id
        "#,
    )
    .bind(period.start_date)
    .bind(period.end_date)
    .fetch_all(&mut **tx)
    .await
}

/// Delete a period. Refused while any journal entry has an effective date in
/// range.
pub async fn delete(
    tx: &mut Transaction<'_, Postgres>,
    period: &FiscalPeriod,
) -> Result<(), LedgerError> {
    let entries = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM journal_entries
        WHERE effective_date >= $1 AND effective_date <= $2
        "#,
    )
    .bind(period.start_date)
    .bind(period.end_date)
    .fetch_one(&mut **tx)
    .await?;

    if entries > 0 {
        return Err(LedgerError::ImmutabilityViolation {
            entity: "fiscal_period",
            id: period.id.to_string(),
            reason: "period has journal entries in range".to_string(),
        });
    }

    sqlx::query("DELETE FROM fiscal_periods WHERE id = $1")
        .bind(period.id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}
