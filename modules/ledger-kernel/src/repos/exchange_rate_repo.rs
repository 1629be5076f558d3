//! Exchange rate persistence.
//!
//! Rates are additive: supersession produces a new row, never an update.
//! Once any journal line references a rate, the rate value is frozen and
//! the row cannot be deleted.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::currency;
use crate::errors::LedgerError;

/// Upper bound for a plausible conversion factor.
const MAX_RATE: i64 = 1_000_000;

#[derive(Debug, Clone, FromRow)]
pub struct ExchangeRate {
    pub id: Uuid,
    pub from_currency: String,
    pub to_currency: String,
    pub rate: Decimal,
    pub effective_at: DateTime<Utc>,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct NewExchangeRate {
    pub from_currency: String,
    pub to_currency: String,
    pub rate: Decimal,
    pub effective_at: DateTime<Utc>,
    pub source: String,
}

fn validate_rate(rate: Decimal) -> Result<(), LedgerError> {
    if rate <= Decimal::ZERO {
        return Err(LedgerError::InvalidExchangeRate {
            reason: format!("rate must be positive, got {rate}"),
        });
    }
    if rate > Decimal::from(MAX_RATE) {
        return Err(LedgerError::InvalidExchangeRate {
            reason: format!("rate {rate} exceeds the maximum of {MAX_RATE}"),
        });
    }
    Ok(())
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, from_currency, to_currency, rate, effective_at, source
    FROM exchange_rates
"#;

pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    rate: &NewExchangeRate,
) -> Result<ExchangeRate, LedgerError> {
    validate_rate(rate.rate)?;
    for code in [&rate.from_currency, &rate.to_currency] {
        if !currency::is_registered(code) {
            return Err(LedgerError::CurrencyInvalid { code: code.clone() });
        }
    }
    if rate.from_currency == rate.to_currency {
        return Err(LedgerError::InvalidExchangeRate {
            reason: "from and to currency must differ".to_string(),
        });
    }

    // Inverse consistency is advisory: a drifting product is logged, not
    // rejected.
    if let Some(inverse) =
        find_latest(tx, &rate.to_currency, &rate.from_currency, rate.effective_at).await?
    {
        let product = rate.rate * inverse.rate;
        let drift = (product - Decimal::ONE).abs();
        if drift > Decimal::new(1, 6) {
            tracing::warn!(
                from = %rate.from_currency,
                to = %rate.to_currency,
                rate = %rate.rate,
                inverse_rate = %inverse.rate,
                product = %product,
                "inverse rate product deviates from 1"
            );
        }
    }

    let row = sqlx::query_as::<_, ExchangeRate>(
        r#"
        INSERT INTO exchange_rates
            (id, from_currency, to_currency, rate, effective_at, source)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, from_currency, to_currency, rate, effective_at, source
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&rate.from_currency)
    .bind(&rate.to_currency)
    .bind(rate.rate)
    .bind(rate.effective_at)
    .bind(&rate.source)
    .fetch_one(&mut **tx)
    .await?;

    Ok(row)
}

/// Most recent rate for a pair effective at or before the given instant.
pub async fn find_latest(
    tx: &mut Transaction<'_, Postgres>,
    from_currency: &str,
    to_currency: &str,
    as_of: DateTime<Utc>,
) -> Result<Option<ExchangeRate>, sqlx::Error> {
    sqlx::query_as::<_, ExchangeRate>(&format!(
        r#"{SELECT_COLUMNS}
        WHERE from_currency = $1 AND to_currency = $2 AND effective_at <= $3
        ORDER BY effective_at DESC
        LIMIT 1
        "#
    ))
    .bind(from_currency)
    .bind(to_currency)
    .bind(as_of)
    .fetch_optional(&mut **tx)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<ExchangeRate>, sqlx::Error> {
    sqlx::query_as::<_, ExchangeRate>(&format!("{SELECT_COLUMNS} WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Latest rate per (from, to) pair effective at or before `as_of`, ordered
/// by pair: the fx snapshot state.
pub async fn list_latest_per_pair(
    tx: &mut Transaction<'_, Postgres>,
    as_of: DateTime<Utc>,
) -> Result<Vec<ExchangeRate>, sqlx::Error> {
    sqlx::query_as::<_, ExchangeRate>(
        r#"
        SELECT DISTINCT ON (from_currency, to_currency)
               id, from_currency, to_currency, rate, effective_at, source
        FROM exchange_rates
        WHERE effective_at <= $1
        ORDER BY from_currency, to_currency, effective_at DESC
        "#,
    )
    .bind(as_of)
    .fetch_all(&mut **tx)
    .await
}

/// Whether any journal line references this rate.
pub async fn is_referenced(
    tx: &mut Transaction<'_, Postgres>,
    rate_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM journal_lines WHERE exchange_rate_id = $1",
    )
    .bind(rate_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(count > 0)
}

/// Correct an unreferenced rate in place. A referenced rate is frozen.
pub async fn update_rate(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    new_rate: Decimal,
) -> Result<ExchangeRate, LedgerError> {
    validate_rate(new_rate)?;

    if is_referenced(tx, id).await? {
        return Err(LedgerError::ExchangeRateImmutable { id });
    }

    let row = sqlx::query_as::<_, ExchangeRate>(
        r#"
        UPDATE exchange_rates SET rate = $2
        WHERE id = $1
        RETURNING id, from_currency, to_currency, rate, effective_at, source
        "#,
    )
    .bind(id)
    .bind(new_rate)
    .fetch_optional(&mut **tx)
    .await?;

    row.ok_or(LedgerError::ValidationFailed {
        reason: format!("exchange rate {id} not found"),
    })
}

/// Delete an unreferenced rate. A referenced rate cannot be deleted.
pub async fn delete(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<(), LedgerError> {
    if is_referenced(tx, id).await? {
        return Err(LedgerError::ExchangeRateReferenced { id });
    }

    sqlx::query("DELETE FROM exchange_rates WHERE id = $1")
        .bind(id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}
