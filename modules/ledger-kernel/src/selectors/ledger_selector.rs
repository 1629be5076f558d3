//! Read-only ledger queries: trial balance, account balances, and the
//! canonical ledger hash.
//!
//! The ledger is a derived view over posted journal lines; there are no
//! stored balances anywhere in the system. Every query filters
//! `status = 'posted'` and, when given, `effective_date <= as_of`. No query
//! writes.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::canonical;
use crate::contracts::accounting_intent::Side;
use crate::errors::LedgerError;

/// A single row in a trial balance report.
#[derive(Debug, Clone, FromRow)]
pub struct TrialBalanceRow {
    pub account_id: Uuid,
    pub account_code: String,
    pub account_name: String,
    pub currency: String,
    pub debit_total: Decimal,
    pub credit_total: Decimal,
}

impl TrialBalanceRow {
    /// Net balance: debits minus credits.
    pub fn balance(&self) -> Decimal {
        self.debit_total - self.credit_total
    }
}

/// Balance of one account in one currency.
#[derive(Debug, Clone, FromRow)]
pub struct AccountBalance {
    pub account_id: Uuid,
    pub currency: String,
    pub debit_total: Decimal,
    pub credit_total: Decimal,
    pub line_count: i64,
}

impl AccountBalance {
    pub fn balance(&self) -> Decimal {
        self.debit_total - self.credit_total
    }
}

/// One posted line as seen through the ledger view.
#[derive(Debug, Clone, FromRow)]
pub struct LedgerLine {
    pub journal_entry_id: Uuid,
    pub journal_line_id: Uuid,
    pub entry_seq: i64,
    pub effective_date: NaiveDate,
    pub account_id: Uuid,
    pub account_code: String,
    pub side: Side,
    pub amount: Decimal,
    pub currency: String,
    pub dimensions: Option<Value>,
}

/// Trial balance as of a date: one row per (account, currency), ordered by
/// (account code, currency). For every currency the debit and credit totals
/// across rows are equal, the read-side double-entry check.
pub async fn trial_balance(
    pool: &PgPool,
    as_of: Option<NaiveDate>,
    currency: Option<&str>,
) -> Result<Vec<TrialBalanceRow>, LedgerError> {
    let rows = sqlx::query_as::<_, TrialBalanceRow>(
        r#"
        SELECT jl.account_id,
               a.code AS account_code,
               a.name AS account_name,
               jl.currency,
               COALESCE(SUM(jl.amount) FILTER (WHERE jl.side = 'debit'), 0) AS debit_total,
               COALESCE(SUM(jl.amount) FILTER (WHERE jl.side = 'credit'), 0) AS credit_total
        FROM journal_lines jl
        JOIN journal_entries je ON je.id = jl.journal_entry_id
        JOIN accounts a ON a.id = jl.account_id
        WHERE je.status = 'posted'
          AND ($1::date IS NULL OR je.effective_date <= $1)
          AND ($2::text IS NULL OR jl.currency = $2)
        GROUP BY jl.account_id, a.code, a.name, jl.currency
        ORDER BY a.code, jl.currency
        "#,
    )
    .bind(as_of)
    .bind(currency)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Balances for one account, one row per currency.
pub async fn account_balance(
    pool: &PgPool,
    account_id: Uuid,
    as_of: Option<NaiveDate>,
    currency: Option<&str>,
) -> Result<Vec<AccountBalance>, LedgerError> {
    let rows = sqlx::query_as::<_, AccountBalance>(
        r#"
        SELECT jl.account_id,
               jl.currency,
               COALESCE(SUM(jl.amount) FILTER (WHERE jl.side = 'debit'), 0) AS debit_total,
               COALESCE(SUM(jl.amount) FILTER (WHERE jl.side = 'credit'), 0) AS credit_total,
               COUNT(jl.id) AS line_count
        FROM journal_lines jl
        JOIN journal_entries je ON je.id = jl.journal_entry_id
        WHERE je.status = 'posted'
          AND jl.account_id = $1
          AND ($2::date IS NULL OR je.effective_date <= $2)
          AND ($3::text IS NULL OR jl.currency = $3)
        GROUP BY jl.account_id, jl.currency
        ORDER BY jl.currency
        "#,
    )
    .bind(account_id)
    .bind(as_of)
    .bind(currency)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Aggregate (debit, credit) totals across all accounts.
pub async fn total_debits_credits(
    pool: &PgPool,
    as_of: Option<NaiveDate>,
    currency: Option<&str>,
) -> Result<(Decimal, Decimal), LedgerError> {
    let row = sqlx::query_as::<_, (Decimal, Decimal)>(
        r#"
        SELECT COALESCE(SUM(jl.amount) FILTER (WHERE jl.side = 'debit'), 0),
               COALESCE(SUM(jl.amount) FILTER (WHERE jl.side = 'credit'), 0)
        FROM journal_lines jl
        JOIN journal_entries je ON je.id = jl.journal_entry_id
        WHERE je.status = 'posted'
          AND ($1::date IS NULL OR je.effective_date <= $1)
          AND ($2::text IS NULL OR jl.currency = $2)
        "#,
    )
    .bind(as_of)
    .bind(currency)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Posted ledger lines with account codes, ordered by entry seq then line
/// seq, a stable linear history.
pub async fn query(
    pool: &PgPool,
    as_of: Option<NaiveDate>,
    account_id: Option<Uuid>,
    currency: Option<&str>,
    limit: Option<i64>,
) -> Result<Vec<LedgerLine>, LedgerError> {
    let rows = sqlx::query_as::<_, LedgerLine>(
        r#"
        SELECT jl.journal_entry_id,
               jl.id AS journal_line_id,
               je.seq AS entry_seq,
               je.effective_date,
               jl.account_id,
               a.code AS account_code,
               jl.side,
               jl.amount,
               jl.currency,
               jl.dimensions
        FROM journal_lines jl
        JOIN journal_entries je ON je.id = jl.journal_entry_id
        JOIN accounts a ON a.id = jl.account_id
        WHERE je.status = 'posted'
          AND ($1::date IS NULL OR je.effective_date <= $1)
          AND ($2::uuid IS NULL OR jl.account_id = $2)
          AND ($3::text IS NULL OR jl.currency = $3)
        ORDER BY je.seq, jl.line_seq
        LIMIT $4
        "#,
    )
    .bind(as_of)
    .bind(account_id)
    .bind(currency)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// The fields of one posted line that enter the canonical hash.
#[derive(Debug, Clone, FromRow)]
pub struct CanonicalLine {
    pub account_id: Uuid,
    pub currency: String,
    pub dimensions: Option<Value>,
    pub entry_seq: i64,
    pub line_seq: i32,
    pub side: Side,
    pub amount: Decimal,
    pub is_rounding: bool,
}

/// Deterministic content hash of the posted ledger.
///
/// Identical posted content yields an identical hash, independent of
/// insertion order, dictionary key order, and formatting.
pub async fn canonical_hash(
    pool: &PgPool,
    as_of: Option<NaiveDate>,
    currency: Option<&str>,
) -> Result<String, LedgerError> {
    let lines = canonical_lines(pool, as_of, currency).await?;
    Ok(compute_canonical_hash(&lines))
}

/// Verify the ledger against an expected canonical hash.
pub async fn verify_canonical_hash(
    pool: &PgPool,
    expected: &str,
    as_of: Option<NaiveDate>,
    currency: Option<&str>,
) -> Result<bool, LedgerError> {
    Ok(canonical_hash(pool, as_of, currency).await? == expected)
}

async fn canonical_lines(
    pool: &PgPool,
    as_of: Option<NaiveDate>,
    currency: Option<&str>,
) -> Result<Vec<CanonicalLine>, LedgerError> {
    let rows = sqlx::query_as::<_, CanonicalLine>(
        r#"
        SELECT jl.account_id,
               jl.currency,
               jl.dimensions,
               je.seq AS entry_seq,
               jl.line_seq,
               jl.side,
               jl.amount,
               jl.is_rounding
        FROM journal_lines jl
        JOIN journal_entries je ON je.id = jl.journal_entry_id
        WHERE je.status = 'posted'
          AND ($1::date IS NULL OR je.effective_date <= $1)
          AND ($2::text IS NULL OR jl.currency = $2)
        ORDER BY je.seq, jl.line_seq
        "#,
    )
    .bind(as_of)
    .bind(currency)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Pure hash computation over canonical line records.
///
/// Each record is canonicalized (dimensions as compact sorted-key JSON,
/// amount as its minimal decimal string), then records are sorted by
/// (account_id, currency, dimensions, entry_seq, line_seq) and fed to
/// SHA-256 with a `\n` separator after each.
pub fn compute_canonical_hash(lines: &[CanonicalLine]) -> String {
    use sha2::{Digest, Sha256};

    let mut records: Vec<(String, String, String, i64, i32, Value)> = lines
        .iter()
        .map(|line| {
            let dims = canonicalize_dimensions(line.dimensions.as_ref());
            let record = json!({
                "account_id": line.account_id.to_string(),
                "currency": line.currency,
                "dimensions": dims,
                "entry_seq": line.entry_seq,
                "line_seq": line.line_seq,
                "side": line.side.as_str(),
                "amount": canonical::canonical_decimal(&line.amount),
                "is_rounding": line.is_rounding,
            });
            (
                line.account_id.to_string(),
                line.currency.clone(),
                dims,
                line.entry_seq,
                line.line_seq,
                record,
            )
        })
        .collect();

    records.sort_by(|a, b| {
        (&a.0, &a.1, &a.2, a.3, a.4).cmp(&(&b.0, &b.1, &b.2, b.3, b.4))
    });

    let mut hasher = Sha256::new();
    for (_, _, _, _, _, record) in &records {
        hasher.update(canonical::canonical_json(record).as_bytes());
        hasher.update(b"\n");
    }

    format!("{:x}", hasher.finalize())
}

fn canonicalize_dimensions(dimensions: Option<&Value>) -> String {
    match dimensions {
        None | Some(Value::Null) => String::new(),
        Some(value) if value.as_object().map(|o| o.is_empty()).unwrap_or(false) => {
            String::new()
        }
        Some(value) => canonical::canonical_json(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn line(
        account: Uuid,
        ccy: &str,
        dims: Option<Value>,
        entry_seq: i64,
        line_seq: i32,
        side: Side,
        amount: &str,
        is_rounding: bool,
    ) -> CanonicalLine {
        CanonicalLine {
            account_id: account,
            currency: ccy.to_string(),
            dimensions: dims,
            entry_seq,
            line_seq,
            side,
            amount: Decimal::from_str(amount).unwrap(),
            is_rounding,
        }
    }

    #[test]
    fn hash_is_insertion_order_independent() {
        let cash = Uuid::new_v4();
        let revenue = Uuid::new_v4();

        let a = vec![
            line(cash, "USD", None, 1, 0, Side::Debit, "100.00", false),
            line(revenue, "USD", None, 1, 1, Side::Credit, "100.00", false),
        ];
        let b = vec![a[1].clone(), a[0].clone()];

        assert_eq!(compute_canonical_hash(&a), compute_canonical_hash(&b));
    }

    #[test]
    fn hash_is_dimension_key_order_independent() {
        let account = Uuid::new_v4();
        let mut forward = serde_json::Map::new();
        forward.insert("project".into(), json!("p1"));
        forward.insert("cost_center".into(), json!("cc9"));
        let mut backward = serde_json::Map::new();
        backward.insert("cost_center".into(), json!("cc9"));
        backward.insert("project".into(), json!("p1"));

        let a = vec![line(
            account,
            "USD",
            Some(Value::Object(forward)),
            1,
            0,
            Side::Debit,
            "5",
            false,
        )];
        let b = vec![line(
            account,
            "USD",
            Some(Value::Object(backward)),
            1,
            0,
            Side::Debit,
            "5",
            false,
        )];

        assert_eq!(compute_canonical_hash(&a), compute_canonical_hash(&b));
    }

    #[test]
    fn hash_is_repeatable() {
        let account = Uuid::new_v4();
        let lines = vec![line(account, "EUR", None, 3, 0, Side::Credit, "42.42", false)];
        assert_eq!(compute_canonical_hash(&lines), compute_canonical_hash(&lines));
    }

    #[test]
    fn amount_formatting_does_not_change_the_hash() {
        let account = Uuid::new_v4();
        let a = vec![line(account, "USD", None, 1, 0, Side::Debit, "100.00", false)];
        let b = vec![line(account, "USD", None, 1, 0, Side::Debit, "100.0000", false)];
        assert_eq!(compute_canonical_hash(&a), compute_canonical_hash(&b));
    }

    #[test]
    fn semantic_changes_change_the_hash() {
        let account = Uuid::new_v4();
        let base = vec![line(account, "USD", None, 1, 0, Side::Debit, "100", false)];

        let different_amount =
            vec![line(account, "USD", None, 1, 0, Side::Debit, "100.01", false)];
        assert_ne!(
            compute_canonical_hash(&base),
            compute_canonical_hash(&different_amount)
        );

        let different_side = vec![line(account, "USD", None, 1, 0, Side::Credit, "100", false)];
        assert_ne!(
            compute_canonical_hash(&base),
            compute_canonical_hash(&different_side)
        );

        let rounding_flagged = vec![line(account, "USD", None, 1, 0, Side::Debit, "100", true)];
        assert_ne!(
            compute_canonical_hash(&base),
            compute_canonical_hash(&rounding_flagged)
        );
    }

    #[test]
    fn empty_ledger_hashes_to_empty_digest() {
        // SHA-256 of zero bytes
        assert_eq!(
            compute_canonical_hash(&[]),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn empty_and_missing_dimensions_are_equivalent() {
        let account = Uuid::new_v4();
        let a = vec![line(account, "USD", None, 1, 0, Side::Debit, "1", false)];
        let b = vec![line(
            account,
            "USD",
            Some(json!({})),
            1,
            0,
            Side::Debit,
            "1",
            false,
        )];
        assert_eq!(compute_canonical_hash(&a), compute_canonical_hash(&b));
    }
}
