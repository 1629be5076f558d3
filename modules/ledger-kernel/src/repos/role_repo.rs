//! Account role bindings: abstract roles (`CASH`, `REVENUE`, …) mapped to
//! concrete account codes per ledger, valid over a date range.

use chrono::NaiveDate;
use sqlx::{FromRow, Postgres, Transaction};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct RoleBinding {
    pub id: Uuid,
    pub role: String,
    pub ledger_id: String,
    pub account_code: String,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
}

pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    role: &str,
    ledger_id: &str,
    account_code: &str,
    effective_from: NaiveDate,
    effective_to: Option<NaiveDate>,
) -> Result<RoleBinding, sqlx::Error> {
    sqlx::query_as::<_, RoleBinding>(
        r#"
        INSERT INTO account_role_bindings
            (id, role, ledger_id, account_code, effective_from, effective_to)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id, role, ledger_id, account_code, effective_from, effective_to
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(role)
    .bind(ledger_id)
    .bind(account_code)
    .bind(effective_from)
    .bind(effective_to)
    .fetch_one(&mut **tx)
    .await
}

/// Bindings covering the effective date for (role, ledger). The resolver
/// requires exactly one; zero or several is an unresolved role.
pub async fn find_covering(
    tx: &mut Transaction<'_, Postgres>,
    role: &str,
    ledger_id: &str,
    effective_date: NaiveDate,
) -> Result<Vec<RoleBinding>, sqlx::Error> {
    sqlx::query_as::<_, RoleBinding>(
        r#"
        SELECT id, role, ledger_id, account_code, effective_from, effective_to
        FROM account_role_bindings
        WHERE role = $1
          AND ledger_id = $2
          AND effective_from <= $3
          AND (effective_to IS NULL OR effective_to >= $3)
        ORDER BY effective_from
        "#,
    )
    .bind(role)
    .bind(ledger_id)
    .bind(effective_date)
    .fetch_all(&mut **tx)
    .await
}

/// All bindings in deterministic order, for snapshot capture.
pub async fn list_ordered(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<Vec<RoleBinding>, sqlx::Error> {
    sqlx::query_as::<_, RoleBinding>(
        r#"
        SELECT id, role, ledger_id, account_code, effective_from, effective_to
        FROM account_role_bindings
        ORDER BY ledger_id, role, effective_from
        "#,
    )
    .fetch_all(&mut **tx)
    .await
}
