//! Chart of accounts persistence with structural-freeze guards.
//!
//! Once an account is referenced by any posted journal line, its
//! `account_type`, `normal_balance`, and `code` are frozen; name, tags, and
//! activity remain mutable. Deletion is refused for referenced accounts and
//! for the last active rounding account of a currency.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::errors::LedgerError;

/// Account type determines financial statement placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "account_type", rename_all = "lowercase")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asset => "asset",
            Self::Liability => "liability",
            Self::Equity => "equity",
            Self::Revenue => "revenue",
            Self::Expense => "expense",
        }
    }
}

/// Normal balance side for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "normal_balance", rename_all = "lowercase")]
pub enum NormalBalance {
    Debit,
    Credit,
}

impl NormalBalance {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }
}

/// Tag marking an account as the rounding-difference sink for its currency.
pub const ROUNDING_TAG: &str = "rounding";

/// Chart of Accounts entry.
#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub normal_balance: NormalBalance,
    pub is_active: bool,
    pub tags: Vec<String>,
    pub parent_id: Option<Uuid>,
    /// Currency restriction; None allows lines in any currency.
    pub currency: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Fields for creating a new account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub normal_balance: NormalBalance,
    pub tags: Vec<String>,
    pub parent_id: Option<Uuid>,
    pub currency: Option<String>,
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, code, name, account_type, normal_balance, is_active, tags,
           parent_id, currency, created_at
    FROM accounts
"#;

pub async fn insert(
    tx: &mut Transaction<'_, Postgres>,
    account: &NewAccount,
) -> Result<Account, sqlx::Error> {
    sqlx::query_as::<_, Account>(
        r#"
        INSERT INTO accounts
            (id, code, name, account_type, normal_balance, is_active, tags,
             parent_id, currency)
        VALUES ($1, $2, $3, $4, $5, TRUE, $6, $7, $8)
        RETURNING id, code, name, account_type, normal_balance, is_active, tags,
                  parent_id, currency, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&account.code)
    .bind(&account.name)
    .bind(account.account_type)
    .bind(account.normal_balance)
    .bind(&account.tags)
    .bind(account.parent_id)
    .bind(&account.currency)
    .fetch_one(&mut **tx)
    .await
}

pub async fn find_by_id_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(&format!("{SELECT_COLUMNS} WHERE id = $1"))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
}

pub async fn find_by_code_tx(
    tx: &mut Transaction<'_, Postgres>,
    code: &str,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(&format!("{SELECT_COLUMNS} WHERE code = $1"))
        .bind(code)
        .fetch_optional(&mut **tx)
        .await
}

pub async fn find_by_code(pool: &PgPool, code: &str) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(&format!("{SELECT_COLUMNS} WHERE code = $1"))
        .bind(code)
        .fetch_optional(pool)
        .await
}

/// All accounts ordered by code, for snapshot capture.
pub async fn list_ordered(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<Vec<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(&format!("{SELECT_COLUMNS} ORDER BY code"))
        .fetch_all(&mut **tx)
        .await
}

/// Whether any posted journal line references this account.
pub async fn has_posted_references(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM journal_lines jl
        JOIN journal_entries je ON je.id = jl.journal_entry_id
        WHERE jl.account_id = $1
          AND je.status IN ('posted', 'reversed')
        "#,
    )
    .bind(account_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(count > 0)
}

/// The active rounding account for a currency.
///
/// Prefers an account restricted to the currency; falls back to the
/// multi-currency rounding account (currency IS NULL). With several
/// candidates, the lowest code wins deterministically.
pub async fn find_rounding_account(
    tx: &mut Transaction<'_, Postgres>,
    currency: &str,
) -> Result<Option<Account>, sqlx::Error> {
    sqlx::query_as::<_, Account>(&format!(
        r#"{SELECT_COLUMNS}
        WHERE is_active = TRUE
          AND $1 = ANY(tags)
          AND (currency = $2 OR currency IS NULL)
        ORDER BY (currency IS NULL), code
        LIMIT 1
        "#
    ))
    .bind(ROUNDING_TAG)
    .bind(currency)
    .fetch_optional(&mut **tx)
    .await
}

/// Update the mutable descriptive fields: name, tags, is_active.
///
/// Structural fields (code, account_type, normal_balance) have no update
/// path here; [`update_structural`] is the only route and it enforces the
/// posted-reference freeze.
pub async fn update_descriptive(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    name: &str,
    tags: &[String],
    is_active: bool,
) -> Result<Account, LedgerError> {
    let updated = sqlx::query_as::<_, Account>(
        r#"
        UPDATE accounts
        SET name = $2, tags = $3, is_active = $4, updated_at = NOW()
        WHERE id = $1
        RETURNING id, code, name, account_type, normal_balance, is_active, tags,
                  parent_id, currency, created_at
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(tags)
    .bind(is_active)
    .fetch_optional(&mut **tx)
    .await?;

    updated.ok_or(LedgerError::ValidationFailed {
        reason: format!("account {id} not found"),
    })
}

/// Change structural fields. Refused once the account is referenced by a
/// posted journal line.
pub async fn update_structural(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    code: &str,
    account_type: AccountType,
    normal_balance: NormalBalance,
) -> Result<Account, LedgerError> {
    if has_posted_references(tx, id).await? {
        return Err(LedgerError::ImmutabilityViolation {
            entity: "account",
            id: id.to_string(),
            reason: "structural fields are frozen once referenced by posted lines"
                .to_string(),
        });
    }

    let updated = sqlx::query_as::<_, Account>(
        r#"
        UPDATE accounts
        SET code = $2, account_type = $3, normal_balance = $4, updated_at = NOW()
        WHERE id = $1
        RETURNING id, code, name, account_type, normal_balance, is_active, tags,
                  parent_id, currency, created_at
        "#,
    )
    .bind(id)
    .bind(code)
    .bind(account_type)
    .bind(normal_balance)
    .fetch_optional(&mut **tx)
    .await?;

    updated.ok_or(LedgerError::ValidationFailed {
        reason: format!("account {id} not found"),
    })
}

/// Count active rounding accounts serving this currency bucket.
///
/// The bucket is the account's own currency restriction: a NULL-currency
/// rounding account is the multi-currency bucket.
async fn count_rounding_peers(
    tx: &mut Transaction<'_, Postgres>,
    currency: Option<&str>,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM accounts
        WHERE is_active = TRUE
          AND $1 = ANY(tags)
          AND (currency = $2 OR (currency IS NULL AND $2::text IS NULL))
        "#,
    )
    .bind(ROUNDING_TAG)
    .bind(currency)
    .fetch_one(&mut **tx)
    .await
}

/// Delete an account.
///
/// Refused when referenced by posted lines, and when it is the last active
/// rounding account for its currency bucket.
pub async fn delete(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<(), LedgerError> {
    let account = find_by_id_tx(tx, id)
        .await?
        .ok_or(LedgerError::ValidationFailed {
            reason: format!("account {id} not found"),
        })?;

    if has_posted_references(tx, id).await? {
        return Err(LedgerError::AccountReferenced { id });
    }

    if account.has_tag(ROUNDING_TAG) && account.is_active {
        let peers = count_rounding_peers(tx, account.currency.as_deref()).await?;
        if peers <= 1 {
            return Err(LedgerError::ImmutabilityViolation {
                entity: "account",
                id: id.to_string(),
                reason: format!(
                    "last rounding account for currency bucket {:?} cannot be deleted",
                    account.currency
                ),
            });
        }
    }

    sqlx::query("DELETE FROM accounts WHERE id = $1")
        .bind(id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}
