//! Role resolution: abstract role + ledger + effective date -> one account.
//!
//! Exactly one active binding must cover the effective date; absence or
//! ambiguity aborts the post with `ROLE_UNRESOLVED`.

use chrono::NaiveDate;
use sqlx::{Postgres, Transaction};

use crate::errors::LedgerError;
use crate::repos::account_repo::{self, Account};
use crate::repos::role_repo;

/// Resolve a role to its concrete account.
///
/// The account itself may still be inactive or currency-restricted; those
/// checks belong to the journal writer, which sees the line context.
pub async fn resolve(
    tx: &mut Transaction<'_, Postgres>,
    role: &str,
    ledger_id: &str,
    effective_date: NaiveDate,
) -> Result<Account, LedgerError> {
    let bindings = role_repo::find_covering(tx, role, ledger_id, effective_date).await?;

    let binding = match bindings.len() {
        0 => {
            return Err(LedgerError::RoleUnresolved {
                role: role.to_string(),
                ledger_id: ledger_id.to_string(),
                reason: format!("no active binding covers {effective_date}"),
            })
        }
        1 => &bindings[0],
        n => {
            return Err(LedgerError::RoleUnresolved {
                role: role.to_string(),
                ledger_id: ledger_id.to_string(),
                reason: format!("{n} overlapping bindings cover {effective_date}"),
            })
        }
    };

    account_repo::find_by_code_tx(tx, &binding.account_code)
        .await?
        .ok_or_else(|| LedgerError::RoleUnresolved {
            role: role.to_string(),
            ledger_id: ledger_id.to_string(),
            reason: format!("bound account {} does not exist", binding.account_code),
        })
}
