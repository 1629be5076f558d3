//! The accounting intent: a balanced, role-based posting proposal.
//!
//! An intent is a value, not a graph: a header owning an ordered list of
//! ledger intents, each owning an ordered list of lines. Lines reference
//! roles by string; the journal writer resolves them to accounts.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::currency;
use crate::errors::LedgerError;

/// Debit or credit. Amounts are always positive; the side carries the sign.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "line_side", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Debit,
    Credit,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Debit => Side::Credit,
            Side::Credit => Side::Debit,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Debit => "debit",
            Side::Credit => "credit",
        }
    }
}

/// Snapshot component versions recorded on every posted artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotVersions {
    pub coa_version: i64,
    pub dimension_schema_version: i64,
    pub rounding_policy_version: i64,
    pub fx_rates_version: i64,
}

/// One debit or credit proposal, addressed by role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentLine {
    pub role: String,
    pub side: Side,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub dimensions: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub exchange_rate_id: Option<Uuid>,
}

/// One ledger's portion of an accounting intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerIntent {
    pub ledger_id: String,
    pub lines: Vec<IntentLine>,
}

/// The complete posting proposal for one source event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountingIntent {
    pub source_event_id: Uuid,
    pub profile_id: String,
    pub profile_version: i32,
    pub effective_date: NaiveDate,
    #[serde(default)]
    pub description: Option<String>,
    pub ledgers: Vec<LedgerIntent>,
    pub snapshot_versions: SnapshotVersions,
}

const MAX_MEMO_LEN: usize = 500;

impl AccountingIntent {
    /// Validate shape and the pre-rounding balance invariant: within each
    /// ledger intent and each currency, debits must equal credits.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.ledgers.is_empty() {
            return Err(LedgerError::ValidationFailed {
                reason: "intent carries no ledger intents".to_string(),
            });
        }

        for ledger in &self.ledgers {
            if ledger.ledger_id.is_empty() {
                return Err(LedgerError::ValidationFailed {
                    reason: "ledger_id must be non-empty".to_string(),
                });
            }
            if ledger.lines.is_empty() {
                return Err(LedgerError::ValidationFailed {
                    reason: format!("ledger {} carries no lines", ledger.ledger_id),
                });
            }

            let mut totals: BTreeMap<&str, (Decimal, Decimal)> = BTreeMap::new();

            for line in &ledger.lines {
                if line.role.is_empty() {
                    return Err(LedgerError::ValidationFailed {
                        reason: "line role must be non-empty".to_string(),
                    });
                }
                if line.amount <= Decimal::ZERO {
                    return Err(LedgerError::ValidationFailed {
                        reason: format!(
                            "line amount must be positive, got {} for role {}",
                            line.amount, line.role
                        ),
                    });
                }
                if !currency::is_registered(&line.currency) {
                    return Err(LedgerError::CurrencyInvalid {
                        code: line.currency.clone(),
                    });
                }
                if let Some(memo) = &line.memo {
                    if memo.len() > MAX_MEMO_LEN {
                        return Err(LedgerError::ValidationFailed {
                            reason: format!("line memo exceeds {MAX_MEMO_LEN} characters"),
                        });
                    }
                }

                let entry = totals
                    .entry(line.currency.as_str())
                    .or_insert((Decimal::ZERO, Decimal::ZERO));
                match line.side {
                    Side::Debit => entry.0 += line.amount,
                    Side::Credit => entry.1 += line.amount,
                }
            }

            for (ccy, (debits, credits)) in &totals {
                if debits != credits {
                    return Err(LedgerError::Unbalanced {
                        currency: (*ccy).to_string(),
                        debits: debits.to_string(),
                        credits: credits.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Currencies appearing in a given ledger intent, in stable order.
    pub fn currencies_of(ledger: &LedgerIntent) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for line in &ledger.lines {
            if !seen.contains(&line.currency) {
                seen.push(line.currency.clone());
            }
        }
        seen.sort_unstable();
        seen
    }
}
