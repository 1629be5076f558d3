//! The journal writer: role resolution, balance and rounding, gap-free
//! sequence assignment, persistence, and the POSTING audit event.
//!
//! All steps share the caller's transaction. Every validation runs before
//! the first write, so a typed rejection leaves no journal artifact behind.
//! A concurrent twin racing on the idempotency key is resolved by the
//! unique index: one writer wins, the loser observes the violation inside a
//! savepoint and reports `ALREADY_POSTED`.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde_json::json;
use sqlx::{Acquire, Postgres, Transaction};
use uuid::Uuid;

use crate::clock::Clock;
use crate::contracts::accounting_intent::{AccountingIntent, LedgerIntent, Side};
use crate::currency;
use crate::errors::LedgerError;
use crate::repos::account_repo::{self, Account};
use crate::repos::event_repo::EventEnvelope;
use crate::repos::journal_repo::{self, NewJournalEntry, NewJournalLine};
use crate::repos::period_repo::{self, FiscalPeriod, PeriodStatus};
use crate::repos::sequence_repo;
use crate::services::audit_service::{self, AuditAction};
use crate::services::role_resolver;

/// Per-call posting options.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Marks an adjusting entry, admissible into a closed period that
    /// allows adjustments.
    pub is_adjustment: bool,
    /// A posting issued by a period-close run may enter its own CLOSING
    /// period by presenting the run id.
    pub close_run_id: Option<Uuid>,
    /// Snapshot identity carried into the POSTING audit payload.
    pub snapshot_id: Option<Uuid>,
}

/// Identity of one posted journal entry.
#[derive(Debug, Clone)]
pub struct PostedEntry {
    pub entry_id: Uuid,
    pub ledger_id: String,
    pub seq: i64,
}

/// Outcome of a write: a fresh posting, or the identity of the entry a
/// previous (or concurrent) posting already created.
#[derive(Debug, Clone)]
pub enum JournalResult {
    Posted { entries: Vec<PostedEntry> },
    AlreadyPosted {
        entries: Vec<PostedEntry>,
        idempotency_key: String,
    },
}

/// Post one accounting intent against its source event.
pub async fn write(
    tx: &mut Transaction<'_, Postgres>,
    clock: &dyn Clock,
    intent: &AccountingIntent,
    event: &EventEnvelope,
    actor_id: Uuid,
    options: &WriteOptions,
) -> Result<JournalResult, LedgerError> {
    if intent.source_event_id != event.event_id {
        return Err(LedgerError::ValidationFailed {
            reason: format!(
                "intent source_event_id {} does not match event {}",
                intent.source_event_id, event.event_id
            ),
        });
    }
    intent.validate()?;

    // Step 1: the unique fiscal period containing the effective date, held
    // under a share lock so a concurrent close cannot land mid-posting.
    let period = period_repo::find_covering_for_share(tx, intent.effective_date)
        .await?
        .ok_or(LedgerError::PeriodNotFound {
            effective_date: intent.effective_date,
        })?;
    check_period_eligibility(&period, options)?;

    // Step 2: idempotency. A posted twin short-circuits with no new write.
    let base_key = event.idempotency_key();
    let existing = journal_repo::find_posted_by_idempotency_prefix(tx, &base_key).await?;
    if !existing.is_empty() {
        tracing::info!(
            idempotency_key = %base_key,
            "posting already exists, returning existing identity"
        );
        return Ok(JournalResult::AlreadyPosted {
            entries: existing
                .into_iter()
                .map(|e| PostedEntry {
                    entry_id: e.id,
                    ledger_id: e.ledger_id,
                    seq: e.seq.unwrap_or_default(),
                })
                .collect(),
            idempotency_key: base_key,
        });
    }

    // Steps 3-4: resolve roles and balance every ledger intent before any
    // write. A rejection here must leave no side effect.
    let mut prepared: Vec<(String, Vec<ResolvedLine>)> = Vec::new();
    for ledger in &intent.ledgers {
        let lines = resolve_and_round(tx, ledger, intent).await?;
        prepared.push((ledger.ledger_id.clone(), lines));
    }

    // Steps 5-7 write; a savepoint confines the idempotency race so the
    // caller's transaction survives the loser's unique violation.
    let mut sp = tx.begin().await?;
    let mut posted = Vec::with_capacity(prepared.len());

    for (index, (ledger_id, lines)) in prepared.iter().enumerate() {
        let seq = sequence_repo::next_value(&mut sp, sequence_repo::JOURNAL_ENTRY).await?;
        let entry_id = Uuid::new_v4();
        let idempotency_key = if index == 0 {
            base_key.clone()
        } else {
            format!("{base_key}:{ledger_id}")
        };

        let entry = NewJournalEntry {
            id: entry_id,
            source_event_id: event.event_id,
            source_event_type: event.event_type.clone(),
            ledger_id: ledger_id.clone(),
            occurred_at: event.occurred_at,
            effective_date: intent.effective_date,
            posted_at: clock.now(),
            actor_id,
            reversal_of_id: None,
            idempotency_key: idempotency_key.clone(),
            posting_rule_version: intent.profile_version,
            coa_version: intent.snapshot_versions.coa_version,
            dimension_schema_version: intent.snapshot_versions.dimension_schema_version,
            rounding_policy_version: intent.snapshot_versions.rounding_policy_version,
            fx_rates_version: intent.snapshot_versions.fx_rates_version,
            seq,
            description: intent.description.clone(),
        };

        match journal_repo::insert_posted_entry(&mut sp, &entry).await {
            Ok(()) => {}
            Err(e) if journal_repo::is_idempotency_conflict(&e) => {
                // A concurrent twin committed first. Discard everything this
                // call staged and report the winner's identity.
                sp.rollback().await?;
                let winner =
                    journal_repo::find_posted_by_idempotency_prefix(tx, &base_key).await?;
                tracing::info!(
                    idempotency_key = %base_key,
                    "lost idempotency race, returning winner's identity"
                );
                return Ok(JournalResult::AlreadyPosted {
                    entries: winner
                        .into_iter()
                        .map(|e| PostedEntry {
                            entry_id: e.id,
                            ledger_id: e.ledger_id,
                            seq: e.seq.unwrap_or_default(),
                        })
                        .collect(),
                    idempotency_key: base_key,
                });
            }
            Err(e) => return Err(e.into()),
        }

        let new_lines: Vec<NewJournalLine> = lines
            .iter()
            .map(|l| NewJournalLine {
                account_id: l.account_id,
                side: l.side,
                amount: l.amount,
                currency: l.currency.clone(),
                dimensions: l
                    .dimensions
                    .as_ref()
                    .map(|d| serde_json::to_value(d).unwrap_or(serde_json::Value::Null)),
                is_rounding: l.is_rounding,
                line_memo: l.memo.clone(),
                exchange_rate_id: l.exchange_rate_id,
                line_seq: l.line_seq,
            })
            .collect();
        journal_repo::insert_lines(&mut sp, entry_id, &new_lines).await?;

        let (debit_total, credit_total) = totals(lines);
        audit_service::append(
            &mut sp,
            AuditAction::Posting,
            json!({
                "entry_id": entry_id.to_string(),
                "seq": seq,
                "ledger_id": ledger_id,
                "debit_total": debit_total.to_string(),
                "credit_total": credit_total.to_string(),
                "idempotency_key": idempotency_key,
                "snapshot_id": options.snapshot_id.map(|id| id.to_string()),
            }),
            actor_id,
            clock.now(),
        )
        .await?;

        tracing::info!(
            entry_id = %entry_id,
            seq,
            ledger_id = %ledger_id,
            lines = new_lines.len(),
            "journal entry posted"
        );

        posted.push(PostedEntry {
            entry_id,
            ledger_id: ledger_id.clone(),
            seq,
        });
    }

    sp.commit().await?;

    Ok(JournalResult::Posted { entries: posted })
}

fn check_period_eligibility(
    period: &FiscalPeriod,
    options: &WriteOptions,
) -> Result<(), LedgerError> {
    match period.status {
        PeriodStatus::Open => Ok(()),
        PeriodStatus::Locked => Err(LedgerError::PeriodLocked {
            period_code: period.period_code.clone(),
        }),
        PeriodStatus::Closed => {
            if options.is_adjustment {
                if period.allows_adjustments {
                    Ok(())
                } else {
                    Err(LedgerError::AdjustmentsNotAllowed {
                        period_code: period.period_code.clone(),
                    })
                }
            } else {
                Err(LedgerError::PeriodClosed {
                    period_code: period.period_code.clone(),
                })
            }
        }
        PeriodStatus::Closing => {
            let owned = matches!(
                (options.close_run_id, period.closing_run_id),
                (Some(run), Some(owner)) if run == owner
            );
            if owned {
                Ok(())
            } else {
                Err(LedgerError::PeriodClosed {
                    period_code: period.period_code.clone(),
                })
            }
        }
    }
}

#[derive(Debug, Clone)]
struct ResolvedLine {
    role: String,
    account_id: Uuid,
    side: Side,
    amount: Decimal,
    currency: String,
    dimensions: Option<BTreeMap<String, String>>,
    memo: Option<String>,
    exchange_rate_id: Option<Uuid>,
    is_rounding: bool,
    line_seq: i32,
}

/// Resolve every role, enforce account eligibility, round amounts HALF-UP,
/// absorb sub-tolerance drift with one synthetic rounding line, and assign
/// the deterministic line order.
async fn resolve_and_round(
    tx: &mut Transaction<'_, Postgres>,
    ledger: &LedgerIntent,
    intent: &AccountingIntent,
) -> Result<Vec<ResolvedLine>, LedgerError> {
    let mut resolved: Vec<ResolvedLine> = Vec::with_capacity(ledger.lines.len());
    let mut account_cache: BTreeMap<String, Account> = BTreeMap::new();

    for line in &ledger.lines {
        let account = match account_cache.get(&line.role) {
            Some(account) => account.clone(),
            None => {
                let account = role_resolver::resolve(
                    tx,
                    &line.role,
                    &ledger.ledger_id,
                    intent.effective_date,
                )
                .await?;
                account_cache.insert(line.role.clone(), account.clone());
                account
            }
        };

        if !account.is_active {
            return Err(LedgerError::AccountInactive {
                code: account.code.clone(),
            });
        }
        if let Some(restriction) = &account.currency {
            if restriction != &line.currency {
                return Err(LedgerError::CurrencyInvalid {
                    code: line.currency.clone(),
                });
            }
        }

        resolved.push(ResolvedLine {
            role: line.role.clone(),
            account_id: account.id,
            side: line.side,
            amount: currency::round_money(line.amount, &line.currency)?,
            currency: line.currency.clone(),
            dimensions: line.dimensions.clone(),
            memo: line.memo.clone(),
            exchange_rate_id: line.exchange_rate_id,
            is_rounding: false,
            line_seq: 0,
        });
    }

    // Post-rounding drift per currency. At most one currency may need the
    // synthetic line: a second drifting currency would demand a second
    // rounding line on the same entry, which the single-rounding-line
    // invariant forbids.
    let mut rounding_line: Option<ResolvedLine> = None;
    for ccy in AccountingIntent::currencies_of(ledger) {
        let mut debits = Decimal::ZERO;
        let mut credits = Decimal::ZERO;
        for line in resolved.iter().filter(|l| l.currency == ccy) {
            match line.side {
                Side::Debit => debits += line.amount,
                Side::Credit => credits += line.amount,
            }
        }

        let delta = debits - credits;
        if delta.is_zero() {
            continue;
        }

        let tolerance = currency::rounding_tolerance(&ccy)?;
        if delta.abs() > tolerance {
            return Err(LedgerError::Unbalanced {
                currency: ccy.clone(),
                debits: debits.to_string(),
                credits: credits.to_string(),
            });
        }

        if rounding_line.is_some() {
            return Err(LedgerError::ValidationFailed {
                reason: format!(
                    "rounding drift in more than one currency of ledger {}; at most one rounding line is allowed per entry",
                    ledger.ledger_id
                ),
            });
        }

        let rounding_account = account_repo::find_rounding_account(tx, &ccy)
            .await?
            .ok_or_else(|| LedgerError::ValidationFailed {
                reason: format!("no active rounding account exists for currency {ccy}"),
            })?;

        rounding_line = Some(ResolvedLine {
            role: String::new(),
            account_id: rounding_account.id,
            // The side that balances: excess debits are absorbed by a
            // credit, and vice versa.
            side: if delta > Decimal::ZERO {
                Side::Credit
            } else {
                Side::Debit
            },
            amount: delta.abs(),
            currency: ccy,
            dimensions: None,
            memo: Some("rounding".to_string()),
            exchange_rate_id: None,
            is_rounding: true,
            line_seq: 0,
        });
    }

    // Deterministic order: (role, currency, side) ascending, amount
    // descending; the rounding line always last.
    resolved.sort_by(|a, b| {
        (&a.role, &a.currency, a.side)
            .cmp(&(&b.role, &b.currency, b.side))
            .then(b.amount.cmp(&a.amount))
    });
    if let Some(line) = rounding_line {
        resolved.push(line);
    }
    for (i, line) in resolved.iter_mut().enumerate() {
        line.line_seq = i as i32;
    }

    Ok(resolved)
}

fn totals(lines: &[ResolvedLine]) -> (Decimal, Decimal) {
    let mut debits = Decimal::ZERO;
    let mut credits = Decimal::ZERO;
    for line in lines {
        match line.side {
            Side::Debit => debits += line.amount,
            Side::Credit => credits += line.amount,
        }
    }
    (debits, credits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn period(status: PeriodStatus, allows_adjustments: bool) -> FiscalPeriod {
        FiscalPeriod {
            id: Uuid::new_v4(),
            period_code: "2025-06".to_string(),
            name: "June 2025".to_string(),
            start_date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(),
            status,
            allows_adjustments,
            closing_run_id: None,
            closed_at: None,
            closed_by: None,
        }
    }

    #[test]
    fn open_period_accepts() {
        let opts = WriteOptions::default();
        assert!(check_period_eligibility(&period(PeriodStatus::Open, false), &opts).is_ok());
    }

    #[test]
    fn locked_period_rejects_unconditionally() {
        let opts = WriteOptions {
            is_adjustment: true,
            ..Default::default()
        };
        let err =
            check_period_eligibility(&period(PeriodStatus::Locked, true), &opts).unwrap_err();
        assert_eq!(err.code(), "PERIOD_LOCKED");
    }

    #[test]
    fn closed_period_rejects_normal_postings() {
        let opts = WriteOptions::default();
        let err =
            check_period_eligibility(&period(PeriodStatus::Closed, true), &opts).unwrap_err();
        assert_eq!(err.code(), "PERIOD_CLOSED");
    }

    #[test]
    fn closed_period_accepts_adjustment_when_allowed() {
        let opts = WriteOptions {
            is_adjustment: true,
            ..Default::default()
        };
        assert!(check_period_eligibility(&period(PeriodStatus::Closed, true), &opts).is_ok());

        let err =
            check_period_eligibility(&period(PeriodStatus::Closed, false), &opts).unwrap_err();
        assert_eq!(err.code(), "ADJUSTMENTS_NOT_ALLOWED");
    }

    #[test]
    fn closing_period_admits_only_its_own_run() {
        let run = Uuid::new_v4();
        let mut p = period(PeriodStatus::Closing, false);
        p.closing_run_id = Some(run);

        let owner = WriteOptions {
            close_run_id: Some(run),
            ..Default::default()
        };
        assert!(check_period_eligibility(&p, &owner).is_ok());

        let stranger = WriteOptions {
            close_run_id: Some(Uuid::new_v4()),
            ..Default::default()
        };
        assert_eq!(
            check_period_eligibility(&p, &stranger).unwrap_err().code(),
            "PERIOD_CLOSED"
        );

        let nobody = WriteOptions::default();
        assert_eq!(
            check_period_eligibility(&p, &nobody).unwrap_err().code(),
            "PERIOD_CLOSED"
        );
    }
}
