//! Reversal of posted journal entries.
//!
//! A reversal never mutates the original lines: it creates a new POSTED
//! entry whose lines mirror the original with sides swapped, links it via
//! `reversal_of_id`, and applies the one legal POSTED->REVERSED status
//! transition to the original.

use serde_json::json;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use chrono::NaiveDate;

use crate::clock::Clock;
use crate::errors::LedgerError;
use crate::repos::journal_repo::{self, EntryStatus, NewJournalEntry, NewJournalLine};
use crate::repos::period_repo::{self, PeriodStatus};
use crate::repos::sequence_repo;
use crate::services::audit_service::{self, AuditAction};
use crate::services::journal_writer::PostedEntry;

/// Reverse a posted entry.
///
/// The reversal's effective date defaults to the original's; an explicit
/// date lets a closed-period entry be reversed into the current open
/// period.
pub async fn reverse_entry(
    tx: &mut Transaction<'_, Postgres>,
    clock: &dyn Clock,
    entry_id: Uuid,
    actor_id: Uuid,
    effective_date: Option<NaiveDate>,
) -> Result<PostedEntry, LedgerError> {
    let original = journal_repo::find_entry_tx(tx, entry_id)
        .await?
        .ok_or_else(|| LedgerError::ValidationFailed {
            reason: format!("journal entry {entry_id} not found"),
        })?;

    if original.status != EntryStatus::Posted {
        return Err(LedgerError::ValidationFailed {
            reason: format!("only a POSTED entry can be reversed, {entry_id} is not"),
        });
    }
    if journal_repo::has_reversal(tx, entry_id).await? {
        return Err(LedgerError::ValidationFailed {
            reason: format!("entry {entry_id} already has a reversal"),
        });
    }

    let effective_date = effective_date.unwrap_or(original.effective_date);
    let period = period_repo::find_covering_for_share(tx, effective_date)
        .await?
        .ok_or(LedgerError::PeriodNotFound { effective_date })?;
    match period.status {
        PeriodStatus::Open => {}
        PeriodStatus::Locked => {
            return Err(LedgerError::PeriodLocked {
                period_code: period.period_code,
            })
        }
        _ => {
            return Err(LedgerError::PeriodClosed {
                period_code: period.period_code,
            })
        }
    }

    let lines = journal_repo::find_lines_tx(tx, entry_id).await?;
    let now = clock.now();
    let seq = sequence_repo::next_value(tx, sequence_repo::JOURNAL_ENTRY).await?;
    let reversal_id = Uuid::new_v4();

    let entry = NewJournalEntry {
        id: reversal_id,
        source_event_id: original.source_event_id,
        source_event_type: original.source_event_type.clone(),
        ledger_id: original.ledger_id.clone(),
        occurred_at: now,
        effective_date,
        posted_at: now,
        actor_id,
        reversal_of_id: Some(entry_id),
        idempotency_key: format!("{}:reversal", original.idempotency_key),
        posting_rule_version: original.posting_rule_version,
        coa_version: original.coa_version.unwrap_or(1),
        dimension_schema_version: original.dimension_schema_version.unwrap_or(1),
        rounding_policy_version: original.rounding_policy_version.unwrap_or(1),
        fx_rates_version: original.fx_rates_version.unwrap_or(1),
        seq,
        description: Some(format!(
            "Reversal of {}",
            original.description.as_deref().unwrap_or("entry")
        )),
    };
    journal_repo::insert_posted_entry(tx, &entry).await?;

    let mirrored: Vec<NewJournalLine> = lines
        .iter()
        .map(|l| NewJournalLine {
            account_id: l.account_id,
            side: l.side.opposite(),
            amount: l.amount,
            currency: l.currency.clone(),
            dimensions: l.dimensions.clone(),
            is_rounding: l.is_rounding,
            line_memo: l.line_memo.clone(),
            exchange_rate_id: l.exchange_rate_id,
            line_seq: l.line_seq,
        })
        .collect();
    journal_repo::insert_lines(tx, reversal_id, &mirrored).await?;

    journal_repo::mark_reversed(tx, entry_id).await?;

    audit_service::append(
        tx,
        AuditAction::Reversal,
        json!({
            "entry_id": reversal_id.to_string(),
            "seq": seq,
            "reverses_entry_id": entry_id.to_string(),
            "ledger_id": original.ledger_id.clone(),
        }),
        actor_id,
        now,
    )
    .await?;

    tracing::info!(
        entry_id = %reversal_id,
        reverses = %entry_id,
        seq,
        "journal entry reversed"
    );

    Ok(PostedEntry {
        entry_id: reversal_id,
        ledger_id: original.ledger_id,
        seq,
    })
}
