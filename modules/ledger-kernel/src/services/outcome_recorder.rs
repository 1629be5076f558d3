//! Records the interpretation outcome linking event ↔ economic event ↔
//! journal entries, or the typed rejection when nothing was posted.

use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::clock::Clock;
use crate::contracts::meaning::EconomicEventData;
use crate::errors::LedgerError;
use crate::repos::outcome_repo::{self, EconomicEvent, InterpretationOutcome};

pub const STATUS_POSTED: &str = "posted";
pub const STATUS_REJECTED: &str = "rejected";

/// Persist the economic event and the successful outcome row.
pub async fn record_success(
    tx: &mut Transaction<'_, Postgres>,
    clock: &dyn Clock,
    data: &EconomicEventData,
    journal_entry_ids: &[Uuid],
) -> Result<(EconomicEvent, InterpretationOutcome), LedgerError> {
    let now = clock.now();
    let economic_event = outcome_repo::insert_economic_event(tx, data, now).await?;
    let outcome = outcome_repo::insert_outcome(
        tx,
        data.source_event_id,
        STATUS_POSTED,
        None,
        None,
        Some(economic_event.id),
        Some(journal_entry_ids),
        now,
    )
    .await?;

    Ok((economic_event, outcome))
}

/// Persist a rejection outcome. No economic event, no journal artifact.
pub async fn record_rejection(
    tx: &mut Transaction<'_, Postgres>,
    clock: &dyn Clock,
    source_event_id: Uuid,
    reason_code: &str,
    message: &str,
) -> Result<InterpretationOutcome, LedgerError> {
    let outcome = outcome_repo::insert_outcome(
        tx,
        source_event_id,
        STATUS_REJECTED,
        Some(reason_code),
        Some(message),
        None,
        None,
        clock.now(),
    )
    .await?;

    tracing::info!(
        source_event_id = %source_event_id,
        reason_code,
        "interpretation rejected"
    );

    Ok(outcome)
}
