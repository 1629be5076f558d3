//! Idempotent event ingestion.
//!
//! The same event id may be submitted any number of times with an identical
//! payload; only the first insert writes. A resubmission with a different
//! payload hash is a hard `PAYLOAD_MISMATCH` and mutates nothing. Concurrent
//! twins racing on the unique event id are resolved by the index: the loser
//! observes the violation inside a savepoint and degrades to a no-op.

use sqlx::{Acquire, Postgres, Transaction};

use crate::canonical;
use crate::clock::Clock;
use crate::errors::LedgerError;
use crate::repos::event_repo::{self, EventEnvelope, NewEvent};

/// What happened to the submitted envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Ingested,
    AlreadyIngested,
}

fn is_event_id_conflict(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.constraint())
        .map(|c| c == "uq_event_id")
        .unwrap_or(false)
}

/// Ingest an event envelope, returning the stored row either way.
pub async fn ingest(
    tx: &mut Transaction<'_, Postgres>,
    clock: &dyn Clock,
    event: &NewEvent,
) -> Result<(EventEnvelope, IngestOutcome), LedgerError> {
    let payload_hash = canonical::hash_value(&event.payload);

    if let Some(existing) = event_repo::find_by_event_id_tx(tx, event.event_id).await? {
        return verify_existing(existing, event, &payload_hash);
    }

    let ingested_at = clock.now();
    let mut sp = tx.begin().await?;
    match event_repo::insert(&mut sp, event, &payload_hash, ingested_at).await {
        Ok(stored) => {
            sp.commit().await?;
            tracing::info!(
                event_id = %stored.event_id,
                event_type = %stored.event_type,
                producer = %stored.producer,
                "event ingested"
            );
            Ok((stored, IngestOutcome::Ingested))
        }
        Err(e) if is_event_id_conflict(&e) => {
            // A concurrent twin committed the same event id first.
            sp.rollback().await?;
            let existing = event_repo::find_by_event_id_tx(tx, event.event_id)
                .await?
                .ok_or(LedgerError::Database(e))?;
            verify_existing(existing, event, &payload_hash)
        }
        Err(e) => Err(e.into()),
    }
}

fn verify_existing(
    existing: EventEnvelope,
    event: &NewEvent,
    payload_hash: &str,
) -> Result<(EventEnvelope, IngestOutcome), LedgerError> {
    if existing.payload_hash == payload_hash {
        tracing::debug!(event_id = %event.event_id, "event already ingested");
        Ok((existing, IngestOutcome::AlreadyIngested))
    } else {
        Err(LedgerError::PayloadMismatch {
            event_id: event.event_id,
            stored: existing.payload_hash,
            submitted: payload_hash.to_string(),
        })
    }
}
