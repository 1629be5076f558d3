//! The interpretation coordinator: the end-to-end posting pipeline.
//!
//! Owns no state; composes snapshot capture, ingestion, meaning building,
//! the journal writer, and outcome recording inside the caller's
//! transaction. It never commits and never rolls back; the transaction
//! boundary belongs to the caller.

use std::sync::Arc;

use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::clock::Clock;
use crate::contracts::accounting_intent::AccountingIntent;
use crate::contracts::meaning::MeaningResult;
use crate::contracts::policy::PolicyRegistry;
use crate::contracts::reference_snapshot::SnapshotRequest;
use crate::errors::LedgerError;
use crate::repos::event_repo::NewEvent;
use crate::services::ingest_service;
use crate::services::journal_writer::{self, JournalResult, PostedEntry, WriteOptions};
use crate::services::meaning_builder;
use crate::services::outcome_recorder;
use crate::services::snapshot_service::SnapshotService;

/// Typed outcome of one posting attempt.
#[derive(Debug, Clone)]
pub enum PostingOutcome {
    Posted {
        entries: Vec<PostedEntry>,
        economic_event_id: Uuid,
        snapshot_id: Uuid,
    },
    AlreadyPosted {
        entries: Vec<PostedEntry>,
        idempotency_key: String,
    },
    Rejected {
        reason_code: String,
        message: String,
    },
}

pub struct InterpretationCoordinator {
    clock: Arc<dyn Clock>,
    registry: Arc<PolicyRegistry>,
    snapshots: Arc<SnapshotService>,
}

impl InterpretationCoordinator {
    pub fn new(
        clock: Arc<dyn Clock>,
        registry: Arc<PolicyRegistry>,
        snapshots: Arc<SnapshotService>,
    ) -> Self {
        Self {
            clock,
            registry,
            snapshots,
        }
    }

    /// Run the full pipeline for one event + intent.
    ///
    /// Guard blocks and policy/validation refusals are recorded as
    /// rejection outcomes and returned typed; the event envelope and the
    /// outcome row survive the caller's commit, but no journal artifact is
    /// created. Immutability and infrastructure errors propagate as `Err`
    /// and should abort the caller's transaction.
    pub async fn interpret_and_post(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        envelope: &NewEvent,
        intent: &AccountingIntent,
        actor_id: Uuid,
        is_adjustment: bool,
    ) -> Result<PostingOutcome, LedgerError> {
        let snapshot = self
            .snapshots
            .capture(tx, &SnapshotRequest::all_components(actor_id))
            .await?;

        let (event, _) = ingest_service::ingest(tx, self.clock.as_ref(), envelope).await?;

        let meaning = meaning_builder::build(&event, &snapshot, &self.registry);
        let economic_data = match meaning {
            MeaningResult::Blocked(rejection) => {
                outcome_recorder::record_rejection(
                    tx,
                    self.clock.as_ref(),
                    event.event_id,
                    &rejection.reason_code,
                    &rejection.message,
                )
                .await?;
                return Ok(PostingOutcome::Rejected {
                    reason_code: rejection.reason_code,
                    message: rejection.message,
                });
            }
            MeaningResult::Ok(data) => data,
        };

        let options = WriteOptions {
            is_adjustment,
            close_run_id: None,
            snapshot_id: Some(snapshot.snapshot_id),
        };

        let result = journal_writer::write(
            tx,
            self.clock.as_ref(),
            intent,
            &event,
            actor_id,
            &options,
        )
        .await;

        match result {
            Ok(JournalResult::Posted { entries }) => {
                let entry_ids: Vec<Uuid> = entries.iter().map(|e| e.entry_id).collect();
                let (economic_event, _) = outcome_recorder::record_success(
                    tx,
                    self.clock.as_ref(),
                    &economic_data,
                    &entry_ids,
                )
                .await?;

                tracing::info!(
                    event_id = %event.event_id,
                    economic_event_id = %economic_event.id,
                    entries = entry_ids.len(),
                    "posting pipeline completed"
                );

                Ok(PostingOutcome::Posted {
                    entries,
                    economic_event_id: economic_event.id,
                    snapshot_id: snapshot.snapshot_id,
                })
            }
            Ok(JournalResult::AlreadyPosted {
                entries,
                idempotency_key,
            }) => Ok(PostingOutcome::AlreadyPosted {
                entries,
                idempotency_key,
            }),
            Err(err) if err.is_recordable_rejection() => {
                let reason_code = err.code().to_string();
                let message = err.to_string();
                outcome_recorder::record_rejection(
                    tx,
                    self.clock.as_ref(),
                    event.event_id,
                    &reason_code,
                    &message,
                )
                .await?;
                Ok(PostingOutcome::Rejected {
                    reason_code,
                    message,
                })
            }
            Err(err) => Err(err),
        }
    }
}
