//! Transaction-owning convenience wrapper for module callers.
//!
//! The kernel itself never commits; this thin service is the caller side of
//! that contract. It opens one transaction per posting, runs the
//! coordinator, and commits, or rolls back when the pipeline surfaces a
//! hard error. Modules that manage their own transaction scope use the
//! coordinator directly instead.

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;

use crate::contracts::accounting_intent::AccountingIntent;
use crate::errors::LedgerError;
use crate::repos::event_repo::NewEvent;
use crate::services::interpretation_coordinator::{
    InterpretationCoordinator, PostingOutcome,
};

pub struct PostingService {
    pool: PgPool,
    coordinator: Arc<InterpretationCoordinator>,
}

impl PostingService {
    pub fn new(pool: PgPool, coordinator: Arc<InterpretationCoordinator>) -> Self {
        Self { pool, coordinator }
    }

    /// Post one event + intent in its own transaction.
    ///
    /// Typed rejections (guard blocks, closed periods, unbalanced intents)
    /// commit; the envelope and the rejection outcome are durable facts.
    /// Hard errors roll everything back atomically.
    pub async fn post(
        &self,
        envelope: &NewEvent,
        intent: &AccountingIntent,
        actor_id: Uuid,
        is_adjustment: bool,
    ) -> Result<PostingOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;

        match self
            .coordinator
            .interpret_and_post(&mut tx, envelope, intent, actor_id, is_adjustment)
            .await
        {
            Ok(outcome) => {
                tx.commit().await?;
                Ok(outcome)
            }
            Err(err) => {
                tx.rollback().await?;
                tracing::error!(
                    event_id = %envelope.event_id,
                    code = err.code(),
                    "posting aborted: {err}"
                );
                Err(err)
            }
        }
    }
}
