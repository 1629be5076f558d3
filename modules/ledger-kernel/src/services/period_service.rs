//! Fiscal period lifecycle: begin/abort close, close, lock.
//!
//! Every transition locks the period row, so a close racing with concurrent
//! posts serializes: each post either settled before the close became
//! visible or is rejected afterward. At most one close succeeds per period.

use serde_json::json;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::clock::Clock;
use crate::errors::LedgerError;
use crate::repos::period_repo::{self, FiscalPeriod, PeriodStatus};
use crate::services::audit_service::{self, AuditAction};

/// Move an OPEN period to CLOSING, claiming it for one close run.
///
/// Returns the run id; postings issued by the run present it to enter the
/// CLOSING period.
pub async fn begin_close(
    tx: &mut Transaction<'_, Postgres>,
    period_code: &str,
    actor_id: Uuid,
) -> Result<(FiscalPeriod, Uuid), LedgerError> {
    let period = fetch_locked(tx, period_code).await?;

    match period.status {
        PeriodStatus::Open => {}
        PeriodStatus::Closed | PeriodStatus::Locked => {
            return Err(LedgerError::PeriodAlreadyClosed {
                period_code: period.period_code,
            })
        }
        PeriodStatus::Closing => {
            return Err(LedgerError::ValidationFailed {
                reason: format!("period {} is already being closed", period.period_code),
            })
        }
    }

    let run_id = Uuid::new_v4();
    let updated =
        period_repo::transition(tx, &period, PeriodStatus::Closing, Some(run_id), None, None)
            .await?;

    tracing::info!(period_code, run_id = %run_id, actor_id = %actor_id, "period close started");

    Ok((updated, run_id))
}

/// Abort a CLOSING run, returning the period to OPEN.
pub async fn abort_close(
    tx: &mut Transaction<'_, Postgres>,
    period_code: &str,
    run_id: Uuid,
) -> Result<FiscalPeriod, LedgerError> {
    let period = fetch_locked(tx, period_code).await?;

    if period.status != PeriodStatus::Closing {
        return Err(LedgerError::ValidationFailed {
            reason: format!("period {} is not closing", period.period_code),
        });
    }
    if period.closing_run_id != Some(run_id) {
        return Err(LedgerError::ValidationFailed {
            reason: format!(
                "close run {run_id} does not own period {}",
                period.period_code
            ),
        });
    }

    period_repo::transition(tx, &period, PeriodStatus::Open, None, None, None)
        .await
        .map_err(Into::into)
}

/// Close a period. Succeeds from OPEN (direct close) or CLOSING (finishing
/// a run); a second close attempt fails with `PERIOD_ALREADY_CLOSED`.
///
/// Close refuses while DRAFT entries have an effective date inside the
/// period; drafts must be posted or deleted first, so none silently
/// outlives its period.
pub async fn close_period(
    tx: &mut Transaction<'_, Postgres>,
    clock: &dyn Clock,
    period_code: &str,
    actor_id: Uuid,
) -> Result<FiscalPeriod, LedgerError> {
    let period = fetch_locked(tx, period_code).await?;

    match period.status {
        PeriodStatus::Open | PeriodStatus::Closing => {}
        PeriodStatus::Closed | PeriodStatus::Locked => {
            return Err(LedgerError::PeriodAlreadyClosed {
                period_code: period.period_code,
            })
        }
    }

    let drafts = period_repo::draft_entries_in_range(tx, &period).await?;
    if !drafts.is_empty() {
        return Err(LedgerError::ValidationFailed {
            reason: format!(
                "period {} has {} draft journal entries in range: {:?}",
                period.period_code,
                drafts.len(),
                drafts
            ),
        });
    }

    let now = clock.now();
    let updated = period_repo::transition(
        tx,
        &period,
        PeriodStatus::Closed,
        None,
        Some(now),
        Some(actor_id),
    )
    .await?;

    audit_service::append(
        tx,
        AuditAction::PeriodClosed,
        json!({
            "period_id": updated.id.to_string(),
            "period_code": updated.period_code.clone(),
            "start_date": updated.start_date.to_string(),
            "end_date": updated.end_date.to_string(),
        }),
        actor_id,
        now,
    )
    .await?;

    tracing::info!(period_code, actor_id = %actor_id, "period closed");

    Ok(updated)
}

/// Fetch a period under a row lock, failing if it does not exist.
async fn fetch_locked(
    tx: &mut Transaction<'_, Postgres>,
    period_code: &str,
) -> Result<FiscalPeriod, LedgerError> {
    period_repo::find_by_code_for_update(tx, period_code)
        .await?
        .ok_or_else(|| LedgerError::ValidationFailed {
            reason: format!("period {period_code} does not exist"),
        })
}

/// Transition a CLOSED period to LOCKED with an audit trail.
pub async fn lock_closed_period(
    tx: &mut Transaction<'_, Postgres>,
    clock: &dyn Clock,
    period_code: &str,
    actor_id: Uuid,
) -> Result<FiscalPeriod, LedgerError> {
    let period = fetch_locked(tx, period_code).await?;

    if period.status != PeriodStatus::Closed {
        return Err(LedgerError::ImmutabilityViolation {
            entity: "fiscal_period",
            id: period.id.to_string(),
            reason: format!(
                "only a closed period can be locked, status is {}",
                period.status.as_str()
            ),
        });
    }

    let now = clock.now();
    let updated = period_repo::transition(
        tx,
        &period,
        PeriodStatus::Locked,
        None,
        period.closed_at,
        period.closed_by,
    )
    .await?;

    audit_service::append(
        tx,
        AuditAction::PeriodLocked,
        json!({
            "period_id": updated.id.to_string(),
            "period_code": updated.period_code.clone(),
        }),
        actor_id,
        now,
    )
    .await?;

    Ok(updated)
}
