//! Tamper-evident audit chain.
//!
//! Every lifecycle action appends one row whose hash covers the canonical
//! serialization of `(seq, action, payload, actor, occurred_at, prev_hash)`.
//! The chain is linear: each non-genesis row's `prev_hash` equals the hash
//! of the row at `seq - 1`. The unique index on `seq` prevents forks.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::canonical::{self, GENESIS_HASH};
use crate::errors::LedgerError;
use crate::repos::{audit_repo, sequence_repo};

pub use crate::repos::audit_repo::AuditEvent;

/// Closed set of audited lifecycle actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Posting,
    Reversal,
    PeriodClosed,
    PeriodLocked,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Posting => "POSTING",
            Self::Reversal => "REVERSAL",
            Self::PeriodClosed => "PERIOD_CLOSED",
            Self::PeriodLocked => "PERIOD_LOCKED",
        }
    }
}

/// Canonical hash of one audit row's content.
///
/// The timestamp is fixed to RFC 3339 with microsecond precision so the
/// string form is identical between hashing and verification.
pub fn compute_hash(
    seq: i64,
    action: &str,
    payload: &Value,
    actor_id: Uuid,
    occurred_at: DateTime<Utc>,
    prev_hash: &str,
) -> String {
    let record = json!({
        "seq": seq,
        "action": action,
        "payload": payload,
        "actor_id": actor_id.to_string(),
        "occurred_at": occurred_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        "prev_hash": prev_hash,
    });
    canonical::hash_value(&record)
}

/// Append one audit event to the chain inside the caller's transaction.
pub async fn append(
    tx: &mut Transaction<'_, Postgres>,
    action: AuditAction,
    payload: Value,
    actor_id: Uuid,
    occurred_at: DateTime<Utc>,
) -> Result<AuditEvent, LedgerError> {
    let seq = sequence_repo::next_value(tx, sequence_repo::AUDIT_EVENT).await?;

    let prev_hash = if seq == 1 {
        GENESIS_HASH.to_string()
    } else {
        match audit_repo::find_by_seq(tx, seq - 1).await? {
            Some(prev) => prev.hash,
            // The predecessor was allocated by a transaction that rolled
            // back; its seq is a permanent gap. Walk back to the newest
            // persisted row.
            None => latest_hash_before(tx, seq).await?,
        }
    };

    let hash = compute_hash(seq, action.as_str(), &payload, actor_id, occurred_at, &prev_hash);

    let row = audit_repo::insert(
        tx,
        seq,
        action.as_str(),
        &payload,
        actor_id,
        occurred_at,
        &prev_hash,
        &hash,
    )
    .await?;

    tracing::debug!(seq, action = action.as_str(), "audit event appended");

    Ok(row)
}

async fn latest_hash_before(
    tx: &mut Transaction<'_, Postgres>,
    seq: i64,
) -> Result<String, sqlx::Error> {
    let hash = sqlx::query_scalar::<_, String>(
        "SELECT hash FROM audit_events WHERE seq < $1 ORDER BY seq DESC LIMIT 1",
    )
    .bind(seq)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(hash.unwrap_or_else(|| GENESIS_HASH.to_string()))
}

/// Result of a full chain walk.
#[derive(Debug, Clone)]
pub struct ChainReport {
    pub length: usize,
    pub tail_hash: Option<String>,
}

/// Walk the chain in seq order, recomputing every hash and checking the
/// prev_hash linkage. Any mismatch is corruption and surfaces as an error.
pub async fn validate_chain(pool: &PgPool) -> Result<ChainReport, LedgerError> {
    let rows = audit_repo::list_ordered(pool).await?;

    let mut expected_prev = GENESIS_HASH.to_string();
    for row in &rows {
        if row.prev_hash != expected_prev {
            return Err(LedgerError::AuditChainCorrupted {
                seq: row.seq,
                detail: format!(
                    "prev_hash {} does not match predecessor hash {}",
                    row.prev_hash, expected_prev
                ),
            });
        }

        let recomputed = compute_hash(
            row.seq,
            &row.action,
            &row.payload,
            row.actor_id,
            row.occurred_at,
            &row.prev_hash,
        );
        if recomputed != row.hash {
            return Err(LedgerError::AuditChainCorrupted {
                seq: row.seq,
                detail: format!("stored hash {} but recomputed {}", row.hash, recomputed),
            });
        }

        expected_prev = row.hash.clone();
    }

    Ok(ChainReport {
        length: rows.len(),
        tail_hash: rows.last().map(|r| r.hash.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn hash_is_deterministic() {
        let payload = json!({ "entry_id": "e-1", "seq": 1 });
        let actor = Uuid::nil();
        let a = compute_hash(1, "POSTING", &payload, actor, fixed_instant(), GENESIS_HASH);
        let b = compute_hash(1, "POSTING", &payload, actor, fixed_instant(), GENESIS_HASH);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn hash_covers_every_field() {
        let payload = json!({ "x": 1 });
        let actor = Uuid::nil();
        let base = compute_hash(1, "POSTING", &payload, actor, fixed_instant(), GENESIS_HASH);

        assert_ne!(
            base,
            compute_hash(2, "POSTING", &payload, actor, fixed_instant(), GENESIS_HASH)
        );
        assert_ne!(
            base,
            compute_hash(1, "REVERSAL", &payload, actor, fixed_instant(), GENESIS_HASH)
        );
        assert_ne!(
            base,
            compute_hash(1, "POSTING", &json!({ "x": 2 }), actor, fixed_instant(), GENESIS_HASH)
        );
        assert_ne!(
            base,
            compute_hash(
                1,
                "POSTING",
                &payload,
                actor,
                fixed_instant() + chrono::Duration::microseconds(1),
                GENESIS_HASH
            )
        );
        let other_prev = compute_hash(0, "X", &payload, actor, fixed_instant(), GENESIS_HASH);
        assert_ne!(
            base,
            compute_hash(1, "POSTING", &payload, actor, fixed_instant(), &other_prev)
        );
    }

    #[test]
    fn payload_key_order_does_not_matter() {
        let actor = Uuid::nil();
        let mut first = serde_json::Map::new();
        first.insert("b".into(), json!(2));
        first.insert("a".into(), json!(1));
        let mut second = serde_json::Map::new();
        second.insert("a".into(), json!(1));
        second.insert("b".into(), json!(2));

        assert_eq!(
            compute_hash(1, "POSTING", &Value::Object(first), actor, fixed_instant(), GENESIS_HASH),
            compute_hash(1, "POSTING", &Value::Object(second), actor, fixed_instant(), GENESIS_HASH),
        );
    }

    #[test]
    fn action_names_are_stable() {
        assert_eq!(AuditAction::Posting.as_str(), "POSTING");
        assert_eq!(AuditAction::Reversal.as_str(), "REVERSAL");
        assert_eq!(AuditAction::PeriodClosed.as_str(), "PERIOD_CLOSED");
        assert_eq!(AuditAction::PeriodLocked.as_str(), "PERIOD_LOCKED");
    }
}
