//! Outputs of the meaning builder: the interpreted economic fact, or a
//! declarative guard rejection.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::contracts::accounting_intent::SnapshotVersions;

/// The economic interpretation of one source event under one profile version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomicEventData {
    pub source_event_id: Uuid,
    pub economic_type: String,
    pub quantity: Option<Decimal>,
    pub dimensions: Option<BTreeMap<String, String>>,
    pub effective_date: NaiveDate,
    pub profile_id: String,
    pub profile_version: i32,
    pub profile_hash: Option<String>,
    pub value: Option<Decimal>,
    pub currency: Option<String>,
    pub snapshot_versions: SnapshotVersions,
}

/// A guard refused the interpretation. Recorded as a rejection outcome; no
/// journal artifact is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardRejection {
    pub reason_code: String,
    pub message: String,
    #[serde(default)]
    pub detail: Option<serde_json::Value>,
}

impl GuardRejection {
    /// The caller-facing `GUARD_BLOCKED` error carrying this rejection.
    pub fn into_error(self) -> crate::errors::LedgerError {
        crate::errors::LedgerError::GuardBlocked {
            reason_code: self.reason_code,
            message: self.message,
        }
    }
}

/// Discriminated result of the meaning builder.
#[derive(Debug, Clone)]
pub enum MeaningResult {
    Ok(EconomicEventData),
    Blocked(GuardRejection),
}

impl MeaningResult {
    pub fn is_blocked(&self) -> bool {
        matches!(self, MeaningResult::Blocked(_))
    }
}
