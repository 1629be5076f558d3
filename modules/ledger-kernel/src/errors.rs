//! Kernel error type with stable machine-readable codes.
//!
//! Callers branch on [`LedgerError::code`], never on message text. The code
//! set is part of the external contract and must not change meaning between
//! releases.

use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

use crate::contracts::reference_snapshot::DriftError;

/// Result alias used across kernel services.
pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    // -- Idempotency ---------------------------------------------------------
    #[error("event {event_id} was already ingested with a different payload hash (stored {stored}, got {submitted})")]
    PayloadMismatch {
        event_id: Uuid,
        stored: String,
        submitted: String,
    },

    // -- Validation ----------------------------------------------------------
    #[error("entry is unbalanced for {currency}: debits {debits} != credits {credits}")]
    Unbalanced {
        currency: String,
        debits: String,
        credits: String,
    },

    #[error("currency is not registered or not allowed here: {code}")]
    CurrencyInvalid { code: String },

    #[error("invalid exchange rate: {reason}")]
    InvalidExchangeRate { reason: String },

    #[error("validation failed: {reason}")]
    ValidationFailed { reason: String },

    // -- Policy --------------------------------------------------------------
    #[error("no fiscal period covers effective date {effective_date}")]
    PeriodNotFound { effective_date: NaiveDate },

    #[error("period {period_code} is closed")]
    PeriodClosed { period_code: String },

    #[error("period {period_code} is locked")]
    PeriodLocked { period_code: String },

    #[error("period {period_code} does not allow adjusting entries")]
    AdjustmentsNotAllowed { period_code: String },

    #[error("period {period_code} is already closed")]
    PeriodAlreadyClosed { period_code: String },

    #[error("role {role} did not resolve for ledger {ledger_id}: {reason}")]
    RoleUnresolved {
        role: String,
        ledger_id: String,
        reason: String,
    },

    #[error("account {code} is inactive")]
    AccountInactive { code: String },

    #[error("interpretation blocked by guard {reason_code}: {message}")]
    GuardBlocked { reason_code: String, message: String },

    // -- Immutability --------------------------------------------------------
    #[error("immutability violation on {entity} {id}: {reason}")]
    ImmutabilityViolation {
        entity: &'static str,
        id: String,
        reason: String,
    },

    #[error("account {id} is referenced by posted journal lines and cannot be deleted")]
    AccountReferenced { id: Uuid },

    #[error("exchange rate {id} is referenced by journal lines; rate is frozen")]
    ExchangeRateImmutable { id: Uuid },

    #[error("exchange rate {id} is referenced by journal lines and cannot be deleted")]
    ExchangeRateReferenced { id: Uuid },

    // -- Integrity -----------------------------------------------------------
    #[error("reference snapshot {snapshot_id} no longer matches current data ({} drifted components)", .errors.len())]
    SnapshotIntegrity {
        snapshot_id: Uuid,
        errors: Vec<DriftError>,
    },

    #[error("audit chain integrity failure at seq {seq}: {detail}")]
    AuditChainCorrupted { seq: i64, detail: String },

    // -- Infrastructure ------------------------------------------------------
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl LedgerError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PayloadMismatch { .. } => "PAYLOAD_MISMATCH",
            Self::Unbalanced { .. } => "UNBALANCED",
            Self::CurrencyInvalid { .. } => "CURRENCY_INVALID",
            Self::InvalidExchangeRate { .. } => "INVALID_EXCHANGE_RATE",
            Self::ValidationFailed { .. } => "VALIDATION_FAILED",
            Self::PeriodNotFound { .. } => "PERIOD_NOT_FOUND",
            Self::PeriodClosed { .. } => "PERIOD_CLOSED",
            Self::PeriodLocked { .. } => "PERIOD_LOCKED",
            Self::AdjustmentsNotAllowed { .. } => "ADJUSTMENTS_NOT_ALLOWED",
            Self::PeriodAlreadyClosed { .. } => "PERIOD_ALREADY_CLOSED",
            Self::RoleUnresolved { .. } => "ROLE_UNRESOLVED",
            Self::AccountInactive { .. } => "ACCOUNT_INACTIVE",
            Self::GuardBlocked { .. } => "GUARD_BLOCKED",
            Self::ImmutabilityViolation { .. } => "IMMUTABILITY_VIOLATION",
            Self::AccountReferenced { .. } => "ACCOUNT_REFERENCED",
            Self::ExchangeRateImmutable { .. } => "EXCHANGE_RATE_IMMUTABLE",
            Self::ExchangeRateReferenced { .. } => "EXCHANGE_RATE_REFERENCED",
            Self::SnapshotIntegrity { .. } => "SNAPSHOT_INTEGRITY",
            Self::AuditChainCorrupted { .. } => "AUDIT_CHAIN_CORRUPTED",
            Self::Database(_) => "DATABASE",
        }
    }

    /// Whether the coordinator should record a rejection outcome for this
    /// error instead of letting the transaction abort.
    ///
    /// Validation and policy refusals are recorded and surfaced typed;
    /// immutability and integrity errors abort.
    pub fn is_recordable_rejection(&self) -> bool {
        matches!(
            self,
            Self::Unbalanced { .. }
                | Self::CurrencyInvalid { .. }
                | Self::InvalidExchangeRate { .. }
                | Self::ValidationFailed { .. }
                | Self::PeriodNotFound { .. }
                | Self::PeriodClosed { .. }
                | Self::PeriodLocked { .. }
                | Self::AdjustmentsNotAllowed { .. }
                | Self::RoleUnresolved { .. }
                | Self::AccountInactive { .. }
                | Self::GuardBlocked { .. }
        )
    }
}
