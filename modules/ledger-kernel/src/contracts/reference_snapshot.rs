//! Reference snapshot value objects.
//!
//! A snapshot is an immutable, content-hashed capture of all reference data
//! in effect during one interpretation. Version integers are row-count
//! proxies; uniqueness is guaranteed by the content hash, not the version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::contracts::accounting_intent::SnapshotVersions;

/// Components a snapshot can capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotComponent {
    ChartOfAccounts,
    DimensionSchema,
    FxRates,
    RoundingPolicy,
    TaxRules,
    PolicyRegistry,
    AccountRoles,
}

impl SnapshotComponent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChartOfAccounts => "chart_of_accounts",
            Self::DimensionSchema => "dimension_schema",
            Self::FxRates => "fx_rates",
            Self::RoundingPolicy => "rounding_policy",
            Self::TaxRules => "tax_rules",
            Self::PolicyRegistry => "policy_registry",
            Self::AccountRoles => "account_roles",
        }
    }

    pub const ALL: [SnapshotComponent; 7] = [
        Self::ChartOfAccounts,
        Self::DimensionSchema,
        Self::FxRates,
        Self::RoundingPolicy,
        Self::TaxRules,
        Self::PolicyRegistry,
        Self::AccountRoles,
    ];
}

/// One component's frozen version: (version, content hash, effective from).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentVersion {
    pub component: SnapshotComponent,
    pub version: i64,
    pub content_hash: String,
    pub effective_from: DateTime<Utc>,
}

/// Immutable bundle of component versions captured at posting time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceSnapshot {
    pub snapshot_id: Uuid,
    pub captured_at: DateTime<Utc>,
    pub captured_by: Uuid,
    pub components: Vec<ComponentVersion>,
}

impl ReferenceSnapshot {
    pub fn component(&self, which: SnapshotComponent) -> Option<&ComponentVersion> {
        self.components.iter().find(|cv| cv.component == which)
    }

    pub fn version_of(&self, which: SnapshotComponent) -> Option<i64> {
        self.component(which).map(|cv| cv.version)
    }

    /// The four version integers recorded on journal entries and economic
    /// events. Missing components default to version 1 (static data).
    pub fn versions(&self) -> SnapshotVersions {
        SnapshotVersions {
            coa_version: self.version_of(SnapshotComponent::ChartOfAccounts).unwrap_or(1),
            dimension_schema_version: self
                .version_of(SnapshotComponent::DimensionSchema)
                .unwrap_or(1),
            rounding_policy_version: self
                .version_of(SnapshotComponent::RoundingPolicy)
                .unwrap_or(1),
            fx_rates_version: self.version_of(SnapshotComponent::FxRates).unwrap_or(1),
        }
    }
}

/// What to capture, for whom, and optionally as of when.
#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    pub components: Vec<SnapshotComponent>,
    pub requested_by: Uuid,
    pub as_of: Option<DateTime<Utc>>,
}

impl SnapshotRequest {
    pub fn all_components(requested_by: Uuid) -> Self {
        Self {
            components: SnapshotComponent::ALL.to_vec(),
            requested_by,
            as_of: None,
        }
    }
}

/// One component whose current content hash no longer matches the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftError {
    pub snapshot_id: Uuid,
    pub component: SnapshotComponent,
    pub expected_hash: String,
    pub actual_hash: String,
    pub message: String,
}

/// Outcome of snapshot integrity validation.
#[derive(Debug, Clone)]
pub enum SnapshotValidation {
    Valid { snapshot_id: Uuid },
    Invalid { snapshot_id: Uuid, errors: Vec<DriftError> },
}

impl SnapshotValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, SnapshotValidation::Valid { .. })
    }

    /// Promote drift into the hard `SNAPSHOT_INTEGRITY` error.
    pub fn into_result(self) -> Result<Uuid, crate::errors::LedgerError> {
        match self {
            SnapshotValidation::Valid { snapshot_id } => Ok(snapshot_id),
            SnapshotValidation::Invalid {
                snapshot_id,
                errors,
            } => Err(crate::errors::LedgerError::SnapshotIntegrity {
                snapshot_id,
                errors,
            }),
        }
    }
}
