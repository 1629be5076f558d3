//! Reference snapshot capture and drift detection.
//!
//! A snapshot freezes the economic reality a posting was interpreted under:
//! for each reference component it records a version (row-count proxy), a
//! canonical content hash, and the effective instant. Validation recomputes
//! every hash against current data; any mismatch is drift, never silently
//! recovered; that is the replay-determinism guarantee.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::canonical;
use crate::clock::Clock;
use crate::contracts::policy::PolicyRegistry;
use crate::contracts::reference_snapshot::{
    ComponentVersion, DriftError, ReferenceSnapshot, SnapshotComponent, SnapshotRequest,
    SnapshotValidation,
};
use crate::currency;
use crate::errors::LedgerError;
use crate::repos::{account_repo, dimension_repo, exchange_rate_repo, role_repo};

/// Captures and validates reference snapshots.
///
/// Snapshots are cached in-process; the versions that matter for replay are
/// persisted on every journal entry and economic event.
pub struct SnapshotService {
    clock: Arc<dyn Clock>,
    registry: Arc<PolicyRegistry>,
    cache: Mutex<HashMap<Uuid, ReferenceSnapshot>>,
}

impl SnapshotService {
    pub fn new(clock: Arc<dyn Clock>, registry: Arc<PolicyRegistry>) -> Self {
        Self {
            clock,
            registry,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Capture the current state of the requested components.
    pub async fn capture(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        request: &SnapshotRequest,
    ) -> Result<ReferenceSnapshot, LedgerError> {
        if request.components.is_empty() {
            return Err(LedgerError::ValidationFailed {
                reason: "snapshot request must name at least one component".to_string(),
            });
        }

        let captured_at = request.as_of.unwrap_or_else(|| self.clock.now());
        let snapshot_id = Uuid::new_v4();

        let mut components = Vec::with_capacity(request.components.len());
        for component in &request.components {
            components.push(self.capture_component(tx, *component, captured_at).await?);
        }

        let snapshot = ReferenceSnapshot {
            snapshot_id,
            captured_at,
            captured_by: request.requested_by,
            components,
        };

        self.cache
            .lock()
            .expect("snapshot cache mutex poisoned")
            .insert(snapshot_id, snapshot.clone());

        tracing::debug!(
            snapshot_id = %snapshot_id,
            components = snapshot.components.len(),
            "reference snapshot captured"
        );

        Ok(snapshot)
    }

    /// Retrieve a snapshot captured by this service instance.
    pub fn get(&self, snapshot_id: Uuid) -> Option<ReferenceSnapshot> {
        self.cache
            .lock()
            .expect("snapshot cache mutex poisoned")
            .get(&snapshot_id)
            .cloned()
    }

    /// Recompute every component hash against current data. Any mismatch is
    /// a drift error naming the component and both hashes.
    pub async fn validate_integrity(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        snapshot: &ReferenceSnapshot,
    ) -> Result<SnapshotValidation, LedgerError> {
        let mut errors = Vec::new();

        for cv in &snapshot.components {
            let current = self
                .capture_component(tx, cv.component, snapshot.captured_at)
                .await?;

            if current.content_hash != cv.content_hash {
                errors.push(DriftError {
                    snapshot_id: snapshot.snapshot_id,
                    component: cv.component,
                    expected_hash: cv.content_hash.clone(),
                    actual_hash: current.content_hash.clone(),
                    message: format!(
                        "{} has changed since snapshot; expected hash {}…, got {}…",
                        cv.component.as_str(),
                        &cv.content_hash[..8],
                        &current.content_hash[..8]
                    ),
                });
            }
        }

        if errors.is_empty() {
            Ok(SnapshotValidation::Valid {
                snapshot_id: snapshot.snapshot_id,
            })
        } else {
            Ok(SnapshotValidation::Invalid {
                snapshot_id: snapshot.snapshot_id,
                errors,
            })
        }
    }

    async fn capture_component(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        component: SnapshotComponent,
        as_of: DateTime<Utc>,
    ) -> Result<ComponentVersion, LedgerError> {
        let (version, state) = match component {
            SnapshotComponent::ChartOfAccounts => coa_state(tx).await?,
            SnapshotComponent::DimensionSchema => dimension_schema_state(tx).await?,
            SnapshotComponent::FxRates => fx_rates_state(tx, as_of).await?,
            SnapshotComponent::RoundingPolicy => rounding_policy_state(),
            SnapshotComponent::TaxRules => (
                self.registry.config_version.max(1),
                self.registry.tax_rules_state(),
            ),
            SnapshotComponent::PolicyRegistry => (
                self.registry.config_version.max(1),
                self.registry.registry_state(),
            ),
            SnapshotComponent::AccountRoles => role_bindings_state(tx).await?,
        };

        Ok(ComponentVersion {
            component,
            version,
            content_hash: canonical::hash_value(&state),
            effective_from: as_of,
        })
    }
}

async fn coa_state(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<(i64, Value), LedgerError> {
    let accounts = account_repo::list_ordered(tx).await?;
    let state: Vec<Value> = accounts
        .iter()
        .map(|a| {
            json!({
                "code": a.code,
                "name": a.name,
                "account_type": a.account_type.as_str(),
                "normal_balance": a.normal_balance.as_str(),
                "is_active": a.is_active,
                "currency": a.currency,
            })
        })
        .collect();

    Ok(((accounts.len() as i64).max(1), Value::Array(state)))
}

async fn dimension_schema_state(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<(i64, Value), LedgerError> {
    let dimensions = dimension_repo::list_dimensions_ordered(tx).await?;
    let values = dimension_repo::list_values_ordered(tx).await?;

    let state = json!({
        "dimensions": dimensions.iter().map(|d| json!({
            "code": d.code,
            "name": d.name,
            "is_active": d.is_active,
        })).collect::<Vec<_>>(),
        "values": values.iter().map(|v| json!({
            "dimension_code": v.dimension_code,
            "code": v.code,
            "name": v.name,
            "is_active": v.is_active,
        })).collect::<Vec<_>>(),
    });

    Ok(((dimensions.len() as i64).max(1), state))
}

async fn fx_rates_state(
    tx: &mut Transaction<'_, Postgres>,
    as_of: DateTime<Utc>,
) -> Result<(i64, Value), LedgerError> {
    let rates = exchange_rate_repo::list_latest_per_pair(tx, as_of).await?;
    let state: Vec<Value> = rates
        .iter()
        .map(|r| {
            json!({
                "from": r.from_currency,
                "to": r.to_currency,
                "rate": canonical::canonical_decimal(&r.rate),
                "effective_at": r.effective_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            })
        })
        .collect();

    Ok(((rates.len() as i64).max(1), Value::Array(state)))
}

fn rounding_policy_state() -> (i64, Value) {
    let state = json!({
        "currencies": currency::all_codes().map(|code| json!({
            "code": code,
            "decimal_places": currency::decimal_places(code).unwrap_or(2),
            "rounding_tolerance": currency::rounding_tolerance(code)
                .map(|t| canonical::canonical_decimal(&t))
                .unwrap_or_default(),
        })).collect::<Vec<_>>(),
    });

    // Static compile-time table
    (1, state)
}

async fn role_bindings_state(
    tx: &mut Transaction<'_, Postgres>,
) -> Result<(i64, Value), LedgerError> {
    let bindings = role_repo::list_ordered(tx).await?;
    let state: Vec<Value> = bindings
        .iter()
        .map(|b| {
            json!({
                "role": b.role,
                "ledger": b.ledger_id,
                "account_code": b.account_code,
                "effective_from": b.effective_from.to_string(),
                "effective_to": b.effective_to.map(|d| d.to_string()),
            })
        })
        .collect();

    Ok(((bindings.len() as i64).max(1), Value::Array(state)))
}
