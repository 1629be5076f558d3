//! The meaning builder: `(event, snapshot, policy) -> economic meaning`.
//!
//! A pure function with no I/O. Dispatch is by profile lookup in the policy
//! registry; there is no branching on event type here; new event types are
//! onboarded by registering new profiles.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde_json::Value;

use crate::canonical;
use crate::contracts::meaning::{EconomicEventData, GuardRejection, MeaningResult};
use crate::contracts::policy::{EconomicProfile, PolicyRegistry};
use crate::contracts::reference_snapshot::ReferenceSnapshot;
use crate::repos::event_repo::EventEnvelope;

/// Interpret one event under the registry captured in the snapshot.
pub fn build(
    event: &EventEnvelope,
    snapshot: &ReferenceSnapshot,
    registry: &PolicyRegistry,
) -> MeaningResult {
    let Some(profile) = registry.profile_for(&event.event_type) else {
        return MeaningResult::Blocked(GuardRejection {
            reason_code: "PROFILE_NOT_FOUND".to_string(),
            message: format!("no profile registered for event type {}", event.event_type),
            detail: None,
        });
    };

    for guard in &profile.guards {
        if let Some(rejection) = guard.check(&event.payload) {
            return MeaningResult::Blocked(rejection);
        }
    }

    MeaningResult::Ok(EconomicEventData {
        source_event_id: event.event_id,
        economic_type: profile.economic_type.clone(),
        quantity: profile
            .quantity_field
            .as_deref()
            .and_then(|f| decimal_field(&event.payload, f)),
        dimensions: extract_dimensions(profile, &event.payload),
        effective_date: event.effective_date,
        profile_id: profile.profile_id.clone(),
        profile_version: profile.version,
        profile_hash: Some(canonical::hash_value(&profile.state_value())),
        value: profile
            .value_field
            .as_deref()
            .and_then(|f| decimal_field(&event.payload, f)),
        currency: profile
            .currency_field
            .as_deref()
            .and_then(|f| event.payload.get(f))
            .and_then(Value::as_str)
            .map(str::to_string),
        snapshot_versions: snapshot.versions(),
    })
}

fn decimal_field(payload: &Value, field: &str) -> Option<Decimal> {
    match payload.get(field)? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

fn extract_dimensions(
    profile: &EconomicProfile,
    payload: &Value,
) -> Option<BTreeMap<String, String>> {
    if profile.dimension_fields.is_empty() {
        return None;
    }

    let mut dims = BTreeMap::new();
    for field in &profile.dimension_fields {
        if let Some(value) = payload.get(field).and_then(Value::as_str) {
            dims.insert(field.clone(), value.to_string());
        }
    }

    if dims.is_empty() {
        None
    } else {
        Some(dims)
    }
}
