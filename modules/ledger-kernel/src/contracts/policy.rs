//! Declarative accounting policy registry.
//!
//! Policies are data, not code: each [`EconomicProfile`] is a record that
//! describes how one event type becomes an economic event: which payload
//! fields carry quantity/value/currency/dimensions, and which guards may
//! block the interpretation. New event types are onboarded by registering a
//! new profile, never by editing the meaning builder.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::contracts::meaning::GuardRejection;

/// A declarative condition evaluated against the event payload.
///
/// Guards are a closed set; each failure maps to a stable reason code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Guard {
    /// The payload must contain a non-null field at this key.
    RequireField { field: String },
    /// The named field must parse as a decimal strictly greater than zero.
    PositiveAmount { field: String },
    /// The named field must parse as a decimal no greater than `limit`.
    MaxAmount { field: String, limit: Decimal },
    /// The named field must be one of the allowed string values.
    AllowedValue { field: String, allowed: Vec<String> },
}

impl Guard {
    /// Evaluate against a payload. `None` means the guard passes.
    pub fn check(&self, payload: &Value) -> Option<GuardRejection> {
        match self {
            Guard::RequireField { field } => match payload.get(field) {
                Some(v) if !v.is_null() => None,
                _ => Some(GuardRejection {
                    reason_code: "MISSING_FIELD".to_string(),
                    message: format!("payload field '{field}' is required"),
                    detail: Some(json!({ "field": field })),
                }),
            },
            Guard::PositiveAmount { field } => match decimal_field(payload, field) {
                Some(amount) if amount > Decimal::ZERO => None,
                Some(amount) => Some(GuardRejection {
                    reason_code: "NON_POSITIVE_AMOUNT".to_string(),
                    message: format!("payload field '{field}' must be positive, got {amount}"),
                    detail: Some(json!({ "field": field, "value": amount.to_string() })),
                }),
                None => Some(GuardRejection {
                    reason_code: "MISSING_AMOUNT".to_string(),
                    message: format!("payload field '{field}' must be a decimal amount"),
                    detail: Some(json!({ "field": field })),
                }),
            },
            Guard::MaxAmount { field, limit } => match decimal_field(payload, field) {
                Some(amount) if amount <= *limit => None,
                Some(amount) => Some(GuardRejection {
                    reason_code: "AMOUNT_LIMIT_EXCEEDED".to_string(),
                    message: format!(
                        "payload field '{field}' is {amount}, above the limit of {limit}"
                    ),
                    detail: Some(json!({
                        "field": field,
                        "value": amount.to_string(),
                        "limit": limit.to_string(),
                    })),
                }),
                None => Some(GuardRejection {
                    reason_code: "MISSING_AMOUNT".to_string(),
                    message: format!("payload field '{field}' must be a decimal amount"),
                    detail: Some(json!({ "field": field })),
                }),
            },
            Guard::AllowedValue { field, allowed } => {
                let value = payload.get(field).and_then(Value::as_str);
                match value {
                    Some(v) if allowed.iter().any(|a| a == v) => None,
                    _ => Some(GuardRejection {
                        reason_code: "VALUE_NOT_ALLOWED".to_string(),
                        message: format!(
                            "payload field '{field}' must be one of {allowed:?}"
                        ),
                        detail: Some(json!({ "field": field, "allowed": allowed })),
                    }),
                }
            }
        }
    }
}

fn decimal_field(payload: &Value, field: &str) -> Option<Decimal> {
    match payload.get(field)? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

/// How one event type is interpreted into an economic event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomicProfile {
    pub profile_id: String,
    pub version: i32,
    /// Namespaced event type this profile triggers on (e.g. `sales.invoice`).
    pub event_type: String,
    /// Economic classification stamped on the resulting economic event.
    pub economic_type: String,
    /// Owning module (e.g. `gl`, `ar`, `tax`); tax profiles feed the
    /// tax-rules snapshot component.
    pub module: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub guards: Vec<Guard>,
    /// Payload field carrying the quantity, if any.
    #[serde(default)]
    pub quantity_field: Option<String>,
    /// Payload field carrying the monetary value, if any.
    #[serde(default)]
    pub value_field: Option<String>,
    /// Payload field carrying the transaction currency, if any.
    #[serde(default)]
    pub currency_field: Option<String>,
    /// Payload fields copied into the economic event's dimension map.
    #[serde(default)]
    pub dimension_fields: Vec<String>,
}

impl EconomicProfile {
    /// Deterministic state used for snapshot content hashing.
    pub fn state_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// The compiled set of profiles in effect for one configuration version.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    pub config_version: i64,
    pub profiles: Vec<EconomicProfile>,
}

impl PolicyRegistry {
    pub fn new(config_version: i64, profiles: Vec<EconomicProfile>) -> Self {
        Self {
            config_version,
            profiles,
        }
    }

    /// Look up the profile registered for an event type.
    pub fn profile_for(&self, event_type: &str) -> Option<&EconomicProfile> {
        self.profiles.iter().find(|p| p.event_type == event_type)
    }

    /// Deterministic state of every profile, ordered by profile id.
    pub fn registry_state(&self) -> Value {
        let mut profiles: Vec<&EconomicProfile> = self.profiles.iter().collect();
        profiles.sort_by(|a, b| a.profile_id.cmp(&b.profile_id));
        json!({
            "policies": profiles.iter().map(|p| p.state_value()).collect::<Vec<_>>(),
        })
    }

    /// Deterministic state of tax-module profiles only.
    pub fn tax_rules_state(&self) -> Value {
        let mut profiles: Vec<&EconomicProfile> = self
            .profiles
            .iter()
            .filter(|p| p.module == "tax")
            .collect();
        profiles.sort_by(|a, b| a.profile_id.cmp(&b.profile_id));
        json!({
            "rules": profiles.iter().map(|p| p.state_value()).collect::<Vec<_>>(),
        })
    }
}
