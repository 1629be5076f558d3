//! Canonical serialization and hashing.
//!
//! Everything the kernel hashes (event payloads, reference snapshots, audit
//! events, the canonical ledger) goes through this module so that one set of
//! rules governs the byte form: UTF-8 JSON with lexicographically sorted
//! keys, `","`/`":"` separators, no insignificant whitespace; SHA-256 with
//! lowercase hex output; decimals in minimal form.

use rust_decimal::Decimal;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize a JSON value to its canonical string form.
///
/// Object keys are emitted in lexicographic order regardless of input
/// ordering; arrays keep their order. The output is byte-stable across
/// executions for equal values.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Key escaping via serde_json keeps us aligned with RFC 8259
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        // Scalars: serde_json's Display is already compact
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// SHA-256 over a string, lowercase hex output.
pub fn sha256_hex(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Canonical content hash of a JSON value.
pub fn hash_value(value: &Value) -> String {
    sha256_hex(&canonical_json(value))
}

/// Minimal decimal string: no trailing zeros, sign only when negative.
pub fn canonical_decimal(value: &Decimal) -> String {
    value.normalize().to_string()
}

/// The genesis predecessor hash for hash chains: 64 zero hex digits.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";
