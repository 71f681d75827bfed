//! Idempotency Key Computation
//!
//! Deterministic hash of a published message, used to drop duplicate
//! publishes. Timestamp fields are ignored so that a retried publish of the
//! same event is recognised even if it was re-stamped.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Compute idempotency key for a message
///
/// Formula: SHA256(topic + 0x00 + key + 0x00 + normalized_payload)
///
/// # Returns
/// Idempotency key as hex string prefixed with "idem_"
pub fn compute_idempotency_key(topic: &str, key: &str, payload: &Value) -> String {
    let normalized = normalize_payload(payload);

    let mut hasher = Sha256::new();
    hasher.update(topic.as_bytes());
    hasher.update([0u8]);
    hasher.update(key.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalized.to_string().as_bytes());

    format!("idem_{}", hex::encode(hasher.finalize()))
}

/// Drop timestamp fields (`*_at`, `timestamp`) at every nesting level.
///
/// Object keys serialize sorted, so the output is stable.
fn normalize_payload(payload: &Value) -> Value {
    match payload {
        Value::Object(map) => {
            let normalized: Map<String, Value> = map
                .iter()
                .filter(|(key, _)| !(key.ends_with("_at") || key.as_str() == "timestamp"))
                .map(|(key, value)| (key.clone(), normalize_payload(value)))
                .collect();
            Value::Object(normalized)
        },
        Value::Array(items) => Value::Array(items.iter().map(normalize_payload).collect()),
        other => other.clone(),
    }
}
