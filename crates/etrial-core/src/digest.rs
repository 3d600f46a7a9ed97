//! Canonical JSON and SHA-256 fingerprints.
//!
//! Every identity in eTrial (candidate hash, config hash, input hashes in the
//! audit trail) is computed over canonical JSON so that key order and
//! integer-valued floats never change a digest:
//! - object keys sorted by UTF-16 code units
//! - integer-valued floats rendered as integers; NaN/Infinity rejected
//! - compact output, SHA-256 lowercase hex

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Errors raised while canonicalizing a value.
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("NaN/Infinity not permitted in canonical JSON")]
    NonFiniteNumber,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type DigestResult<T> = std::result::Result<T, DigestError>;

fn sort_keys_utf16(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));

            let mut sorted = serde_json::Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.to_string(), sort_keys_utf16(v));
                }
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(sort_keys_utf16).collect())
        }
        other => other.clone(),
    }
}

fn normalize_value(value: &serde_json::Value) -> DigestResult<serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => {
            let mut normalized = serde_json::Map::new();
            for (k, v) in map.iter() {
                normalized.insert(k.clone(), normalize_value(v)?);
            }
            Ok(serde_json::Value::Object(normalized))
        }
        serde_json::Value::Array(arr) => Ok(serde_json::Value::Array(
            arr.iter()
                .map(normalize_value)
                .collect::<DigestResult<Vec<_>>>()?,
        )),
        serde_json::Value::Number(n) if n.is_f64() => {
            let f = n.as_f64().unwrap_or(f64::NAN);
            if !f.is_finite() {
                return Err(DigestError::NonFiniteNumber);
            }
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                Ok(serde_json::Value::Number(serde_json::Number::from(f as i64)))
            } else {
                Ok(serde_json::Value::Number(n.clone()))
            }
        }
        other => Ok(other.clone()),
    }
}

/// Convert a JSON value to canonical form.
pub fn canonical_json(value: &serde_json::Value) -> DigestResult<String> {
    let normalized = normalize_value(value)?;
    let sorted = sort_keys_utf16(&normalized);
    Ok(serde_json::to_string(&sorted)?)
}

/// SHA-256 hex of raw bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// SHA-256 hex digest of the canonical JSON of any serializable value.
pub fn compute_digest<T: Serialize + ?Sized>(value: &T) -> DigestResult<String> {
    let value = serde_json::to_value(value)?;
    let canonical = canonical_json(&value)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// First 16 hex chars of [`compute_digest`]; the short identity used for
/// candidates and configurations.
pub fn short_digest<T: Serialize + ?Sized>(value: &T) -> DigestResult<String> {
    let mut digest = compute_digest(value)?;
    digest.truncate(16);
    Ok(digest)
}
