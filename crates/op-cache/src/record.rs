//! Stored record format and integrity hashing
//!
//! Values are kept as serialized JSON. New writes are always
//! [`CacheRecord::Wrapped`]; bare values from older snapshots decode as
//! [`CacheRecord::Legacy`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Wrapped value with its write timestamp and content hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct WrappedRecord {
    pub value: Value,
    pub stored_at: DateTime<Utc>,
    pub hash: String,
}

/// A decoded cache record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheRecord {
    Wrapped(WrappedRecord),
    Legacy(Value),
}

/// Why a stored record could not be used
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Corruption {
    #[error("unparseable record: {0}")]
    Unparseable(String),
    #[error("hash mismatch (stored {expected}, computed {actual})")]
    HashMismatch { expected: String, actual: String },
}

impl CacheRecord {
    /// Wrap a value, hashing it now
    pub fn wrap(value: Value) -> Self {
        let hash = integrity_hash(&value);
        CacheRecord::Wrapped(WrappedRecord {
            value,
            stored_at: Utc::now(),
            hash,
        })
    }

    /// Decode a raw stored string
    pub fn decode(raw: &str) -> Result<Self, Corruption> {
        serde_json::from_str(raw).map_err(|e| Corruption::Unparseable(e.to_string()))
    }

    /// Return the value if its hash checks out. Legacy values carry no hash
    /// and are accepted as-is.
    pub fn into_verified(self) -> Result<Value, Corruption> {
        match self {
            CacheRecord::Wrapped(record) => {
                let actual = integrity_hash(&record.value);
                if actual == record.hash {
                    Ok(record.value)
                } else {
                    Err(Corruption::HashMismatch {
                        expected: record.hash,
                        actual,
                    })
                }
            }
            CacheRecord::Legacy(value) => Ok(value),
        }
    }

    pub fn stored_at(&self) -> Option<DateTime<Utc>> {
        match self {
            CacheRecord::Wrapped(record) => Some(record.stored_at),
            CacheRecord::Legacy(_) => None,
        }
    }
}

/// SHA-256 over the canonical JSON form of `value` (object keys sorted at
/// every depth), hex encoded.
pub fn integrity_hash(value: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(value, &mut canonical);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
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
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"y":[1,2],"x":null}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":{"x":null,"y":[1,2]},"b":1}"#).unwrap();
        assert_eq!(integrity_hash(&a), integrity_hash(&b));
        assert_ne!(integrity_hash(&a), integrity_hash(&json!({"b": 2})));
    }

    #[test]
    fn test_wrapped_roundtrip_verifies() {
        let record = CacheRecord::wrap(json!({"apis": ["a", "b"]}));
        let raw = serde_json::to_string(&record).unwrap();
        let decoded = CacheRecord::decode(&raw).unwrap();
        assert!(matches!(decoded, CacheRecord::Wrapped(_)));
        assert_eq!(decoded.into_verified().unwrap(), json!({"apis": ["a", "b"]}));
    }

    #[test]
    fn test_tampered_value_is_rejected() {
        let record = CacheRecord::wrap(json!({"title": "Old"}));
        let mut raw: Value = serde_json::to_value(&record).unwrap();
        raw["value"]["title"] = json!("New");

        let decoded = CacheRecord::decode(&raw.to_string()).unwrap();
        assert!(matches!(
            decoded.into_verified(),
            Err(Corruption::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_bare_value_decodes_as_legacy() {
        let decoded = CacheRecord::decode(r#"{"data":["x"]}"#).unwrap();
        assert_eq!(decoded, CacheRecord::Legacy(json!({"data": ["x"]})));
        assert!(decoded.stored_at().is_none());
    }

    #[test]
    fn test_garbage_is_unparseable() {
        assert!(matches!(
            CacheRecord::decode("{not json"),
            Err(Corruption::Unparseable(_))
        ));
    }

    #[test]
    fn test_corruption_is_a_std_error() {
        let corruption = Corruption::HashMismatch {
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        let err: anyhow::Error = corruption.into();
        assert_eq!(err.to_string(), "hash mismatch (stored aa, computed bb)");
    }
}
