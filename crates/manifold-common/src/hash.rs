//! Content hashing for change detection
//!
//! A CRC-32 over the canonical JSON form of a value. The hash is a cache key
//! only: a collision costs one extra (idempotent) apply, never a missed one,
//! because a mismatch always re-renders.

use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::Error;

/// Hash a value through its canonical JSON serialization.
///
/// Object keys are sorted before checksumming so the result is stable across
/// processes. Serialization failures are returned, never mapped to zero.
pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> Result<u32, Error> {
    let value = serde_json::to_value(value)
        .map_err(|e| Error::serialization(format!("hashing content: {e}")))?;
    let data = serde_json::to_vec(&canonicalize(value))
        .map_err(|e| Error::serialization(format!("hashing content: {e}")))?;
    Ok(crc32fast::hash(&data))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Last successfully applied content hash per reconcilable unit.
///
/// Process-local; an empty cache after restart only costs one re-apply per
/// Manifest.
#[derive(Debug, Default)]
pub struct HashCache {
    entries: DashMap<String, u32>,
}

impl HashCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `hash` matches the last recorded hash for `key`
    pub fn is_current(&self, key: &str, hash: u32) -> bool {
        self.entries.get(key).is_some_and(|h| *h == hash)
    }

    /// Record `hash` as applied for `key`
    pub fn record(&self, key: &str, hash: u32) {
        self.entries.insert(key.to_string(), hash);
    }

    /// Drop any recorded hash for `key`, forcing the next pass to re-apply
    pub fn forget(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Number of tracked keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
