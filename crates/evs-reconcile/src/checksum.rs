use crate::types::SnapshotChecksums;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Canonical form: keys sorted recursively, compact JSON, one line.
///
/// Serialization of a `Value` tree cannot fail (all map keys are strings),
/// so this is total.
pub fn canonical_string(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).unwrap_or_default()
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 over the canonicalized snapshot. Deterministic across repeated
/// calls and independent of key insertion order.
pub fn checksum(snapshot: &Value) -> String {
    sha256_hex(canonical_string(snapshot).as_bytes())
}

/// Checksums per top-level section plus the overall checksum.
///
/// Non-object snapshots have no sections; only `full` is populated.
pub fn section_checksums(snapshot: &Value) -> SnapshotChecksums {
    let mut sections = BTreeMap::new();
    if let Value::Object(map) = snapshot {
        for (k, v) in map {
            sections.insert(k.clone(), checksum(v));
        }
    }
    SnapshotChecksums {
        sections,
        full: checksum(snapshot),
    }
}

/// Cheap freshness fingerprint: hashes the last-modified timestamps of the
/// rows feeding a snapshot, not the snapshot contents.
///
/// Rows are ordered by id before hashing so the result is independent of
/// query order.
pub fn etag(rows: &[(Uuid, DateTime<Utc>)]) -> String {
    let mut sorted: Vec<&(Uuid, DateTime<Utc>)> = rows.iter().collect();
    sorted.sort_by_key(|(id, _)| *id);

    let mut hasher = Sha256::new();
    for (id, updated_at) in sorted {
        hasher.update(id.as_bytes());
        hasher.update(updated_at.timestamp_micros().to_be_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn checksum_is_key_order_independent() {
        let a = json!({"kpis": {"total": 10, "done": 4}, "tasks": {}});
        // Same content, different literal ordering.
        let b = json!({"tasks": {}, "kpis": {"done": 4, "total": 10}});
        assert_eq!(checksum(&a), checksum(&b));
        assert_eq!(checksum(&a), checksum(&a));
    }

    #[test]
    fn checksum_distinguishes_values() {
        let a = json!({"kpis": {"total": 10}});
        let b = json!({"kpis": {"total": 12}});
        assert_ne!(checksum(&a), checksum(&b));
    }

    #[test]
    fn section_checksums_cover_each_top_level_key() {
        let s = json!({"kpis": {"total": 1}, "tasks": {"open": 2}});
        let c = section_checksums(&s);
        assert_eq!(c.sections.len(), 2);
        assert_eq!(c.sections["kpis"], checksum(&json!({"total": 1})));
        assert_eq!(c.full, checksum(&s));
    }

    #[test]
    fn etag_ignores_row_order_but_not_timestamps() {
        let id1 = Uuid::new_v4();
        let id2 = Uuid::new_v4();
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::seconds(5);

        let forward = etag(&[(id1, t1), (id2, t2)]);
        let backward = etag(&[(id2, t2), (id1, t1)]);
        assert_eq!(forward, backward);

        let touched = etag(&[(id1, t2), (id2, t2)]);
        assert_ne!(forward, touched);
    }
}
