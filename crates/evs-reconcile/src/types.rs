use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Per-section and overall checksums of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotChecksums {
    /// section name -> sha256 hex of the canonicalized section.
    pub sections: BTreeMap<String, String>,
    /// sha256 hex of the whole canonicalized snapshot.
    pub full: String,
}

/// Change set for one top-level section.
///
/// `Fields` carries only the leaf fields that differ; a `Value::Null` entry
/// is an explicit tombstone ("field removed", distinct from "never set").
/// `Replace` is the degraded form used when a section is not an object on
/// one side — the whole section is replaced rather than silently skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SectionDelta {
    Fields(BTreeMap<String, Value>),
    Replace(Value),
}

/// Minimal field-level diff between two snapshots of the same logical data.
///
/// A delta is a pure function of two snapshots; it has no lifecycle of its
/// own. `checksums` describe the *new* snapshot so receivers can validate
/// the result of applying the delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub changes: BTreeMap<String, SectionDelta>,
    pub checksums: SnapshotChecksums,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
