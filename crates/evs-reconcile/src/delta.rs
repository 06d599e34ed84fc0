use crate::checksum::section_checksums;
use crate::types::{Delta, SectionDelta};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Sentinel written in place of missing numeric data so clients can tell
/// "no data" from zero.
pub const PLACEHOLDER: &str = "n/a";

/// Field-level diff between two snapshots.
///
/// For each top-level section, only the leaf fields that differ are emitted.
/// Fields present in `old` but absent in `new` carry a `Value::Null`
/// tombstone. A section that is not an object on either side degrades to a
/// whole-section replace (forcing a full re-fetch of that section) rather
/// than being silently skipped. `checksums` describe `new`.
pub fn delta(old: &Value, new: &Value) -> Delta {
    let mut changes: BTreeMap<String, SectionDelta> = BTreeMap::new();

    let old_map = as_object(old);
    let new_map = as_object(new);

    let mut sections: BTreeSet<&String> = BTreeSet::new();
    sections.extend(old_map.keys());
    sections.extend(new_map.keys());

    for section in sections {
        let old_sec = old_map.get(section.as_str());
        let new_sec = new_map.get(section.as_str());

        match (old_sec, new_sec) {
            (Some(o), Some(n)) => {
                if o == n {
                    continue;
                }
                match (o, n) {
                    (Value::Object(om), Value::Object(nm)) => {
                        let fields = diff_fields(om, nm);
                        if !fields.is_empty() {
                            changes.insert(section.clone(), SectionDelta::Fields(fields));
                        }
                    }
                    // Old side unparseable: rebuild the section from all of
                    // the new fields.
                    (_, Value::Object(nm)) => {
                        changes.insert(
                            section.clone(),
                            SectionDelta::Fields(diff_fields(&Map::new(), nm)),
                        );
                    }
                    // New side unparseable: replace wholesale.
                    (_, other) => {
                        changes.insert(section.clone(), SectionDelta::Replace(other.clone()));
                    }
                }
            }
            (None, Some(n)) => {
                let sd = match n {
                    Value::Object(nm) => SectionDelta::Fields(diff_fields(&Map::new(), nm)),
                    other => SectionDelta::Replace(other.clone()),
                };
                changes.insert(section.clone(), sd);
            }
            // Section removed entirely: explicit tombstone.
            (Some(_), None) => {
                changes.insert(section.clone(), SectionDelta::Replace(Value::Null));
            }
            (None, None) => {}
        }
    }

    Delta {
        changes,
        checksums: section_checksums(new),
    }
}

// Non-object snapshots are treated as having no sections; the shared empty
// map lets `as_object` stay a cheap borrow.
fn as_object(v: &Value) -> &Map<String, Value> {
    static EMPTY: std::sync::OnceLock<Map<String, Value>> = std::sync::OnceLock::new();
    match v {
        Value::Object(m) => m,
        _ => EMPTY.get_or_init(Map::new),
    }
}

fn diff_fields(old: &Map<String, Value>, new: &Map<String, Value>) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for (k, nv) in new {
        match old.get(k) {
            Some(ov) if ov == nv => {}
            _ => {
                out.insert(k.clone(), nv.clone());
            }
        }
    }
    for k in old.keys() {
        if !new.contains_key(k) {
            out.insert(k.clone(), Value::Null);
        }
    }
    out
}

/// Apply `delta.changes` onto `base`, field by field.
///
/// Idempotent: re-applying the same delta re-assigns the same final values,
/// so `merge(merge(S, D), D) == merge(S, D)`.
pub fn merge(base: &Value, delta: &Delta) -> Value {
    let mut root = match base {
        Value::Object(m) => m.clone(),
        _ => Map::new(),
    };

    for (section, sd) in &delta.changes {
        match sd {
            SectionDelta::Replace(Value::Null) => {
                root.remove(section);
            }
            SectionDelta::Replace(v) => {
                root.insert(section.clone(), v.clone());
            }
            SectionDelta::Fields(fields) => {
                let slot = root
                    .entry(section.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                if let Value::Object(sec) = slot {
                    for (k, v) in fields {
                        if v.is_null() {
                            sec.remove(k);
                        } else {
                            sec.insert(k.clone(), v.clone());
                        }
                    }
                }
            }
        }
    }

    Value::Object(root)
}

/// Replace missing data with an explicit placeholder.
///
/// Every `null` leaf becomes the `PLACEHOLDER` string — a JSON null carries
/// no type information, so a missing counter and an absent description are
/// treated alike. The case that matters is the numeric one: missing data is
/// never coerced to 0. Numbers and all other values pass through.
pub fn sanitize(snapshot: &Value) -> Value {
    match snapshot {
        Value::Null => Value::String(PLACEHOLDER.to_string()),
        Value::Object(m) => {
            let mut out = Map::new();
            for (k, v) in m {
                out.insert(k.clone(), sanitize(v));
            }
            Value::Object(out)
        }
        Value::Array(a) => Value::Array(a.iter().map(sanitize).collect()),
        other => other.clone(),
    }
}

/// Lift an `f64` into JSON, degrading non-finite values to the placeholder
/// instead of panicking or emitting 0.
pub fn number_or_placeholder(v: f64) -> Value {
    match serde_json::Number::from_f64(v) {
        Some(n) => Value::Number(n),
        None => Value::String(PLACEHOLDER.to_string()),
    }
}
