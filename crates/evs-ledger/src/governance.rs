//! Payload governance gate.
//!
//! Certain fields must never reach the ledger (raw transcript text travels
//! through the extraction pipeline, not through sync events). The gate runs
//! before any row is written so a violation is never partially committed.

use serde_json::Value;

/// Field names that may not appear anywhere in an event payload.
pub const RESTRICTED_FIELDS: &[&str] = &["transcript", "transcript_text", "raw_transcript"];

/// An event payload contained a disallowed field. Rejected before ledger
/// commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GovernanceViolation {
    /// The offending field name.
    pub field: String,
    /// JSON-pointer-style path to the field.
    pub path: String,
}

impl std::fmt::Display for GovernanceViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "governance violation: restricted field {:?} at {} is not allowed in event payloads",
            self.field, self.path
        )
    }
}

impl std::error::Error for GovernanceViolation {}

/// Scan a payload recursively for restricted field names.
pub fn check_payload(payload: &Value) -> Result<(), GovernanceViolation> {
    scan(payload, "")
}

fn scan(v: &Value, path: &str) -> Result<(), GovernanceViolation> {
    match v {
        Value::Object(map) => {
            for (k, child) in map {
                let child_path = format!("{path}/{k}");
                if RESTRICTED_FIELDS.contains(&k.as_str()) {
                    return Err(GovernanceViolation {
                        field: k.clone(),
                        path: child_path,
                    });
                }
                scan(child, &child_path)?;
            }
            Ok(())
        }
        Value::Array(arr) => {
            for (i, child) in arr.iter().enumerate() {
                scan(child, &format!("{path}/{i}"))?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
