//! Delta/merge contract over realistic KPI snapshots.
//!
//! GREEN when:
//! - `delta(A, B)` carries only the changed leaf fields.
//! - `merge(A, delta(A, B)) == B` across adds, updates, removals and
//!   section removals.
//! - Re-applying a delta is a no-op (idempotent merge).

use evs_reconcile::{checksum, delta, merge, SectionDelta};
use serde_json::json;

#[test]
fn kpi_total_update_round_trips() {
    let a = json!({"kpis": {"total": 10}});
    let b = json!({"kpis": {"total": 12}});

    let d = delta(&a, &b);
    match &d.changes["kpis"] {
        SectionDelta::Fields(f) => {
            assert_eq!(f.len(), 1, "only the changed field should be present");
            assert_eq!(f["total"], json!(12));
        }
        other => panic!("expected field-level delta, got {other:?}"),
    }

    assert_eq!(merge(&a, &d), b);
    assert_eq!(d.checksums.full, checksum(&b));
}

#[test]
fn mixed_change_set_round_trips_and_is_idempotent() {
    let pairs = [
        // add a field
        (
            json!({"kpis": {"total": 1}}),
            json!({"kpis": {"total": 1, "done": 0}}),
        ),
        // remove a field
        (
            json!({"kpis": {"total": 1, "done": 0}}),
            json!({"kpis": {"total": 1}}),
        ),
        // add a section
        (
            json!({"kpis": {"total": 1}}),
            json!({"kpis": {"total": 1}, "tasks": {"open": 3}}),
        ),
        // remove a section
        (
            json!({"kpis": {"total": 1}, "tasks": {"open": 3}}),
            json!({"kpis": {"total": 1}}),
        ),
        // nested composite value change
        (
            json!({"kpis": {"by_priority": {"high": 1, "low": 2}}}),
            json!({"kpis": {"by_priority": {"high": 2, "low": 2}}}),
        ),
        // everything at once
        (
            json!({"kpis": {"total": 9, "done": 3}, "tasks": {"open": 6, "blocked": 1}}),
            json!({"kpis": {"total": 11}, "tasks": {"open": 7}, "meta": {"rev": 2}}),
        ),
    ];

    for (a, b) in pairs {
        let d = delta(&a, &b);
        let once = merge(&a, &d);
        assert_eq!(once, b, "merge must reach the target snapshot");

        let twice = merge(&once, &d);
        assert_eq!(once, twice, "re-applying a delta must be a no-op");
    }
}

#[test]
fn delta_checksums_validate_the_merged_result() {
    let a = json!({"kpis": {"total": 4, "done": 1}});
    let b = json!({"kpis": {"total": 5, "done": 2}});

    let d = delta(&a, &b);
    let merged = merge(&a, &d);
    assert_eq!(
        checksum(&merged),
        d.checksums.full,
        "receiver can verify the applied delta against the carried checksum"
    );
}
