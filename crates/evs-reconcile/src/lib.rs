//! Cache reconciler: deterministic checksums, cheap ETags, field-level
//! snapshot deltas and idempotent merge.
//!
//! Everything in this crate is a pure function of its inputs. No snapshot is
//! ever persisted here; callers hand us snapshots, we compare them.

mod checksum;
mod delta;
mod types;

pub use checksum::{canonical_string, checksum, etag, section_checksums};
pub use delta::{delta, merge, number_or_placeholder, sanitize, PLACEHOLDER};
pub use types::{Delta, SectionDelta, SnapshotChecksums};
