//! Typed failures surfaced by the sequencer write path.
//!
//! Infrastructure failures (connection loss, SQL errors) travel as
//! `anyhow::Error` with context; the types here are the contract-level
//! failures callers are expected to branch on.

/// The caller claims a sequence position ahead of anything the server has
/// committed. The caller must discard its local assumption and re-sync from
/// `get_latest_sequence`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SequenceRegression {
    /// Sequence number the caller reported having observed.
    pub observed: i64,
    /// Latest committed sequence number on the server.
    pub latest: i64,
}

impl std::fmt::Display for SequenceRegression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sequence regression: caller observed seq {} but server latest is {}; \
             re-sync from get_latest_sequence",
            self.observed, self.latest
        )
    }
}

impl std::error::Error for SequenceRegression {}

/// Check a caller-reported sequence checkpoint against the server's latest.
///
/// Sequence numbers are never trusted from the client; a claim ahead of the
/// server means the client's state is wrong, not the ledger's.
pub fn assert_caller_sequence(observed: i64, latest: i64) -> Result<(), SequenceRegression> {
    if observed > latest {
        return Err(SequenceRegression { observed, latest });
    }
    Ok(())
}
