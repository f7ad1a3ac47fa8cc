// History Replay
//
// Replays every revision of a line log through the checkout engine while
// enforcing invariants, and checks that the encoded form replays the same.

use serde::Serialize;
use tracing::debug;

use crate::codec::{self, CorruptState, EncodeError};
use crate::invariants::{InvariantEngine, InvariantViolation};
use crate::log::{LineLog, LogError, Rev};

/// Errors that can occur during replay.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("checkout failed: {0}")]
    Checkout(#[from] LogError),

    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("codec failure: {0}")]
    Codec(#[from] CorruptState),

    #[error("encoding failed: {0}")]
    Encode(#[from] EncodeError),

    #[error("revision {rev} differs after encoding round trip")]
    RoundTrip { rev: Rev },
}

/// Counts gathered while replaying.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub revisions: Rev,
    pub checkouts: usize,
    pub lines: usize,
}

/// Replay all revisions of `log`.
///
/// Each revision is checked out plainly and in deleted-inclusive mode
/// against its predecessor; every checkout goes through `invariants`.
pub fn verify_history(log: &LineLog, invariants: &InvariantEngine) -> Result<ReplaySummary, ReplayError> {
    let mut summary = ReplaySummary {
        revisions: log.max_rev(),
        ..ReplaySummary::default()
    };

    for rev in 0..=log.max_rev() {
        let plain = log.checkout(rev, None)?;
        invariants.evaluate(log, &plain)?;

        let ranged = log.checkout(rev, Some(rev.saturating_sub(1)))?;
        invariants.evaluate(log, &ranged)?;

        summary.checkouts += 2;
        summary.lines += plain.len();
    }

    debug!(
        revisions = summary.revisions,
        lines = summary.lines,
        "history replay verified"
    );
    Ok(summary)
}

/// Encode and decode `log`, then compare every revision.
pub fn verify_round_trip(log: &LineLog) -> Result<(), ReplayError> {
    let restored = codec::import(&codec::export(log)?)?;
    if restored.max_rev() != log.max_rev() {
        return Err(ReplayError::RoundTrip {
            rev: restored.max_rev(),
        });
    }
    for rev in 0..=log.max_rev() {
        if restored.checkout(rev, Some(0))? != log.checkout(rev, Some(0))? {
            return Err(ReplayError::RoundTrip { rev });
        }
    }
    Ok(())
}
