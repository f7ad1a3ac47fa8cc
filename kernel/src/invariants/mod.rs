// Invariant Framework
//
// Invariants are pure rules every checkout of a line log must satisfy.
// Violations point at a corrupt or mis-built instruction program.

use crate::log::{Checkout, LineLog, Rev};

/// Result of invariant evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantResult {
    Pass,
    Fail(String),
}

/// Trait implemented by all invariants.
///
/// Invariants must be:
/// - Pure
/// - Deterministic
/// - Side-effect free
pub trait Invariant: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, log: &LineLog, checkout: &Checkout<'_>) -> InvariantResult;
}

/// Invariant engine that evaluates a set of invariants.
#[derive(Default)]
pub struct InvariantEngine {
    invariants: Vec<Box<dyn Invariant>>,
}

impl InvariantEngine {
    /// Create an engine with no invariants.
    pub fn new() -> Self {
        Self {
            invariants: Vec::new(),
        }
    }

    /// Create an engine with the built-in line log invariants.
    pub fn standard() -> Self {
        let mut engine = Self::new();
        engine.register(MonotonicIntroduction);
        engine.register(DeletionConsistency);
        engine.register(KnownRevisions);
        engine.register(ProvenanceAlignment);
        engine
    }

    /// Register an invariant.
    pub fn register<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }

    /// Evaluate all invariants.
    ///
    /// Stops at the first failure.
    pub fn evaluate(&self, log: &LineLog, checkout: &Checkout<'_>) -> Result<(), InvariantViolation> {
        for invariant in &self.invariants {
            match invariant.validate(log, checkout) {
                InvariantResult::Pass => continue,
                InvariantResult::Fail(reason) => {
                    return Err(InvariantViolation {
                        invariant: invariant.name(),
                        rev: checkout.rev,
                        start: checkout.start,
                        reason,
                    })
                }
            }
        }
        Ok(())
    }
}

/// Returned when an invariant is violated.
#[derive(Debug, thiserror::Error)]
#[error("invariant `{invariant}` violated at rev {rev} (start {start:?}): {reason}")]
pub struct InvariantViolation {
    pub invariant: &'static str,
    pub rev: Rev,
    pub start: Option<Rev>,
    pub reason: String,
}

/// Every line in a checkout was introduced at or before the checked-out revision.
pub struct MonotonicIntroduction;

impl Invariant for MonotonicIntroduction {
    fn name(&self) -> &'static str {
        "monotonic-introduction"
    }

    fn validate(&self, _log: &LineLog, checkout: &Checkout<'_>) -> InvariantResult {
        match checkout.iter().position(|line| line.rev > checkout.rev) {
            Some(index) => InvariantResult::Fail(format!(
                "line {index} introduced at {}",
                checkout.lines[index].rev
            )),
            None => InvariantResult::Pass,
        }
    }
}

/// Deleted lines only appear in deleted-inclusive checkouts, retired within
/// `(start, rev]` and after their introduction.
pub struct DeletionConsistency;

impl Invariant for DeletionConsistency {
    fn name(&self) -> &'static str {
        "deletion-consistency"
    }

    fn validate(&self, _log: &LineLog, checkout: &Checkout<'_>) -> InvariantResult {
        for (index, line) in checkout.iter().enumerate() {
            let Some(deleted_at) = line.deleted_at else {
                continue;
            };
            let Some(start) = checkout.start else {
                return InvariantResult::Fail(format!("line {index} deleted in a plain checkout"));
            };
            if deleted_at <= start || deleted_at > checkout.rev {
                return InvariantResult::Fail(format!(
                    "line {index} retired at {deleted_at} outside ({start}, {}]",
                    checkout.rev
                ));
            }
            if deleted_at <= line.rev {
                return InvariantResult::Fail(format!(
                    "line {index} retired at {deleted_at} but introduced at {}",
                    line.rev
                ));
            }
        }
        InvariantResult::Pass
    }
}

/// Every line is attributed to a recorded revision.
pub struct KnownRevisions;

impl Invariant for KnownRevisions {
    fn name(&self) -> &'static str {
        "known-revisions"
    }

    fn validate(&self, log: &LineLog, checkout: &Checkout<'_>) -> InvariantResult {
        match checkout.iter().find(|line| log.revision(line.rev).is_none()) {
            Some(line) => InvariantResult::Fail(format!("no record for revision {}", line.rev)),
            None => InvariantResult::Pass,
        }
    }
}

/// Bootstrapped revisions come before every live one.
pub struct ProvenanceAlignment;

impl Invariant for ProvenanceAlignment {
    fn name(&self) -> &'static str {
        "provenance-alignment"
    }

    fn validate(&self, log: &LineLog, _checkout: &Checkout<'_>) -> InvariantResult {
        let mut first_live = None;
        for (rev, record) in log.revisions() {
            match (record.provenance.is_some(), first_live) {
                (false, None) => first_live = Some(rev),
                (true, Some(live)) => {
                    return InvariantResult::Fail(format!(
                        "bootstrapped revision {rev} after live revision {live}"
                    ))
                }
                _ => {}
            }
        }
        InvariantResult::Pass
    }
}
