// Line Annotator
//
// Attaches timestamps and commit provenance to checked-out lines.

use serde::Serialize;

use crate::log::{Checkout, LineLog, MaterializedLine, Provenance};

/// A checked-out line with its introducing revision's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotatedLine<'a> {
    #[serde(flatten)]
    pub line: MaterializedLine<'a>,
    pub timestamp_ms: u64,
    pub provenance: Option<&'a Provenance>,
}

#[derive(Debug, Clone, Copy)]
pub struct Annotator<'a> {
    log: &'a LineLog,
}

impl<'a> Annotator<'a> {
    pub fn new(log: &'a LineLog) -> Self {
        Self { log }
    }

    /// When the line's introducing revision was recorded: the commit time
    /// for bootstrapped revisions, the wall-clock time of the edit otherwise.
    pub fn timestamp_of(&self, line: &MaterializedLine<'_>) -> u64 {
        self.log
            .revision(line.rev)
            .map(|record| record.timestamp_ms)
            .unwrap_or(0)
    }

    /// Commit that introduced the line, if its revision was bootstrapped.
    pub fn provenance_of(&self, line: &MaterializedLine<'_>) -> Option<&'a Provenance> {
        self.log.revision(line.rev)?.provenance.as_ref()
    }

    pub fn annotate(&self, checkout: &Checkout<'a>) -> Vec<AnnotatedLine<'a>> {
        checkout
            .iter()
            .map(|line| AnnotatedLine {
                line: line.clone(),
                timestamp_ms: self.timestamp_of(line),
                provenance: self.provenance_of(line),
            })
            .collect()
    }

    /// Oldest and newest timestamps among `lines`.
    pub fn timestamp_span(lines: &[AnnotatedLine<'_>]) -> Option<(u64, u64)> {
        let oldest = lines.iter().map(|l| l.timestamp_ms).min()?;
        let newest = lines.iter().map(|l| l.timestamp_ms).max()?;
        Some((oldest, newest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::RevisionMetadata;

    fn bootstrapped() -> LineLog {
        let mut log = LineLog::new();
        for (i, text) in ["a\n", "a\nb\n", "a\nb\nc\n"].iter().enumerate() {
            log.append_with_metadata(
                text,
                RevisionMetadata {
                    commit_id: format!("c{}", i + 1),
                    author: "bob".into(),
                    message: format!("step {}", i + 1),
                    timestamp_ms: 1_000 * (i as u64 + 1),
                },
            );
        }
        log
    }

    #[test]
    fn bootstrapped_then_live_edit() {
        let mut log = bootstrapped();
        assert_eq!(log.max_rev(), 3);
        assert_eq!(log.append_at("a\nb\nc\nd\n", 9_000), 4);
        assert_eq!(log.max_rev(), 4);

        let checkout = log.checkout(4, None).unwrap();
        let annotator = Annotator::new(&log);
        let annotated = annotator.annotate(&checkout);

        let commits: Vec<_> = annotated
            .iter()
            .map(|l| l.provenance.map(|p| p.commit_id.as_str()))
            .collect();
        assert_eq!(commits, vec![Some("c1"), Some("c2"), Some("c3"), None]);

        let timestamps: Vec<_> = annotated.iter().map(|l| l.timestamp_ms).collect();
        assert_eq!(timestamps, vec![1_000, 2_000, 3_000, 9_000]);

        for rev in 1..=3 {
            assert!(log.revision(rev).unwrap().provenance.is_some());
        }
        assert!(log.revision(4).unwrap().provenance.is_none());
    }

    #[test]
    fn provenance_follows_introduction_not_checkout() {
        let log = bootstrapped();
        let checkout = log.checkout(3, None).unwrap();
        let annotator = Annotator::new(&log);

        let first = &checkout.lines[0];
        assert_eq!(annotator.provenance_of(first).unwrap().message, "step 1");
        assert_eq!(annotator.timestamp_of(first), 1_000);
    }

    #[test]
    fn span_covers_all_lines() {
        let log = bootstrapped();
        let checkout = log.checkout(3, None).unwrap();
        let annotated = Annotator::new(&log).annotate(&checkout);

        assert_eq!(Annotator::timestamp_span(&annotated), Some((1_000, 3_000)));
        assert_eq!(Annotator::timestamp_span(&[]), None);
    }

    #[test]
    fn annotated_lines_serialize_flat() {
        let mut log = LineLog::new();
        log.append_at("x\n", 42);
        let checkout = log.checkout(1, None).unwrap();
        let annotated = Annotator::new(&log).annotate(&checkout);

        let json = serde_json::to_value(&annotated[0]).unwrap();
        assert_eq!(json["text"], "x\n");
        assert_eq!(json["rev"], 1);
        assert_eq!(json["timestamp_ms"], 42);
        assert!(json["provenance"].is_null());
    }
}
