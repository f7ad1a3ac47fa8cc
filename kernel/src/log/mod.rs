// Line Log
//
// Append-only history of one file. Each recorded text becomes a revision;
// history is kept as an instruction program whose execution path for a
// revision yields exactly that revision's lines.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::diff::{self, Hunk};

pub mod checkout;
pub mod store;

pub use checkout::{Checkout, MaterializedLine};
pub(crate) use checkout::Visit;

/// Revision number. `0` is the empty baseline.
pub type Rev = u32;

/// Address of an instruction in the program.
pub type Pc = usize;

/// Index into the line table.
pub type LineId = usize;

/// One step of the instruction program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// Emit the line stored at `line`.
    Line { line: LineId },

    /// Head of a block introduced at `rev`. Older checkouts jump to `skip`.
    Insert { rev: Rev, skip: Pc },

    /// Head of a run retired at `rev`. Checkouts at `rev` or later jump to `skip`.
    Retire { rev: Rev, skip: Pc },

    Jump { target: Pc },

    End,
}

/// A line as stored in the line table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LineRecord {
    pub(crate) text: String,
    pub(crate) rev: Rev,
    pub(crate) retired: Option<Rev>,
}

/// Commit a bootstrapped revision came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub commit_id: String,
    pub author: String,
    pub message: String,
}

/// Metadata supplied with a historical snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionMetadata {
    pub commit_id: String,
    pub author: String,
    pub message: String,
    pub timestamp_ms: u64,
}

impl From<RevisionMetadata> for RevisionRecord {
    fn from(metadata: RevisionMetadata) -> Self {
        Self {
            timestamp_ms: metadata.timestamp_ms,
            provenance: Some(Provenance {
                commit_id: metadata.commit_id,
                author: metadata.author,
                message: metadata.message,
            }),
        }
    }
}

/// What is known about a recorded revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub timestamp_ms: u64,

    /// Present only for revisions seeded from version control.
    pub provenance: Option<Provenance>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LogError {
    #[error("revision {rev} out of range: max revision is {max_rev}")]
    InvalidRevision { rev: Rev, max_rev: Rev },

    #[error("start revision {start} is past revision {rev}")]
    InvalidStart { start: Rev, rev: Rev },

    #[error("program does not terminate cleanly at pc {pc}")]
    CorruptProgram { pc: Pc },
}

/// Lines visible at `max_rev`, with the program address of each.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Head {
    pub(crate) visits: Vec<Visit>,
    pub(crate) end: Pc,
}

impl Head {
    fn pc_at(&self, index: usize) -> Pc {
        self.visits.get(index).map(|v| v.pc).unwrap_or(self.end)
    }
}

/// History of a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineLog {
    program: Vec<Instruction>,
    lines: Vec<LineRecord>,
    revisions: Vec<RevisionRecord>,
    max_rev: Rev,
    head: Head,
}

impl Default for LineLog {
    fn default() -> Self {
        Self::new()
    }
}

impl LineLog {
    pub fn new() -> Self {
        Self {
            program: vec![Instruction::End],
            lines: Vec::new(),
            revisions: Vec::new(),
            max_rev: 0,
            head: Head::default(),
        }
    }

    /// Rebuild a log from decoded tables. The tables must already be
    /// structurally valid; only execution is checked here.
    pub(crate) fn from_parts(
        program: Vec<Instruction>,
        lines: Vec<LineRecord>,
        revisions: Vec<RevisionRecord>,
    ) -> Result<Self, LogError> {
        let mut log = Self {
            program,
            lines,
            max_rev: revisions.len() as Rev,
            revisions,
            head: Head::default(),
        };
        let (visits, end) = log.execute(log.max_rev, None)?;
        log.head = Head { visits, end };
        Ok(log)
    }

    pub fn max_rev(&self) -> Rev {
        self.max_rev
    }

    /// True while nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.max_rev == 0
    }

    /// Record for revision `rev`, `1..=max_rev`.
    pub fn revision(&self, rev: Rev) -> Option<&RevisionRecord> {
        let index = rev.checked_sub(1)?;
        self.revisions.get(index as usize)
    }

    pub fn revisions(&self) -> impl Iterator<Item = (Rev, &RevisionRecord)> {
        self.revisions
            .iter()
            .enumerate()
            .map(|(i, record)| (i as Rev + 1, record))
    }

    /// True if any revision was seeded from version control.
    pub fn has_provenance(&self) -> bool {
        self.revisions.iter().any(|r| r.provenance.is_some())
    }

    pub fn instruction_count(&self) -> usize {
        self.program.len()
    }

    pub(crate) fn program(&self) -> &[Instruction] {
        &self.program
    }

    pub(crate) fn lines(&self) -> &[LineRecord] {
        &self.lines
    }

    pub(crate) fn revision_records(&self) -> &[RevisionRecord] {
        &self.revisions
    }

    /// Record `text` as a live edit stamped with the current wall-clock time.
    ///
    /// Returns the new revision, or `max_rev` unchanged when `text` equals
    /// the current checkout.
    pub fn append(&mut self, text: &str) -> Rev {
        self.append_at(text, now_ms())
    }

    /// Record `text` as a live edit stamped with `timestamp_ms`.
    pub fn append_at(&mut self, text: &str, timestamp_ms: u64) -> Rev {
        self.record(
            text,
            RevisionRecord {
                timestamp_ms,
                provenance: None,
            },
        )
    }

    /// Record a historical snapshot along with its commit metadata.
    pub fn append_with_metadata(&mut self, text: &str, metadata: RevisionMetadata) -> Rev {
        self.record(text, metadata.into())
    }

    fn record(&mut self, text: &str, record: RevisionRecord) -> Rev {
        let new_lines = split_lines(text);
        let hunks = {
            let old: Vec<&str> = self
                .head
                .visits
                .iter()
                .map(|v| self.lines[v.line].text.as_str())
                .collect();
            diff::diff_lines(&old, &new_lines)
        };

        if hunks.is_empty() {
            debug!(max_rev = self.max_rev, "text unchanged, no revision recorded");
            return self.max_rev;
        }

        let rev = self.max_rev + 1;
        // Bottom-up so earlier hunk indices stay valid against the head.
        for hunk in hunks.iter().rev() {
            self.replace_lines(rev, hunk, &new_lines);
        }
        self.max_rev = rev;
        self.revisions.push(record);

        debug!(
            rev,
            hunks = hunks.len(),
            lines = self.head.visits.len(),
            instructions = self.program.len(),
            "recorded revision"
        );
        rev
    }

    /// Replace head lines `[a1, a2)` with `new_lines[b1..b2]`, introduced at `rev`.
    ///
    /// The new block is appended to the program. The slot at `a1` is
    /// redirected into it and its old instruction is relocated to the end of
    /// the block, so every path taken by an earlier revision is unchanged.
    fn replace_lines(&mut self, rev: Rev, hunk: &Hunk, new_lines: &[&str]) {
        let a1_pc = self.head.pc_at(hunk.a1);
        let a1_inst = self.program[a1_pc];
        let base = self.program.len();

        let mut inserted = Vec::with_capacity(hunk.b2 - hunk.b1);
        if hunk.b1 < hunk.b2 {
            self.program.push(Instruction::Insert {
                rev,
                skip: base + (hunk.b2 - hunk.b1) + 1,
            });
            for text in &new_lines[hunk.b1..hunk.b2] {
                let line = self.lines.len();
                self.lines.push(LineRecord {
                    text: (*text).to_owned(),
                    rev,
                    retired: None,
                });
                inserted.push(Visit {
                    pc: self.program.len(),
                    line,
                });
                self.program.push(Instruction::Line { line });
            }
        }

        if hunk.a1 < hunk.a2 {
            let skip = self.head.pc_at(hunk.a2);
            self.program.push(Instruction::Retire { rev, skip });
            for visit in &self.head.visits[hunk.a1..hunk.a2] {
                self.lines[visit.line].retired = Some(rev);
            }
        }

        let relocated = self.program.len();
        self.program.push(a1_inst);
        if !matches!(a1_inst, Instruction::Jump { .. } | Instruction::End) {
            self.program.push(Instruction::Jump { target: a1_pc + 1 });
        }
        self.program[a1_pc] = Instruction::Jump { target: base };

        match self.head.visits.get_mut(hunk.a1) {
            Some(visit) => visit.pc = relocated,
            None => self.head.end = relocated,
        }
        self.head.visits.splice(hunk.a1..hunk.a2, inserted);
    }
}

/// Split text into lines, each keeping its terminator.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
