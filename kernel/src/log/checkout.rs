// Checkout Engine
//
// Executes the instruction program for a requested revision and
// materializes the lines met along the way.

use serde::Serialize;
use std::borrow::Cow;

use super::{Instruction, LineId, LineLog, LogError, Pc, Rev};

/// A `Line` instruction reached during execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Visit {
    pub(crate) pc: Pc,
    pub(crate) line: LineId,
}

/// A line as seen by one checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaterializedLine<'a> {
    pub text: &'a str,

    /// Revision that introduced the line.
    pub rev: Rev,

    /// Revision that retired the line, when that happened within the
    /// checked-out range. Always `None` in plain checkouts.
    pub deleted_at: Option<Rev>,
}

impl MaterializedLine<'_> {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Result of checking out a revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Checkout<'a> {
    pub rev: Rev,
    pub start: Option<Rev>,
    pub lines: Vec<MaterializedLine<'a>>,
}

impl<'a> Checkout<'a> {
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MaterializedLine<'a>> {
        self.lines.iter()
    }

    /// Render the checkout as text.
    ///
    /// Plain checkouts reproduce the recorded text exactly. Deleted-inclusive
    /// checkouts end every line with `\n` so retired lines stay on their own
    /// row.
    pub fn text(&self) -> String {
        let mut text = String::with_capacity(self.lines.iter().map(|l| l.text.len() + 1).sum());
        for line in &self.lines {
            text.push_str(line.text);
            if self.start.is_some() && !line.text.ends_with('\n') {
                text.push('\n');
            }
        }
        text
    }
}

impl LineLog {
    /// Check out revision `rev`.
    ///
    /// With `start`, lines retired within `(start, rev]` are included at the
    /// position they held before removal and flagged deleted.
    pub fn checkout(&self, rev: Rev, start: Option<Rev>) -> Result<Checkout<'_>, LogError> {
        if rev > self.max_rev {
            return Err(LogError::InvalidRevision {
                rev,
                max_rev: self.max_rev,
            });
        }
        if let Some(start) = start {
            if start > rev {
                return Err(LogError::InvalidStart { start, rev });
            }
        }

        let visits = if start.is_none() && rev == self.max_rev {
            Cow::Borrowed(&self.head.visits)
        } else {
            Cow::Owned(self.execute(rev, start)?.0)
        };

        let lines = visits
            .iter()
            .map(|visit| {
                let record = &self.lines[visit.line];
                MaterializedLine {
                    text: &record.text,
                    rev: record.rev,
                    deleted_at: record.retired.filter(|retired| *retired <= rev),
                }
            })
            .collect();

        Ok(Checkout { rev, start, lines })
    }

    /// Text as of revision `rev`.
    pub fn checkout_text(&self, rev: Rev) -> Result<String, LogError> {
        Ok(self.checkout(rev, None)?.text())
    }

    /// Run the program. Insertion guards compare against `rev`; retirement
    /// guards compare against `start` when given, so runs retired after
    /// `start` are walked instead of skipped.
    ///
    /// Returns the visited lines and the address of the `End` reached.
    pub(crate) fn execute(&self, rev: Rev, start: Option<Rev>) -> Result<(Vec<Visit>, Pc), LogError> {
        let retire_cutoff = start.unwrap_or(rev);
        let mut visits = Vec::new();
        let mut pc = 0;

        // A well-formed program reaches each address at most once per path.
        for _ in 0..self.program.len() {
            let instruction = self
                .program
                .get(pc)
                .ok_or(LogError::CorruptProgram { pc })?;
            pc = match *instruction {
                Instruction::Line { line } => {
                    if line >= self.lines.len() {
                        return Err(LogError::CorruptProgram { pc });
                    }
                    visits.push(Visit { pc, line });
                    pc + 1
                }
                Instruction::Insert { rev: introduced, skip } => {
                    if rev < introduced {
                        skip
                    } else {
                        pc + 1
                    }
                }
                Instruction::Retire { rev: retired, skip } => {
                    if retire_cutoff >= retired {
                        skip
                    } else {
                        pc + 1
                    }
                }
                Instruction::Jump { target } => target,
                Instruction::End => return Ok((visits, pc)),
            };
        }

        Err(LogError::CorruptProgram { pc })
    }
}
