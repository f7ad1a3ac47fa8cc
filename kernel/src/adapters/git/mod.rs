// Git History Adapter
//
// Reads a file's history through the `git` command line tool and turns it
// into bootstrap snapshots, oldest first.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::bootstrap::{HistorySource, HistoryUnavailable, Snapshot};
use crate::config::BootstrapConfig;
use crate::log::RevisionMetadata;

const FIELD_SEP: char = '\x1f';
const RECORD_SEP: char = '\x1e';
const LOG_FORMAT: &str = "--format=%H%x1f%an%x1f%at%x1f%s%x1e";

/// One commit touching the file, as listed by `git log`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub commit_id: String,
    pub author: String,
    pub timestamp_ms: u64,
    pub subject: String,
}

/// History source running `git` in the repository root.
#[derive(Debug, Clone)]
pub struct GitHistory {
    binary: String,
    max_commits: Option<usize>,
}

impl Default for GitHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl GitHistory {
    pub fn new() -> Self {
        Self {
            binary: "git".into(),
            max_commits: None,
        }
    }

    pub fn from_config(config: &BootstrapConfig) -> Self {
        Self {
            binary: config.git_binary.clone(),
            max_commits: config.max_commits,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Walk at most the newest `max_commits` commits.
    pub fn with_max_commits(mut self, max_commits: usize) -> Self {
        self.max_commits = Some(max_commits);
        self
    }

    async fn run(&self, root: &Path, args: &[String]) -> Result<Vec<u8>, HistoryUnavailable> {
        let output = Command::new(&self.binary)
            .arg("-C")
            .arg(root)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => HistoryUnavailable::ToolUnavailable(self.binary.clone()),
                _ => HistoryUnavailable::Io(err),
            })?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(HistoryUnavailable::CommandFailed {
                command: format!("{} {}", self.binary, args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            })
        }
    }
}

#[async_trait]
impl HistorySource for GitHistory {
    async fn snapshots(
        &self,
        repo_root: &Path,
        relative_path: &Path,
    ) -> Result<Vec<Snapshot>, HistoryUnavailable> {
        if !repo_root.join(".git").exists() {
            return Err(HistoryUnavailable::NotARepository(repo_root.to_path_buf()));
        }
        let git_path = pathspec(relative_path);

        let mut args = vec!["log".to_owned(), LOG_FORMAT.to_owned()];
        if let Some(max) = self.max_commits {
            args.push(format!("-n{max}"));
        }
        args.push("--".to_owned());
        args.push(git_path.clone());

        let listing = self.run(repo_root, &args).await?;
        let mut entries = parse_log(&String::from_utf8_lossy(&listing));
        entries.reverse();
        debug!(path = %git_path, commits = entries.len(), "listed file history");

        let mut snapshots = Vec::with_capacity(entries.len());
        for entry in entries {
            let show = vec!["show".to_owned(), format!("{}:{git_path}", entry.commit_id)];
            let blob = match self.run(repo_root, &show).await {
                Ok(blob) => blob,
                // The file does not exist in this commit (deleted or renamed away).
                Err(HistoryUnavailable::CommandFailed { .. }) => {
                    debug!(commit = %entry.commit_id, "file absent in commit, skipped");
                    continue;
                }
                Err(err) => return Err(err),
            };
            let text = match String::from_utf8(blob) {
                Ok(text) => text,
                Err(_) => {
                    warn!(commit = %entry.commit_id, "non utf-8 content, skipped");
                    continue;
                }
            };
            snapshots.push(Snapshot {
                text,
                metadata: RevisionMetadata {
                    commit_id: entry.commit_id,
                    author: entry.author,
                    message: entry.subject,
                    timestamp_ms: entry.timestamp_ms,
                },
            });
        }

        Ok(snapshots)
    }
}

/// Find the repository containing `path` by walking up to a `.git` entry.
pub fn discover_root(path: &Path) -> Result<PathBuf, HistoryUnavailable> {
    let start = if path.is_dir() {
        path
    } else {
        path.parent().unwrap_or(path)
    };
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
        .ok_or_else(|| HistoryUnavailable::NotARepository(path.to_path_buf()))
}

/// Path of `file` relative to `root`.
pub fn relative_to_root(root: &Path, file: &Path) -> Result<PathBuf, HistoryUnavailable> {
    file.strip_prefix(root)
        .map(Path::to_path_buf)
        .map_err(|_| HistoryUnavailable::OutsideRepository {
            path: file.to_path_buf(),
            root: root.to_path_buf(),
        })
}

fn pathspec(relative_path: &Path) -> String {
    relative_path.to_string_lossy().replace('\\', "/")
}

/// Parse `git log` output produced with [`LOG_FORMAT`]. Malformed records
/// are dropped.
pub fn parse_log(output: &str) -> Vec<LogEntry> {
    output
        .split(RECORD_SEP)
        .map(|record| record.trim_start_matches(['\n', '\r']))
        .filter(|record| !record.is_empty())
        .filter_map(|record| {
            let mut fields = record.splitn(4, FIELD_SEP);
            let commit_id = fields.next()?.to_owned();
            let author = fields.next()?.to_owned();
            let seconds: u64 = fields.next()?.trim().parse().ok()?;
            let subject = fields.next().unwrap_or_default().to_owned();
            Some(LogEntry {
                commit_id,
                author,
                timestamp_ms: seconds * 1000,
                subject,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process;

    fn git(dir: &Path, args: &[&str], date: &str) {
        let status = process::Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(["-c", "user.name=Dana", "-c", "user.email=dana@example.com"])
            .args(["-c", "commit.gpgsign=false"])
            .args(args)
            .env("GIT_AUTHOR_DATE", date)
            .env("GIT_COMMITTER_DATE", date)
            .status()
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    fn commit(dir: &Path, subject: &str, date: &str) {
        git(dir, &["commit", "-q", "-m", subject], date);
    }

    #[test]
    fn parses_log_records() {
        let output = "abc123\x1fAlice\x1f1700000000\x1fFix bug\x1e\n\
                      def456\x1fBob\x1f1600000000\x1fInitial\x1e\n";
        let entries = parse_log(output);

        assert_eq!(
            entries,
            vec![
                LogEntry {
                    commit_id: "abc123".into(),
                    author: "Alice".into(),
                    timestamp_ms: 1_700_000_000_000,
                    subject: "Fix bug".into(),
                },
                LogEntry {
                    commit_id: "def456".into(),
                    author: "Bob".into(),
                    timestamp_ms: 1_600_000_000_000,
                    subject: "Initial".into(),
                },
            ]
        );
    }

    #[test]
    fn malformed_records_are_dropped() {
        let output = "abc\x1fAlice\x1fnot-a-number\x1fx\x1e\nonlyhash\x1e\n\n";
        assert!(parse_log(output).is_empty());
        assert!(parse_log("").is_empty());
    }

    #[test]
    fn subject_may_be_empty() {
        let entries = parse_log("abc\x1fAlice\x1f1\x1f\x1e\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].subject, "");
    }

    #[test]
    fn discovers_repository_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        let file = dir.path().join("src/nested/lib.rs");
        fs::write(&file, "x\n").unwrap();

        let root = discover_root(&file).unwrap();
        assert_eq!(root, dir.path());
        assert_eq!(
            relative_to_root(&root, &file).unwrap(),
            PathBuf::from("src/nested/lib.rs")
        );
    }

    #[test]
    fn path_outside_repository_is_rejected() {
        let err = relative_to_root(Path::new("/repo"), Path::new("/elsewhere/file.rs")).unwrap_err();
        assert!(matches!(err, HistoryUnavailable::OutsideRepository { .. }));
    }

    #[tokio::test]
    async fn non_repository_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = GitHistory::new()
            .snapshots(dir.path(), Path::new("file.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, HistoryUnavailable::NotARepository(_)));
    }

    #[tokio::test]
    async fn missing_tool_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();

        let err = GitHistory::new()
            .with_binary("definitely-not-a-git-binary")
            .snapshots(dir.path(), Path::new("file.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, HistoryUnavailable::ToolUnavailable(_)));
    }

    #[tokio::test]
    async fn reads_file_history_oldest_first() {
        if process::Command::new("git").arg("--version").output().is_err() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        git(root, &["init", "-q"], "1700000000 +0000");

        fs::write(root.join("notes.txt"), "a\n").unwrap();
        git(root, &["add", "notes.txt"], "1700000000 +0000");
        commit(root, "Start notes", "1700000000 +0000");

        fs::write(root.join("notes.txt"), "a\nb\n").unwrap();
        git(root, &["add", "notes.txt"], "1700000100 +0000");
        commit(root, "Add b", "1700000100 +0000");

        git(root, &["rm", "-q", "notes.txt"], "1700000200 +0000");
        commit(root, "Drop notes", "1700000200 +0000");

        fs::write(root.join("notes.txt"), "c\n").unwrap();
        git(root, &["add", "notes.txt"], "1700000300 +0000");
        commit(root, "Restore notes", "1700000300 +0000");

        let snapshots = GitHistory::new()
            .snapshots(root, Path::new("notes.txt"))
            .await
            .unwrap();
        let texts: Vec<_> = snapshots.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, ["a\n", "a\nb\n", "c\n"]);

        let subjects: Vec<_> = snapshots.iter().map(|s| s.metadata.message.as_str()).collect();
        assert_eq!(subjects, ["Start notes", "Add b", "Restore notes"]);
        let stamps: Vec<_> = snapshots.iter().map(|s| s.metadata.timestamp_ms).collect();
        assert_eq!(stamps, [1_700_000_000_000, 1_700_000_100_000, 1_700_000_300_000]);
        assert!(snapshots.iter().all(|s| s.metadata.author == "Dana"));
        assert!(snapshots.iter().all(|s| s.metadata.commit_id.len() == 40));
        assert_ne!(snapshots[0].metadata.commit_id, snapshots[1].metadata.commit_id);

        // The newest two commits are the re-add and the deletion.
        let recent = GitHistory::new()
            .with_max_commits(2)
            .snapshots(root, Path::new("notes.txt"))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].text, "c\n");
        assert_eq!(recent[0].metadata.message, "Restore notes");
    }
}
