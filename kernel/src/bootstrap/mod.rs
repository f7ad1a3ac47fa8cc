// History Bootstrap
//
// Seeds a line log from version-control history before live tracking
// starts. Sources are slow (they walk commits and may shell out), so they
// run as cancellable tasks; until one finishes the file is tracked with an
// empty log.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::log::{LineLog, LogError, Rev, RevisionMetadata};

/// A historical full-text state of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub text: String,
    pub metadata: RevisionMetadata,
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryUnavailable {
    #[error("{} is not inside a repository", .0.display())]
    NotARepository(PathBuf),

    #[error("{} is outside repository {}", .path.display(), .root.display())]
    OutsideRepository { path: PathBuf, root: PathBuf },

    #[error("history tool `{0}` is not available")]
    ToolUnavailable(String),

    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bootstrap cancelled")]
    Cancelled,

    #[error("bootstrap task failed: {0}")]
    TaskFailed(String),
}

/// Supplies historical snapshots of one file, oldest first.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn snapshots(
        &self,
        repo_root: &Path,
        relative_path: &Path,
    ) -> Result<Vec<Snapshot>, HistoryUnavailable>;
}

/// A running bootstrap. Dropping the task cancels it.
#[derive(Debug)]
pub struct BootstrapTask {
    handle: Option<JoinHandle<Result<Vec<Snapshot>, HistoryUnavailable>>>,
}

impl BootstrapTask {
    /// Start collecting history on the current tokio runtime.
    pub fn spawn(source: Arc<dyn HistorySource>, repo_root: PathBuf, relative_path: PathBuf) -> Self {
        let handle = tokio::spawn(async move {
            debug!(
                root = %repo_root.display(),
                path = %relative_path.display(),
                "collecting history"
            );
            source.snapshots(&repo_root, &relative_path).await
        });
        Self {
            handle: Some(handle),
        }
    }

    pub fn cancel(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }

    /// Wait for the snapshots.
    pub async fn join(mut self) -> Result<Vec<Snapshot>, HistoryUnavailable> {
        let result = match self.handle.as_mut() {
            Some(handle) => handle.await,
            None => return Err(HistoryUnavailable::Cancelled),
        };
        self.handle = None;

        match result {
            Ok(snapshots) => snapshots,
            Err(err) if err.is_cancelled() => Err(HistoryUnavailable::Cancelled),
            Err(err) => Err(HistoryUnavailable::TaskFailed(err.to_string())),
        }
    }
}

impl Drop for BootstrapTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Build a log from snapshots, one `append_with_metadata` per entry.
pub fn seed_log(snapshots: impl IntoIterator<Item = Snapshot>) -> LineLog {
    let mut log = LineLog::new();
    for snapshot in snapshots {
        log.append_with_metadata(&snapshot.text, snapshot.metadata);
    }
    info!(revisions = log.max_rev(), "seeded history");
    log
}

/// Replay the live revisions of `live` on top of `seeded`, keeping their
/// timestamps. Returns the resulting max revision.
pub fn carry_live_revisions(seeded: &mut LineLog, live: &LineLog) -> Result<Rev, LogError> {
    for (rev, record) in live.revisions() {
        let text = live.checkout_text(rev)?;
        seeded.append_at(&text, record.timestamp_ms);
    }
    Ok(seeded.max_rev())
}
