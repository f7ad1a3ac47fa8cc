// Line Log Registry
//
// Owns the line log of every tracked file in a session. Each log sits behind
// its own reader/writer lock: appends and seeding take the write side,
// checkouts and saves the read side. Blobs are loaded lazily from the store
// and written back only when asked.

use parking_lot::RwLock;
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bootstrap::{self, Snapshot};
use crate::codec::{self, EncodeError};
use crate::log::store::{LineLogStore, StorageError};
use crate::log::{LineLog, LogError, Rev, RevisionMetadata};

pub type SharedLog = Arc<RwLock<LineLog>>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("line log error: {0}")]
    Log(#[from] LogError),

    #[error("encoding error: {0}")]
    Encode(#[from] EncodeError),
}

pub struct Registry<S: LineLogStore> {
    store: S,
    logs: RwLock<HashMap<PathBuf, SharedLog>>,
}

impl<S: LineLogStore> Registry<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            logs: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The log for `file`, loading it from the store on first use.
    ///
    /// A stored blob that fails to decode is discarded and replaced by an
    /// empty log.
    pub fn open(&self, file: &Path) -> Result<SharedLog, StorageError> {
        if let Some(log) = self.logs.read().get(file) {
            return Ok(Arc::clone(log));
        }

        let mut logs = self.logs.write();
        if let Some(log) = logs.get(file) {
            return Ok(Arc::clone(log));
        }
        let log = Arc::new(RwLock::new(self.load(file)?));
        logs.insert(file.to_path_buf(), Arc::clone(&log));
        Ok(log)
    }

    fn load(&self, file: &Path) -> Result<LineLog, StorageError> {
        let Some(bytes) = self.store.load(file)? else {
            debug!(file = %file.display(), "no stored history");
            return Ok(LineLog::new());
        };
        match codec::import(&bytes) {
            Ok(log) => {
                debug!(file = %file.display(), max_rev = log.max_rev(), "loaded history");
                Ok(log)
            }
            Err(err) => {
                warn!(file = %file.display(), error = %err, "discarding corrupt history");
                Ok(LineLog::new())
            }
        }
    }

    /// Record the current text of `file`.
    pub fn record_text(&self, file: &Path, text: &str) -> Result<Rev, StorageError> {
        let log = self.open(file)?;
        let text = normalize_text(text);
        let rev = log.write().append(&text);
        Ok(rev)
    }

    /// Record one historical snapshot of `file` with its commit metadata.
    pub fn record_bootstrap_entry(
        &self,
        file: &Path,
        text: &str,
        metadata: RevisionMetadata,
    ) -> Result<Rev, StorageError> {
        let log = self.open(file)?;
        let text = normalize_text(text);
        let rev = log.write().append_with_metadata(&text, metadata);
        Ok(rev)
    }

    /// Install bootstrapped history for `file`.
    ///
    /// Live revisions recorded while the bootstrap was pending are replayed
    /// on top of the snapshots. Logs that already carry commit provenance
    /// are left alone.
    pub fn seed(&self, file: &Path, snapshots: Vec<Snapshot>) -> Result<Rev, RegistryError> {
        let log = self.open(file)?;
        {
            let current = log.read();
            if current.has_provenance() {
                debug!(file = %file.display(), "history already bootstrapped");
                return Ok(current.max_rev());
            }
        }

        let mut seeded = bootstrap::seed_log(snapshots.into_iter().map(|mut snapshot| {
            if let Cow::Owned(text) = normalize_text(&snapshot.text) {
                snapshot.text = text;
            }
            snapshot
        }));
        if seeded.is_empty() {
            return Ok(log.read().max_rev());
        }

        let mut current = log.write();
        // Another seed may have won while the snapshots were replayed.
        if current.has_provenance() {
            debug!(file = %file.display(), "history already bootstrapped");
            return Ok(current.max_rev());
        }
        let live = current.max_rev();
        let max_rev = bootstrap::carry_live_revisions(&mut seeded, &current)?;
        *current = seeded;
        info!(
            file = %file.display(),
            max_rev,
            live_revisions = live,
            "installed bootstrapped history"
        );
        Ok(max_rev)
    }

    /// Write the log of `file` to the store, if it is open.
    pub fn save(&self, file: &Path) -> Result<(), RegistryError> {
        let Some(log) = self.logs.read().get(file).cloned() else {
            return Ok(());
        };
        let bytes = codec::export(&log.read())?;
        self.store.save(file, &bytes)?;
        Ok(())
    }

    pub fn save_all(&self) -> Result<(), RegistryError> {
        let logs: Vec<_> = self
            .logs
            .read()
            .iter()
            .map(|(file, log)| (file.clone(), Arc::clone(log)))
            .collect();
        for (file, log) in logs {
            let bytes = codec::export(&log.read())?;
            self.store.save(&file, &bytes)?;
        }
        Ok(())
    }

    /// Move the open log of `old` to `new`.
    ///
    /// Nothing moves when `new` already has stored history of its own.
    pub fn rename(&self, old: &Path, new: &Path) -> bool {
        if old == new || self.store.contains(new) {
            return false;
        }
        let mut logs = self.logs.write();
        match logs.remove(old) {
            Some(log) => {
                logs.insert(new.to_path_buf(), log);
                info!(from = %old.display(), to = %new.display(), "history follows rename");
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, file: &Path) -> bool {
        self.logs.read().contains_key(file)
    }

    pub fn len(&self) -> usize {
        self.logs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.read().is_empty()
    }

    /// Drop every open log. Unsaved history is lost.
    pub fn clear(&self) {
        let mut logs = self.logs.write();
        let count = logs.len();
        logs.clear();
        info!(count, "registry cleared");
    }
}

/// Terminate the last line with `\n`.
pub fn normalize_text(text: &str) -> Cow<'_, str> {
    if text.ends_with('\n') {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(format!("{text}\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::store::MemoryStore;

    fn snapshot(text: &str, commit: &str) -> Snapshot {
        Snapshot {
            text: text.into(),
            metadata: RevisionMetadata {
                commit_id: commit.into(),
                author: "erin".into(),
                message: String::new(),
                timestamp_ms: 1,
            },
        }
    }

    #[test]
    fn records_and_reloads_history() {
        let file = Path::new("/w/a.txt");
        let registry = Registry::new(MemoryStore::new());

        assert_eq!(registry.record_text(file, "one").unwrap(), 1);
        assert_eq!(registry.record_text(file, "one\ntwo\n").unwrap(), 2);
        assert_eq!(registry.record_text(file, "one\ntwo").unwrap(), 2);
        registry.save(file).unwrap();

        registry.clear();
        assert!(registry.is_empty());

        let log = registry.open(file).unwrap();
        let log = log.read();
        assert_eq!(log.max_rev(), 2);
        assert_eq!(log.checkout_text(1).unwrap(), "one\n");
        assert_eq!(log.checkout_text(2).unwrap(), "one\ntwo\n");
    }

    #[test]
    fn open_returns_the_same_instance() {
        let registry = Registry::new(MemoryStore::new());
        let a = registry.open(Path::new("/w/x")).unwrap();
        let b = registry.open(Path::new("/w/x")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn corrupt_blob_falls_back_to_empty_log() {
        let file = Path::new("/w/broken");
        let store = MemoryStore::new();
        store.save(file, b"LNLG\x01garbage").unwrap();

        let registry = Registry::new(store);
        let log = registry.open(file).unwrap();
        assert!(log.read().is_empty());
        assert_eq!(registry.record_text(file, "fresh\n").unwrap(), 1);
    }

    #[test]
    fn seed_replays_pending_live_edits() {
        let file = Path::new("/w/lib.rs");
        let registry = Registry::new(MemoryStore::new());
        registry.record_text(file, "a\nb\nlive\n").unwrap();

        let max_rev = registry
            .seed(
                file,
                vec![snapshot("a\n", "c1"), snapshot("a\nb", "c2"), snapshot("a\nb\nc\n", "c3")],
            )
            .unwrap();
        assert_eq!(max_rev, 4);

        let log = registry.open(file).unwrap();
        let log = log.read();
        assert_eq!(log.checkout_text(2).unwrap(), "a\nb\n");
        assert_eq!(log.checkout_text(4).unwrap(), "a\nb\nlive\n");
        assert!(log.revision(3).unwrap().provenance.is_some());
        assert!(log.revision(4).unwrap().provenance.is_none());
    }

    #[test]
    fn bootstrap_entries_carry_provenance() {
        let file = Path::new("/w/main.rs");
        let registry = Registry::new(MemoryStore::new());
        let first = snapshot("fn main() {}", "c1");
        assert_eq!(
            registry
                .record_bootstrap_entry(file, &first.text, first.metadata.clone())
                .unwrap(),
            1
        );
        assert_eq!(registry.record_text(file, "fn main() {}
").unwrap(), 1);

        let log = registry.open(file).unwrap();
        let log = log.read();
        let provenance = log.revision(1).unwrap().provenance.as_ref().unwrap();
        assert_eq!(provenance.commit_id, "c1");
    }

    #[test]
    fn seed_is_applied_once() {
        let file = Path::new("/w/lib.rs");
        let registry = Registry::new(MemoryStore::new());
        assert_eq!(registry.seed(file, vec![snapshot("a\n", "c1")]).unwrap(), 1);
        assert_eq!(
            registry
                .seed(file, vec![snapshot("x\n", "c9"), snapshot("y\n", "c10")])
                .unwrap(),
            1
        );
    }

    #[test]
    fn concurrent_seeds_install_one_history() {
        let file = Path::new("/w/race.rs");
        let registry = Registry::new(MemoryStore::new());
        let left = vec![snapshot("l1\n", "l1"), snapshot("l1\nl2\n", "l2")];
        let right = vec![snapshot("r1\n", "r1"), snapshot("r1\nr2\n", "r2")];

        std::thread::scope(|scope| {
            let a = scope.spawn(|| registry.seed(file, left).unwrap());
            let b = scope.spawn(|| registry.seed(file, right).unwrap());
            assert_eq!(a.join().unwrap(), 2);
            assert_eq!(b.join().unwrap(), 2);
        });

        let log = registry.open(file).unwrap();
        let log = log.read();
        assert_eq!(log.max_rev(), 2);
        let first = log.revision(1).unwrap().provenance.as_ref().unwrap();
        let second = log.revision(2).unwrap().provenance.as_ref().unwrap();
        let expected = match first.commit_id.as_str() {
            "l1" => ("l2", "l1\nl2\n"),
            "r1" => ("r2", "r1\nr2\n"),
            other => panic!("unexpected commit {other}"),
        };
        assert_eq!(second.commit_id, expected.0);
        assert_eq!(log.checkout_text(2).unwrap(), expected.1);
    }

    #[test]
    fn empty_bootstrap_keeps_live_history() {
        let file = Path::new("/w/new.rs");
        let registry = Registry::new(MemoryStore::new());
        registry.record_text(file, "x\n").unwrap();
        assert_eq!(registry.seed(file, Vec::new()).unwrap(), 1);
    }

    #[test]
    fn rename_moves_open_history() {
        let registry = Registry::new(MemoryStore::new());
        let old = Path::new("untitled-1");
        let new = Path::new("/w/saved.txt");
        registry.record_text(old, "draft\n").unwrap();

        assert!(registry.rename(old, new));
        assert!(!registry.contains(old));
        assert_eq!(registry.open(new).unwrap().read().max_rev(), 1);

        assert!(!registry.rename(new, new));
        assert!(!registry.rename(Path::new("/w/unknown"), Path::new("/w/other")));
    }

    #[test]
    fn rename_keeps_existing_stored_history() {
        let registry = Registry::new(MemoryStore::new());
        let stored = Path::new("/w/existing.txt");
        registry.record_text(stored, "kept\n").unwrap();
        registry.save(stored).unwrap();
        registry.clear();

        registry.record_text(Path::new("untitled"), "draft\n").unwrap();
        assert!(!registry.rename(Path::new("untitled"), stored));
        assert_eq!(
            registry.open(stored).unwrap().read().checkout_text(1).unwrap(),
            "kept\n"
        );
    }

    #[test]
    fn save_all_persists_every_open_log() {
        let registry = Registry::new(MemoryStore::new());
        registry.record_text(Path::new("/a"), "a\n").unwrap();
        registry.record_text(Path::new("/b"), "b\n").unwrap();
        registry.save_all().unwrap();

        assert!(registry.store().contains(Path::new("/a")));
        assert!(registry.store().contains(Path::new("/b")));
    }

    #[test]
    fn normalization_terminates_last_line() {
        assert_eq!(normalize_text("a\n"), "a\n");
        assert_eq!(normalize_text("a"), "a\n");
        assert_eq!(normalize_text(""), "\n");
    }
}
