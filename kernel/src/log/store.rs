// Line Log Storage
//
// Durability contract for encoded line logs, one blob per tracked file.
// The engine itself holds no file handles; stores only move bytes.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Storage backend for encoded line logs, keyed by file identity.
///
/// Implementations MUST:
/// - Replace a previous blob atomically
/// - Return exactly the bytes last saved
pub trait LineLogStore: Send + Sync {
    /// Load the blob for `file`, `None` if nothing was saved.
    fn load(&self, file: &Path) -> Result<Option<Vec<u8>>, StorageError>;

    fn save(&self, file: &Path, bytes: &[u8]) -> Result<(), StorageError>;

    fn contains(&self, file: &Path) -> bool;
}

/// Keeps blobs in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<PathBuf, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LineLogStore for MemoryStore {
    fn load(&self, file: &Path) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.blobs.lock().get(file).cloned())
    }

    fn save(&self, file: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        self.blobs.lock().insert(file.to_path_buf(), bytes.to_vec());
        Ok(())
    }

    fn contains(&self, file: &Path) -> bool {
        self.blobs.lock().contains_key(file)
    }
}

/// Keeps blobs under a root directory, sharded by the hash of the file name.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/linelog/<h[0..2]>/<h[2..4]>/<h[4..14]>-<basename>.blob`
    pub fn blob_path(&self, file: &Path) -> PathBuf {
        let digest = Sha256::digest(file.to_string_lossy().as_bytes());
        let hashed: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        let basename = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "untitled".to_owned());

        self.root
            .join("linelog")
            .join(&hashed[0..2])
            .join(&hashed[2..4])
            .join(format!("{}-{basename}.blob", &hashed[4..14]))
    }
}

impl LineLogStore for FileStore {
    fn load(&self, file: &Path) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.blob_path(file);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::io(&path, err)),
        }
    }

    fn save(&self, file: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.blob_path(file);
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir).map_err(|err| StorageError::io(dir, err))?;

        // Write beside the target, then rename over it.
        let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
        if let Err(err) = fs::write(&tmp, bytes) {
            let _ = fs::remove_file(&tmp);
            return Err(StorageError::io(&tmp, err));
        }
        fs::rename(&tmp, &path).map_err(|err| {
            let _ = fs::remove_file(&tmp);
            StorageError::io(&path, err)
        })
    }

    fn contains(&self, file: &Path) -> bool {
        self.blob_path(file).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        let file = Path::new("/src/main.rs");

        assert!(store.load(file).unwrap().is_none());
        assert!(!store.contains(file));

        store.save(file, b"blob").unwrap();
        assert_eq!(store.load(file).unwrap().unwrap(), b"blob");
        assert!(store.contains(file));
    }

    #[test]
    fn blob_path_is_sharded_by_hash() {
        let store = FileStore::new("/state");
        let path = store.blob_path(Path::new("/home/dev/project/lib.rs"));

        let relative = path.strip_prefix("/state/linelog").unwrap();
        let parts: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 2);
        assert_eq!(parts[1].len(), 2);
        assert!(parts[2].ends_with("-lib.rs.blob"));
        assert_eq!(parts[2].len(), 10 + "-lib.rs.blob".len());

        // Same basename, different directory, different blob.
        assert_ne!(path, store.blob_path(Path::new("/other/lib.rs")));
        assert_eq!(path, store.blob_path(Path::new("/home/dev/project/lib.rs")));
    }

    #[test]
    fn file_store_replaces_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let file = Path::new("/work/notes.txt");

        assert!(store.load(file).unwrap().is_none());

        store.save(file, b"first").unwrap();
        store.save(file, b"second").unwrap();
        assert_eq!(store.load(file).unwrap().unwrap(), b"second");
        assert!(store.contains(file));

        let leftovers: Vec<_> = fs::read_dir(store.blob_path(file).parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1, "temporary files left: {leftovers:?}");
    }
}
