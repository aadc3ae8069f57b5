//! Filesystem-backed store.
//!
//! Layout: `<root>/<namespace>/<hh>/<sha256(key)>.json`, where `hh` is the
//! first two hex characters of the key digest. Each file holds the original
//! key next to the value so that [`FingerprintStore::keys`] can be answered
//! from disk alone.

use super::{FingerprintStore, Namespace};
use crate::error::{StoreError, StoreResult};
use crate::hash::HashAlgorithm;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    key: String,
    value: String,
}

/// Atomically write a file (write temp, fsync, rename, fsync dir).
fn atomic_write(path: &Path, data: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;

    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all(); // Best effort, not every filesystem supports it
    }

    Ok(())
}

/// Store persisted under a directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Create or open a store at `root`.
    ///
    /// Leftover temporary files from interrupted writes are removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let store = Self { root };
        store.remove_stale_temp_files();
        debug!(root = %store.root.display(), "Opened fingerprint store");
        Ok(store)
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, namespace: Namespace, key: &str) -> PathBuf {
        let digest = HashAlgorithm::Sha256.hash_str(key);
        self.root
            .join(namespace.as_str())
            .join(&digest[0..2])
            .join(format!("{digest}.json"))
    }

    fn read_record(&self, namespace: Namespace, path: &Path) -> StoreResult<Option<StoredRecord>> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    namespace,
                    key: path.display().to_string(),
                    reason: e.to_string(),
                }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove_stale_temp_files(&self) {
        for entry in walkdir::WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_map(std::result::Result::ok)
        {
            if entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "tmp")
            {
                warn!(path = %entry.path().display(), "Removing interrupted store write");
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}

impl FingerprintStore for DiskStore {
    fn get(&self, namespace: Namespace, key: &str) -> StoreResult<Option<String>> {
        let path = self.record_path(namespace, key);
        Ok(self
            .read_record(namespace, &path)?
            .filter(|record| record.key == key)
            .map(|record| record.value))
    }

    fn set(&self, namespace: Namespace, key: &str, value: &str) -> StoreResult<()> {
        let record = StoredRecord {
            key: key.to_string(),
            value: value.to_string(),
        };
        let data = serde_json::to_vec(&record)?;
        atomic_write(&self.record_path(namespace, key), &data)
    }

    fn remove(&self, namespace: Namespace, key: &str) -> StoreResult<()> {
        match fs::remove_file(self.record_path(namespace, key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self, namespace: Namespace) -> StoreResult<Vec<String>> {
        let dir = self.root.join(namespace.as_str());
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in walkdir::WalkDir::new(&dir)
            .follow_links(false)
            .into_iter()
            .filter_map(std::result::Result::ok)
        {
            let path = entry.path();
            if entry.file_type().is_file()
                && path.extension().is_some_and(|ext| ext == "json")
                && let Some(record) = self.read_record(namespace, path)?
            {
                keys.push(record.key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
