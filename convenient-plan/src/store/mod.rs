//! Persistent fingerprint store.
//!
//! A namespaced string key-value store. Namespaces hold, per target:
//!
//! | namespace  | content                                        |
//! |------------|------------------------------------------------|
//! | `command`  | standardized command text of the last build    |
//! | `depends`  | aggregate dependency fingerprint               |
//! | `kernels`  | fingerprint of the value (or file content)     |
//! | `objects`  | the value itself, JSON encoded                 |
//! | `progress` | `running`, `done` or `failed`                  |
//! | `meta`     | [`BuildRecord`] with timing information        |
//! | `config`   | store-wide settings such as the hash algorithm |
//!
//! Writes for one target are ordered so that `progress = done` is always
//! the last record written. An interrupted build therefore leaves the
//! target missing, never half-committed.

mod disk;
mod memory;

pub use disk::DiskStore;
pub use memory::MemoryStore;

use crate::error::{StoreError, StoreResult};
use crate::meta::StoredMeta;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Partition of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Command snapshots
    Command,
    /// Aggregate dependency fingerprints
    Depends,
    /// Value fingerprints
    Kernels,
    /// Built values
    Objects,
    /// Build progress markers
    Progress,
    /// Build records
    Meta,
    /// Store-wide settings
    Config,
}

impl Namespace {
    /// Every namespace that holds per-target records.
    pub const TARGET: [Namespace; 6] = [
        Namespace::Command,
        Namespace::Depends,
        Namespace::Kernels,
        Namespace::Objects,
        Namespace::Progress,
        Namespace::Meta,
    ];

    /// Directory/name of this namespace.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Namespace::Command => "command",
            Namespace::Depends => "depends",
            Namespace::Kernels => "kernels",
            Namespace::Objects => "objects",
            Namespace::Progress => "progress",
            Namespace::Meta => "meta",
            Namespace::Config => "config",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespaced key-value persistence.
///
/// Implementations must be safe to share between concurrently running
/// builds. A single `set` must be atomic with respect to readers.
pub trait FingerprintStore: Send + Sync {
    /// Read a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage fails.
    fn get(&self, namespace: Namespace, key: &str) -> StoreResult<Option<String>>;

    /// Write a record, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage fails.
    fn set(&self, namespace: Namespace, key: &str, value: &str) -> StoreResult<()>;

    /// Whether a record exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage fails.
    fn exists(&self, namespace: Namespace, key: &str) -> StoreResult<bool> {
        Ok(self.get(namespace, key)?.is_some())
    }

    /// Delete a record. Deleting an absent record is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage fails.
    fn remove(&self, namespace: Namespace, key: &str) -> StoreResult<()>;

    /// All keys in a namespace, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage fails.
    fn keys(&self, namespace: Namespace) -> StoreResult<Vec<String>>;
}

/// Build progress of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Progress {
    /// Build started and has not committed yet
    Running,
    /// Last build committed successfully
    Done,
    /// Last build failed
    Failed,
}

impl Progress {
    /// Persisted form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Progress::Running => "running",
            Progress::Done => "done",
            Progress::Failed => "failed",
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Progress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Progress::Running),
            "done" => Ok(Progress::Done),
            "failed" => Ok(Progress::Failed),
            other => Err(format!("unknown progress '{other}'")),
        }
    }
}

/// Timing information about a target's last successful build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    /// When the build finished
    pub built_at: DateTime<Utc>,
    /// Wall time of the build, including retries
    pub duration_ms: u64,
    /// Attempts used
    pub attempts: u32,
}

/// Everything written for one successful build.
#[derive(Debug, Clone)]
pub struct Commit<'a> {
    /// The built value
    pub value: &'a Value,
    /// Fingerprint of the value, or of the file for file targets
    pub kernel: &'a str,
    /// Aggregate dependency fingerprint at build time
    pub depends: &'a str,
    /// Standardized command text
    pub command: &'a str,
    /// Timing information
    pub record: &'a BuildRecord,
}

/// Typed access to per-target records on top of any [`FingerprintStore`].
pub trait RecordsExt: FingerprintStore {
    /// Snapshots the trigger evaluator compares against.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage fails.
    fn stored_meta(&self, name: &str) -> StoreResult<StoredMeta> {
        Ok(StoredMeta {
            command: self.get(Namespace::Command, name)?,
            depends: self.get(Namespace::Depends, name)?,
            kernel: self.get(Namespace::Kernels, name)?,
        })
    }

    /// Recorded progress of a target.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] for unrecognized progress values.
    fn progress(&self, name: &str) -> StoreResult<Option<Progress>> {
        match self.get(Namespace::Progress, name)? {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|reason| StoreError::Corrupt {
                    namespace: Namespace::Progress,
                    key: name.to_string(),
                    reason,
                }),
        }
    }

    /// Record progress of a target.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage fails.
    fn set_progress(&self, name: &str, progress: Progress) -> StoreResult<()> {
        self.set(Namespace::Progress, name, progress.as_str())
    }

    /// Build record of the last successful build.
    ///
    /// # Errors
    ///
    /// Returns an error if the record exists but cannot be decoded.
    fn build_record(&self, name: &str) -> StoreResult<Option<BuildRecord>> {
        self.get(Namespace::Meta, name)?
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(StoreError::from)
    }

    /// Value committed by the last successful build.
    ///
    /// # Errors
    ///
    /// Returns an error if the object exists but cannot be decoded.
    fn load_value(&self, name: &str) -> StoreResult<Option<Value>> {
        self.get(Namespace::Objects, name)?
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(StoreError::from)
    }

    /// Commit a successful build. `progress = done` is written last.
    ///
    /// # Errors
    ///
    /// Returns the first storage failure; progress is then left as it was.
    fn commit(&self, name: &str, commit: &Commit<'_>) -> StoreResult<()> {
        self.set(Namespace::Objects, name, &serde_json::to_string(commit.value)?)?;
        self.set(Namespace::Kernels, name, commit.kernel)?;
        self.set(Namespace::Depends, name, commit.depends)?;
        self.set(Namespace::Command, name, commit.command)?;
        self.set(Namespace::Meta, name, &serde_json::to_string(commit.record)?)?;
        self.set_progress(name, Progress::Done)
    }

    /// Forget everything recorded for a target.
    ///
    /// # Errors
    ///
    /// Returns the first storage failure.
    fn clear_target(&self, name: &str) -> StoreResult<()> {
        // Progress first so a partially cleared target reads as missing.
        self.remove(Namespace::Progress, name)?;
        for ns in Namespace::TARGET {
            self.remove(ns, name)?;
        }
        Ok(())
    }
}

impl<S: FingerprintStore + ?Sized> RecordsExt for S {}
