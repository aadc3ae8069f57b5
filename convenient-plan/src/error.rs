//! Error taxonomy
//!
//! - [`ConfigError`]: fatal, raised before any build starts
//! - [`StoreError`]: fingerprint store I/O and decoding
//! - [`BuildError`]: per-target, recorded and reported, never thrown across
//!   stage boundaries
//! - [`EngineError`]: what the public entry points return

use crate::store::Namespace;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration problems detected before scheduling.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Trigger name outside the fixed policy set
    #[error("Unknown trigger '{0}' (expected one of: missing, file, command, depends, any, always)")]
    UnknownTrigger(String),

    /// Two targets share a name
    #[error("Duplicate target name '{0}'")]
    DuplicateTarget(String),

    /// A target with an empty name
    #[error("Target name must not be empty")]
    EmptyTargetName,

    /// Dependency cycle; the path starts and ends at the same name
    #[error("Dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    /// A target's command references the target itself
    #[error("Target '{0}' depends on itself")]
    SelfDependency(String),

    /// A requested target is not part of the plan
    #[error("Unknown target '{0}' requested")]
    UnknownTarget(String),

    /// The store was initialized with a different hash algorithm
    #[error("Store was created with hash algorithm '{stored}', but '{requested}' was requested")]
    HashAlgorithmMismatch {
        /// Algorithm recorded in the store
        stored: String,
        /// Algorithm the engine was configured with
        requested: String,
    },

    /// Malformed plan document
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// Malformed or out-of-range engine setting
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A plan or configuration file could not be read
    #[error("Failed to read {path}: {source}")]
    Unreadable {
        /// File that failed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Fingerprint store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record decoded but its contents are not usable
    #[error("Corrupt record {namespace}/{key}: {reason}")]
    Corrupt {
        /// Namespace of the record
        namespace: Namespace,
        /// Key of the record
        key: String,
        /// What was wrong with it
        reason: String,
    },
}

/// Failure of a single target build.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
    /// Command exited unsuccessfully
    #[error("Command failed with {status}: {stderr}")]
    CommandFailed {
        /// Exit status description
        status: String,
        /// Captured standard error
        stderr: String,
    },

    /// Command exceeded its time limit
    #[error("Command timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Command could not be started
    #[error("Failed to start command: {0}")]
    Spawn(String),

    /// A dependency's value is neither in memory nor in the store
    #[error("Dependency '{0}' has no loadable value")]
    DependencyUnavailable(String),

    /// A file target finished without producing its file
    #[error("Output file {0} was not produced")]
    MissingOutput(PathBuf),

    /// Recording the result failed
    #[error("Store error while committing: {0}")]
    Store(String),

    /// The run was cancelled before or while building
    #[error("Build cancelled")]
    Cancelled,

    /// Executor-specific failure
    #[error("{0}")]
    Other(String),
}

impl From<StoreError> for BuildError {
    fn from(err: StoreError) -> Self {
        BuildError::Store(err.to_string())
    }
}

/// Errors surfaced by [`crate::Engine`] entry points.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid plan or configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Store failure outside of a single target build
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result alias for configuration steps.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result alias for a single build.
pub type BuildResult<T> = Result<T, BuildError>;

/// Result alias for engine entry points.
pub type EngineResult<T> = Result<T, EngineError>;
