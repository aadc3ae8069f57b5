//! Engine configuration.

use crate::error::{ConfigError, ConfigResult};
use crate::hash::HashAlgorithm;
use crate::retry::RetryPolicy;
use crate::trigger::Trigger;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What to do with values that later targets no longer need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStrategy {
    /// Keep every value loaded for the rest of the run
    #[default]
    Keep,
    /// Unload a value once all of its dependents have finished
    Lookahead,
}

/// Run-wide settings.
///
/// Every field has a default, so a configuration file only needs to name
/// what it changes:
///
/// ```json
/// { "jobs": 4, "keep_going": true, "retry": { "max_attempts": 3 } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Concurrent builds within a stage
    pub jobs: usize,
    /// Attempt targets even when a dependency failed
    pub keep_going: bool,
    /// Overrides the plan's default trigger; per-target triggers still win
    pub default_trigger: Option<Trigger>,
    /// Digest for every fingerprint
    pub hash_algorithm: HashAlgorithm,
    /// Value retention during a run
    pub memory_strategy: MemoryStrategy,
    /// Retries for failed builds
    pub retry: RetryPolicy,
    /// Per-target build time limit, in seconds
    pub timeout_secs: Option<u64>,
    /// Directory file targets and file imports are resolved against
    pub root: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            jobs: num_cpus::get(),
            keep_going: false,
            default_trigger: None,
            hash_algorithm: HashAlgorithm::default(),
            memory_strategy: MemoryStrategy::default(),
            retry: RetryPolicy::default(),
            timeout_secs: None,
            root: PathBuf::from("."),
        }
    }
}

impl EngineConfig {
    /// Load a configuration file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Unreadable`] if the file cannot be read,
    /// [`ConfigError::InvalidConfig`] if it does not parse or validate.
    pub fn from_json_file(path: &Path) -> ConfigResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Parse a configuration document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidConfig`] if it does not parse or validate.
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.jobs == 0 {
            return Err(ConfigError::InvalidConfig("jobs must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidConfig(
                "retry.backoff_multiplier must be a finite number >= 1".to_string(),
            ));
        }
        if self.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidConfig("timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// Build time limit as a duration.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.jobs >= 1);
        assert!(!config.keep_going);
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha256);
        assert_eq!(config.memory_strategy, MemoryStrategy::Keep);
        assert_eq!(config.retry.max_attempts, 1);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_document() {
        let config = EngineConfig::from_json_str(
            r#"{"jobs": 2, "keep_going": true, "hash_algorithm": "sha512",
                "memory_strategy": "lookahead", "default_trigger": "depends",
                "retry": {"max_attempts": 4}, "timeout_secs": 30}"#,
        )
        .unwrap();

        assert_eq!(config.jobs, 2);
        assert!(config.keep_going);
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha512);
        assert_eq!(config.memory_strategy, MemoryStrategy::Lookahead);
        assert_eq!(config.default_trigger, Some(Trigger::Depends));
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.backoff_multiplier, 2.0);
        assert_eq!(config.timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(EngineConfig::from_json_str(r#"{"jobs": 0}"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{"default_trigger": "sometimes"}"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{"hash_algorithm": "md5"}"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{"retry": {"max_attempts": 0}}"#).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"jobs": 3}}"#).unwrap();
        assert_eq!(EngineConfig::from_json_file(file.path()).unwrap().jobs, 3);

        let missing = EngineConfig::from_json_file(Path::new("/definitely/not/here.json"));
        assert!(matches!(missing, Err(ConfigError::Unreadable { .. })));
    }
}
