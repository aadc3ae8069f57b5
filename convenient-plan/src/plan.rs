//! Plan model: targets, their commands, and run-wide defaults.

use crate::error::{ConfigError, ConfigResult};
use crate::trigger::Trigger;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A named unit of work.
///
/// Names wrapped in double quotes (`"out/report.csv"`) denote file
/// targets: the command is expected to produce that file, and its content
/// is what gets fingerprinted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Unique name
    pub name: String,
    /// Command text handed to the build executor
    pub command: String,
    /// Per-target trigger override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
    /// Declared dependencies, in addition to those found in the command
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,
}

impl Target {
    /// Create a target with no overrides.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            trigger: None,
            depends: Vec::new(),
        }
    }

    /// Set the trigger override.
    #[must_use]
    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Add a declared dependency.
    #[must_use]
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends.push(name.into());
        self
    }

    /// Whether this is a file target.
    #[must_use]
    pub fn is_file(&self) -> bool {
        is_file_name(&self.name)
    }

    /// Output path of a file target, resolved against `root`.
    #[must_use]
    pub fn file_path(&self, root: &Path) -> Option<PathBuf> {
        file_path(&self.name, root)
    }
}

/// Whether `name` denotes a file (`"path"`).
#[must_use]
pub fn is_file_name(name: &str) -> bool {
    name.len() >= 2 && name.starts_with('"') && name.ends_with('"')
}

/// Path denoted by a file name, resolved against `root`.
#[must_use]
pub fn file_path(name: &str, root: &Path) -> Option<PathBuf> {
    is_file_name(name).then(|| {
        let inner = Path::new(&name[1..name.len() - 1]);
        if inner.is_absolute() {
            inner.to_path_buf()
        } else {
            root.join(inner)
        }
    })
}

/// Normalize command text for fingerprinting.
///
/// Surrounding whitespace, blank lines and full-line `#` comments are
/// dropped, so purely cosmetic edits do not fire the command trigger.
#[must_use]
pub fn standardize_command(command: &str) -> String {
    command
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Deserialize)]
struct PlanSpec {
    #[serde(default)]
    default_trigger: Trigger,
    targets: Vec<Target>,
}

/// Ordered collection of uniquely named targets.
#[derive(Debug, Clone)]
pub struct Plan {
    targets: Vec<Target>,
    default_trigger: Trigger,
    index: HashMap<String, usize>,
}

impl Plan {
    /// Build a plan, rejecting empty and duplicate names.
    ///
    /// # Errors
    ///
    /// [`ConfigError::EmptyTargetName`] or [`ConfigError::DuplicateTarget`].
    pub fn new(targets: Vec<Target>, default_trigger: Trigger) -> ConfigResult<Self> {
        let mut index = HashMap::with_capacity(targets.len());
        for (i, target) in targets.iter().enumerate() {
            if target.name.trim().is_empty() || target.name == "\"\"" {
                return Err(ConfigError::EmptyTargetName);
            }
            if index.insert(target.name.clone(), i).is_some() {
                return Err(ConfigError::DuplicateTarget(target.name.clone()));
            }
        }
        Ok(Self {
            targets,
            default_trigger,
            index,
        })
    }

    /// Parse a plan document:
    ///
    /// ```json
    /// {
    ///   "default_trigger": "any",
    ///   "targets": [
    ///     { "name": "x", "command": "1 + 1", "trigger": "command" },
    ///     { "name": "y", "command": "x * 2", "depends": ["x"] }
    ///   ]
    /// }
    /// ```
    ///
    /// # Errors
    ///
    /// Malformed JSON and unknown trigger names are reported as
    /// [`ConfigError::InvalidPlan`]; name problems as in [`Plan::new`].
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let spec: PlanSpec =
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidPlan(e.to_string()))?;
        Self::new(spec.targets, spec.default_trigger)
    }

    /// Read and parse a plan file.
    ///
    /// # Errors
    ///
    /// As [`Plan::from_json_str`], plus [`ConfigError::Unreadable`].
    pub fn from_json_file(path: &Path) -> ConfigResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Targets in plan order.
    #[must_use]
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Look up a target by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Target> {
        self.index.get(name).map(|&i| &self.targets[i])
    }

    /// Whether a target exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the plan has no targets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Run-wide default trigger.
    #[must_use]
    pub fn default_trigger(&self) -> Trigger {
        self.default_trigger
    }

    /// Replace the run-wide default. Per-target overrides still win.
    pub fn set_default_trigger(&mut self, trigger: Trigger) {
        self.default_trigger = trigger;
    }

    /// Trigger that applies to `target`.
    #[must_use]
    pub fn effective_trigger(&self, target: &Target) -> Trigger {
        target.trigger.unwrap_or(self.default_trigger)
    }
}
