//! Trigger policies and the per-target build decision.
//!
//! The decision is a pure function of the target's current [`Metadata`]
//! and the [`StoredMeta`] persisted by its last successful build:
//!
//! 1. imported nodes are always processed
//! 2. `missing` dominates every policy
//! 3. `always` builds unconditionally
//! 4. otherwise only the checks implied by the policy are evaluated

use crate::error::ConfigError;
use crate::meta::{FileState, Metadata, StoredMeta};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Rule deciding when a target must be rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Trigger {
    /// Only rebuild when the target is missing.
    Missing,
    /// Rebuild when a file target's content changed or disappeared.
    File,
    /// Rebuild when the command text changed.
    Command,
    /// Rebuild when the aggregate dependency fingerprint changed.
    Depends,
    /// Logical OR of `command`, `depends`, `file` and `missing`.
    #[default]
    Any,
    /// Rebuild on every run.
    Always,
}

impl Trigger {
    /// All policies, in declaration order.
    pub const ALL: [Trigger; 6] = [
        Trigger::Missing,
        Trigger::File,
        Trigger::Command,
        Trigger::Depends,
        Trigger::Any,
        Trigger::Always,
    ];

    /// Policy name as written in plans.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Trigger::Missing => "missing",
            Trigger::File => "file",
            Trigger::Command => "command",
            Trigger::Depends => "depends",
            Trigger::Any => "any",
            Trigger::Always => "always",
        }
    }

    /// Whether this policy compares the command snapshot.
    #[must_use]
    pub const fn checks_command(self) -> bool {
        matches!(self, Trigger::Command | Trigger::Any)
    }

    /// Whether this policy compares the dependency fingerprint. Upstream
    /// changes only propagate through policies that answer `true`.
    #[must_use]
    pub const fn checks_depends(self) -> bool {
        matches!(self, Trigger::Depends | Trigger::Any)
    }

    /// Whether this policy compares file content.
    #[must_use]
    pub const fn checks_file(self) -> bool {
        matches!(self, Trigger::File | Trigger::Any)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Trigger {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Trigger::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| ConfigError::UnknownTrigger(s.to_string()))
    }
}

impl TryFrom<String> for Trigger {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Trigger> for String {
    fn from(value: Trigger) -> Self {
        value.as_str().to_string()
    }
}

/// Why a target was selected for building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildReason {
    /// Inferred import, re-processed every run.
    Imported,
    /// No committed value (never built, failed, or interrupted).
    Missing,
    /// Policy is `always`.
    Always,
    /// Command text differs from the stored snapshot.
    Command,
    /// Dependency fingerprint differs from the stored one.
    Depends,
    /// File content differs, the file is gone, or it could not be hashed.
    File,
}

impl fmt::Display for BuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildReason::Imported => "imported",
            BuildReason::Missing => "missing",
            BuildReason::Always => "always",
            BuildReason::Command => "command",
            BuildReason::Depends => "depends",
            BuildReason::File => "file",
        };
        f.write_str(s)
    }
}

/// True iff the stored command snapshot differs from the current one.
#[must_use]
pub fn command_trigger(current: &Metadata, stored: &StoredMeta) -> bool {
    stored.command.as_deref() != Some(current.command.as_str())
}

/// True iff the stored dependency fingerprint differs from the current one.
#[must_use]
pub fn depends_trigger(current: &Metadata, stored: &StoredMeta) -> bool {
    stored.depends.as_deref() != Some(current.depends_hash.as_str())
}

/// True iff a file target's output is absent, unreadable, or changed.
///
/// Hashing failures count as a change: a file that cannot be read is
/// rebuilt rather than trusted.
#[must_use]
pub fn file_trigger(current: &Metadata, stored: &StoredMeta) -> bool {
    match &current.file {
        None => false,
        Some(FileState::Absent) | Some(FileState::Unreadable(_)) => true,
        Some(FileState::Hash(hash)) => stored.kernel.as_deref() != Some(hash.as_str()),
    }
}

/// Evaluate the build decision and report the first reason that fired.
#[must_use]
pub fn evaluate(current: &Metadata, stored: &StoredMeta) -> Option<BuildReason> {
    if current.imported {
        return Some(BuildReason::Imported);
    }
    if current.missing {
        return Some(BuildReason::Missing);
    }

    let policy = current.trigger;
    if policy == Trigger::Always {
        return Some(BuildReason::Always);
    }
    if policy.checks_command() && command_trigger(current, stored) {
        return Some(BuildReason::Command);
    }
    if policy.checks_depends() && depends_trigger(current, stored) {
        return Some(BuildReason::Depends);
    }
    if policy.checks_file() && file_trigger(current, stored) {
        return Some(BuildReason::File);
    }
    None
}

/// Whether the target must be (re)built.
#[must_use]
pub fn should_build(current: &Metadata, stored: &StoredMeta) -> bool {
    evaluate(current, stored).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn meta(trigger: Trigger) -> Metadata {
        Metadata {
            name: "t".to_string(),
            trigger,
            imported: false,
            missing: false,
            command: "run".to_string(),
            depends_hash: "d1".to_string(),
            file: None,
            timestamp: Utc::now(),
        }
    }

    fn stored() -> StoredMeta {
        StoredMeta {
            command: Some("run".to_string()),
            depends: Some("d1".to_string()),
            kernel: Some("k1".to_string()),
        }
    }

    #[test]
    fn test_parse_all_policies() {
        for t in Trigger::ALL {
            assert_eq!(t.as_str().parse::<Trigger>().unwrap(), t);
        }
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let err = "sometimes".parse::<Trigger>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTrigger(name) if name == "sometimes"));
    }

    #[test]
    fn test_unknown_policy_rejected_by_serde() {
        assert!(serde_json::from_str::<Trigger>("\"weekly\"").is_err());
        assert_eq!(serde_json::from_str::<Trigger>("\"depends\"").unwrap(), Trigger::Depends);
    }

    #[test]
    fn test_up_to_date_does_not_build() {
        for t in [Trigger::Missing, Trigger::File, Trigger::Command, Trigger::Depends, Trigger::Any] {
            assert!(!should_build(&meta(t), &stored()), "{t} should not fire");
        }
    }

    #[test]
    fn test_missing_dominates_every_policy() {
        for t in Trigger::ALL {
            let mut current = meta(t);
            current.missing = true;
            assert_eq!(evaluate(&current, &stored()), Some(BuildReason::Missing));
        }
    }

    #[test]
    fn test_always_builds() {
        assert_eq!(evaluate(&meta(Trigger::Always), &stored()), Some(BuildReason::Always));
    }

    #[test]
    fn test_imported_bypasses_policy() {
        let mut current = meta(Trigger::Missing);
        current.imported = true;
        assert_eq!(evaluate(&current, &stored()), Some(BuildReason::Imported));
    }

    #[test]
    fn test_command_change_only_seen_by_command_policies() {
        let mut current = meta(Trigger::Command);
        current.command = "run --fast".to_string();
        assert_eq!(evaluate(&current, &stored()), Some(BuildReason::Command));

        current.trigger = Trigger::Any;
        assert_eq!(evaluate(&current, &stored()), Some(BuildReason::Command));

        for t in [Trigger::Depends, Trigger::File, Trigger::Missing] {
            current.trigger = t;
            assert!(!should_build(&current, &stored()));
        }
    }

    #[test]
    fn test_depends_change_only_seen_by_depends_policies() {
        let mut current = meta(Trigger::Depends);
        current.depends_hash = "d2".to_string();
        assert_eq!(evaluate(&current, &stored()), Some(BuildReason::Depends));

        for t in [Trigger::Command, Trigger::File, Trigger::Missing] {
            current.trigger = t;
            assert!(!should_build(&current, &stored()));
        }
    }

    #[test]
    fn test_file_trigger_states() {
        let mut current = meta(Trigger::File);

        current.file = Some(FileState::Hash("k1".to_string()));
        assert!(!should_build(&current, &stored()));

        current.file = Some(FileState::Hash("k2".to_string()));
        assert_eq!(evaluate(&current, &stored()), Some(BuildReason::File));

        current.file = Some(FileState::Absent);
        assert_eq!(evaluate(&current, &stored()), Some(BuildReason::File));

        current.file = Some(FileState::Unreadable("permission denied".to_string()));
        assert_eq!(evaluate(&current, &stored()), Some(BuildReason::File));

        // Non-file targets never fire the file trigger
        current.file = None;
        assert!(!file_trigger(&current, &stored()));
    }

    #[test]
    fn test_never_built_fires_every_check() {
        let current = meta(Trigger::Any);
        let empty = StoredMeta::default();
        assert!(command_trigger(&current, &empty));
        assert!(depends_trigger(&current, &empty));
    }
}
