//! Structured build events and the hooks that observe builds.
//!
//! The engine emits events, it never formats them. [`TracingReporter`]
//! forwards them to `tracing`; [`CollectingReporter`] keeps them for
//! inspection.

use crate::error::BuildResult;
use crate::executor::BuildRequest;
use crate::trigger::BuildReason;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, error, info, warn};

/// Something that happened during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BuildEvent {
    /// Scheduling finished, execution begins
    RunStarted {
        /// Nodes scheduled, imports included
        scheduled: usize,
        /// Number of stages
        stages: usize,
    },
    /// A stage begins
    StageStarted {
        /// Zero-based stage index
        index: usize,
        /// Members of the stage, sorted
        targets: Vec<String>,
    },
    /// A target build begins
    TargetStarted {
        /// Target name
        name: String,
        /// Trigger that fired at build time
        reason: BuildReason,
    },
    /// A scheduled target turned out to be up to date
    TargetSkipped {
        /// Target name
        name: String,
    },
    /// A target was built and committed
    TargetBuilt {
        /// Target name
        name: String,
        /// Wall time, retries included
        duration_ms: u64,
        /// Attempts used
        attempts: u32,
    },
    /// A target build failed
    TargetFailed {
        /// Target name
        name: String,
        /// Error description
        error: String,
    },
    /// A target was not attempted because a dependency did not build
    TargetUnbuilt {
        /// Target name
        name: String,
        /// The dependency that failed or was itself unbuilt
        blocked_by: String,
    },
    /// A target was not attempted because the run was cancelled
    TargetCancelled {
        /// Target name
        name: String,
    },
    /// A value was loaded into memory from the store
    ValueLoaded {
        /// Target name
        name: String,
    },
    /// A value was dropped from memory once no pending target needed it
    TargetUnloaded {
        /// Target name
        name: String,
    },
    /// The run is over
    RunFinished {
        /// Targets built
        built: usize,
        /// Targets skipped as up to date
        skipped: usize,
        /// Targets failed
        failed: usize,
        /// Targets left unbuilt
        unbuilt: usize,
        /// Wall time of the run
        duration_ms: u64,
    },
}

/// Consumer of [`BuildEvent`]s. Called from worker tasks concurrently.
pub trait Reporter: Send + Sync {
    /// Handle one event.
    fn report(&self, event: &BuildEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, event: &BuildEvent) {
        match event {
            BuildEvent::RunStarted { scheduled, stages } => {
                info!(scheduled, stages, "Starting run");
            }
            BuildEvent::StageStarted { index, targets } => {
                debug!(stage = index, count = targets.len(), "Starting stage");
            }
            BuildEvent::TargetStarted { name, reason } => {
                info!(target = %name, reason = %reason, "Building");
            }
            BuildEvent::TargetSkipped { name } => debug!(target = %name, "Up to date"),
            BuildEvent::TargetBuilt {
                name,
                duration_ms,
                attempts,
            } => info!(target = %name, duration_ms, attempts, "Built"),
            BuildEvent::TargetFailed { name, error } => {
                error!(target = %name, error = %error, "Build failed");
            }
            BuildEvent::TargetUnbuilt { name, blocked_by } => {
                warn!(target = %name, blocked_by = %blocked_by, "Not built, dependency unavailable");
            }
            BuildEvent::TargetCancelled { name } => warn!(target = %name, "Cancelled"),
            BuildEvent::ValueLoaded { name } => debug!(target = %name, "Loaded value from store"),
            BuildEvent::TargetUnloaded { name } => debug!(target = %name, "Unloaded value"),
            BuildEvent::RunFinished {
                built,
                skipped,
                failed,
                unbuilt,
                duration_ms,
            } => info!(built, skipped, failed, unbuilt, duration_ms, "Run finished"),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: Mutex<Vec<BuildEvent>>,
}

impl CollectingReporter {
    /// Empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far.
    #[must_use]
    pub fn events(&self) -> Vec<BuildEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names of targets that received `TargetBuilt`, in event order.
    #[must_use]
    pub fn built(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                BuildEvent::TargetBuilt { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    /// Events serialized as JSON lines.
    ///
    /// # Errors
    ///
    /// Returns an error if an event fails to serialize.
    pub fn to_json_lines(&self) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for event in self.events() {
            out.push_str(&serde_json::to_string(&event)?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl Reporter for CollectingReporter {
    fn report(&self, event: &BuildEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Fan out to several reporters.
impl<R: Reporter> Reporter for Vec<R> {
    fn report(&self, event: &BuildEvent) {
        for reporter in self {
            reporter.report(event);
        }
    }
}

impl<R: Reporter + ?Sized> Reporter for std::sync::Arc<R> {
    fn report(&self, event: &BuildEvent) {
        (**self).report(event);
    }
}

/// Code run around every target build, e.g. to set up a scratch
/// directory or to time builds externally.
pub trait BuildHook: Send + Sync {
    /// Called before the executor runs.
    fn before_build(&self, _request: &BuildRequest) {}

    /// Called with the final outcome, after retries.
    fn after_build(&self, _name: &str, _outcome: &BuildResult<Value>) {}
}

/// Hook that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

impl BuildHook for NoopHook {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tracing_test::traced_test;

    #[test]
    fn test_collecting_reporter() {
        let reporter = CollectingReporter::new();
        reporter.report(&BuildEvent::TargetSkipped { name: "a".to_string() });
        reporter.report(&BuildEvent::TargetBuilt {
            name: "b".to_string(),
            duration_ms: 3,
            attempts: 1,
        });

        assert_eq!(reporter.events().len(), 2);
        assert_eq!(reporter.built(), vec!["b"]);

        let lines = reporter.to_json_lines().unwrap();
        assert!(lines.starts_with(r#"{"event":"target_skipped","name":"a"}"#));
    }

    #[test]
    fn test_shared_reporter() {
        let shared = Arc::new(CollectingReporter::new());
        let fanout = vec![Arc::clone(&shared), Arc::clone(&shared)];
        fanout.report(&BuildEvent::TargetCancelled { name: "x".to_string() });
        assert_eq!(shared.events().len(), 2);
    }

    #[traced_test]
    #[test]
    fn test_tracing_reporter_logs_failures() {
        TracingReporter.report(&BuildEvent::TargetFailed {
            name: "broken".to_string(),
            error: "exit status 1".to_string(),
        });
        assert!(logs_contain("Build failed"));
        assert!(logs_contain("exit status 1"));
    }
}
