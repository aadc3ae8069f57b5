//! Staged, parallel execution of the outdated set.
//!
//! Stages are topological levels and run as barriers: stage `k + 1` starts
//! only after every build of stage `k` has committed. Within a stage up to
//! `jobs` builds run at once on the tokio runtime.
//!
//! Each target is re-evaluated right before it builds, against the kernels
//! its dependencies committed earlier in the same run. A target predicted
//! outdated only because of an upstream change is skipped if that upstream
//! rebuilt to an identical value.

use crate::config::{EngineConfig, MemoryStrategy};
use crate::environment::Environment;
use crate::error::{BuildError, BuildResult};
use crate::events::{BuildEvent, BuildHook, Reporter};
use crate::executor::{BuildExecutor, BuildRequest};
use crate::graph::{NodeKind, PlanGraph};
use crate::imports::ImportRegistry;
use crate::meta::{FileState, MetaContext, file_state};
use crate::plan::{Plan, Target};
use crate::retry::build_with_retry;
use crate::store::{BuildRecord, Commit, FingerprintStore, Progress, RecordsExt};
use crate::trigger::evaluate;
use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Shared flag that stops a run at the next target or stage boundary.
///
/// Builds already running finish and commit; nothing else starts.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// New, not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag so the next run can start.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Targets built and committed, in execution order
    pub built: Vec<String>,
    /// Scheduled targets found up to date at build time
    pub skipped: Vec<String>,
    /// Failed targets and their errors
    pub failed: BTreeMap<String, BuildError>,
    /// Targets not attempted, with the dependency that blocked them
    pub unbuilt: BTreeMap<String, String>,
    /// Targets not attempted because the run was cancelled
    pub cancelled: Vec<String>,
    /// Stages as executed, imports included
    pub stages: Vec<Vec<String>>,
    /// Wall time
    pub duration: Duration,
}

impl RunSummary {
    /// Whether every scheduled target is now up to date.
    #[must_use]
    pub fn success(&self) -> bool {
        self.failed.is_empty() && self.unbuilt.is_empty() && self.cancelled.is_empty()
    }
}

enum NodeOutcome {
    Built,
    Skipped,
    Imported,
    Failed(BuildError),
    Cancelled,
}

/// Everything a worker needs, shared by all workers of a run.
pub(crate) struct RunContext {
    pub(crate) plan: Arc<Plan>,
    pub(crate) graph: Arc<PlanGraph>,
    pub(crate) imports: Arc<ImportRegistry>,
    pub(crate) fingerprints: HashMap<String, String>,
    pub(crate) store: Arc<dyn FingerprintStore>,
    pub(crate) executor: Arc<dyn BuildExecutor>,
    pub(crate) reporter: Arc<dyn Reporter>,
    pub(crate) hook: Arc<dyn BuildHook>,
    pub(crate) env: Arc<Environment>,
    pub(crate) config: EngineConfig,
    pub(crate) cancel: CancelHandle,
}

impl RunContext {
    pub(crate) fn meta(&self) -> MetaContext<'_> {
        MetaContext {
            plan: &self.plan,
            graph: &self.graph,
            store: self.store.as_ref(),
            imports: &self.fingerprints,
            algorithm: self.config.hash_algorithm,
            root: &self.config.root,
        }
    }

    fn emit(&self, event: BuildEvent) {
        self.reporter.report(&event);
    }
}

/// Nodes to process for a set of outdated targets: the targets plus the
/// imports upstream of them.
pub(crate) fn schedule(graph: &PlanGraph, outdated: &BTreeSet<String>) -> BTreeSet<String> {
    let seeds: Vec<&str> = outdated.iter().map(String::as_str).collect();
    graph
        .upstream(&seeds)
        .into_iter()
        .filter(|name| outdated.contains(name) || graph.kind(name) != Some(NodeKind::Target))
        .collect()
}

/// Execute `scheduled` stage by stage.
pub(crate) async fn run(ctx: Arc<RunContext>, scheduled: &BTreeSet<String>) -> RunSummary {
    let start = Instant::now();
    let stages = ctx.graph.stages(scheduled);
    let semaphore = Arc::new(Semaphore::new(ctx.config.jobs.max(1)));
    let mut summary = RunSummary {
        stages: stages.clone(),
        ..RunSummary::default()
    };

    ctx.emit(BuildEvent::RunStarted {
        scheduled: scheduled.len(),
        stages: stages.len(),
    });

    for (index, stage) in stages.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            cancel_remaining(&ctx, &stages[index..], &mut summary);
            break;
        }
        ctx.emit(BuildEvent::StageStarted {
            index,
            targets: stage.clone(),
        });

        let mut started = Vec::with_capacity(stage.len());
        let mut handles = Vec::with_capacity(stage.len());
        for name in stage {
            if !ctx.config.keep_going
                && let Some(blocker) = blocked_by(&ctx.graph, name, &summary)
            {
                ctx.emit(BuildEvent::TargetUnbuilt {
                    name: name.clone(),
                    blocked_by: blocker.clone(),
                });
                let _ = summary.unbuilt.insert(name.clone(), blocker);
                continue;
            }

            let ctx = Arc::clone(&ctx);
            let semaphore = Arc::clone(&semaphore);
            let task_name = name.clone();
            started.push(name.clone());
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return NodeOutcome::Failed(BuildError::Cancelled);
                };
                process(&ctx, &task_name).await
            }));
        }

        for (name, joined) in started.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(NodeOutcome::Built) => summary.built.push(name),
                Ok(NodeOutcome::Skipped) => summary.skipped.push(name),
                Ok(NodeOutcome::Imported) => {}
                Ok(NodeOutcome::Failed(error)) => {
                    let _ = summary.failed.insert(name, error);
                }
                Ok(NodeOutcome::Cancelled) => summary.cancelled.push(name),
                Err(e) => {
                    warn!(target = %name, error = %e, "Build task aborted");
                    let _ = summary
                        .failed
                        .insert(name, BuildError::Other(format!("build task aborted: {e}")));
                }
            }
        }

        if ctx.config.memory_strategy == MemoryStrategy::Lookahead {
            unload_finished(&ctx, &stages[index + 1..]);
        }
    }

    summary.duration = start.elapsed();
    ctx.emit(BuildEvent::RunFinished {
        built: summary.built.len(),
        skipped: summary.skipped.len(),
        failed: summary.failed.len(),
        unbuilt: summary.unbuilt.len(),
        duration_ms: millis(summary.duration),
    });
    summary
}

fn blocked_by(graph: &PlanGraph, name: &str, summary: &RunSummary) -> Option<String> {
    graph
        .dependencies(name)
        .into_iter()
        .find(|dep| summary.failed.contains_key(dep) || summary.unbuilt.contains_key(dep))
}

fn cancel_remaining(ctx: &RunContext, stages: &[Vec<String>], summary: &mut RunSummary) {
    for name in stages.iter().flatten() {
        if ctx.graph.kind(name) == Some(NodeKind::Target) {
            ctx.emit(BuildEvent::TargetCancelled { name: name.clone() });
            summary.cancelled.push(name.clone());
        }
    }
}

/// Drop values no remaining stage depends on.
fn unload_finished(ctx: &RunContext, remaining: &[Vec<String>]) {
    let pending: BTreeSet<&str> = remaining.iter().flatten().map(String::as_str).collect();
    for name in ctx.env.names() {
        let needed = ctx
            .graph
            .dependents(&name)
            .iter()
            .any(|dependent| pending.contains(dependent.as_str()));
        if !needed && ctx.env.remove(&name) && ctx.graph.kind(&name) == Some(NodeKind::Target) {
            ctx.emit(BuildEvent::TargetUnloaded { name });
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

async fn process(ctx: &RunContext, name: &str) -> NodeOutcome {
    if ctx.cancel.is_cancelled() {
        if ctx.graph.kind(name) == Some(NodeKind::Target) {
            ctx.emit(BuildEvent::TargetCancelled {
                name: name.to_string(),
            });
            return NodeOutcome::Cancelled;
        }
        return NodeOutcome::Imported;
    }

    match (ctx.graph.kind(name), ctx.plan.get(name)) {
        (Some(NodeKind::Target), Some(target)) => match build_target(ctx, target).await {
            Ok(outcome) => outcome,
            Err(error) => {
                if let Err(e) = ctx.store.set_progress(name, Progress::Failed) {
                    warn!(target = %name, error = %e, "Failed to record failure");
                }
                ctx.emit(BuildEvent::TargetFailed {
                    name: name.to_string(),
                    error: error.to_string(),
                });
                NodeOutcome::Failed(error)
            }
        },
        _ => {
            if let Some(value) = import_value(ctx, name) {
                let _ = ctx.env.insert(name, value);
                debug!(import = %name, "Loaded import");
            }
            NodeOutcome::Imported
        }
    }
}

fn import_value(ctx: &RunContext, name: &str) -> Option<Value> {
    match ctx.graph.kind(name)? {
        NodeKind::Import => ctx.imports.get(name).map(|import| import.value.clone()),
        NodeKind::FileImport => Some(Value::String(unquote(name).to_string())),
        NodeKind::Target => None,
    }
}

fn unquote(name: &str) -> &str {
    name.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(name)
}

/// Values of `name`'s direct dependencies, loading from the store as needed.
///
/// A dependency without a loadable value fails the build instead of being
/// left out.
fn dependency_values(ctx: &RunContext, name: &str) -> BuildResult<BTreeMap<String, Arc<Value>>> {
    let mut values = BTreeMap::new();
    for dep in ctx.graph.dependencies(name) {
        let value = match ctx.env.get(&dep) {
            Some(value) => value,
            None => {
                let loaded = match import_value(ctx, &dep) {
                    Some(value) => value,
                    None => ctx
                        .store
                        .load_value(&dep)?
                        .ok_or_else(|| BuildError::DependencyUnavailable(dep.clone()))?,
                };
                if ctx.graph.kind(&dep) == Some(NodeKind::Target) {
                    ctx.emit(BuildEvent::ValueLoaded { name: dep.clone() });
                }
                ctx.env.insert(dep.clone(), loaded)
            }
        };
        let _ = values.insert(dep, value);
    }
    Ok(values)
}

async fn build_target(ctx: &RunContext, target: &Target) -> BuildResult<NodeOutcome> {
    let name = target.name.as_str();
    let meta = ctx.meta();
    let current = meta.collect(name)?;
    let stored = ctx.store.stored_meta(name)?;

    let Some(reason) = evaluate(&current, &stored) else {
        debug!(target = %name, "Up to date after upstream builds");
        ctx.emit(BuildEvent::TargetSkipped {
            name: name.to_string(),
        });
        return Ok(NodeOutcome::Skipped);
    };

    ctx.emit(BuildEvent::TargetStarted {
        name: name.to_string(),
        reason,
    });
    ctx.store.set_progress(name, Progress::Running)?;

    let output = target.file_path(&ctx.config.root);
    let request = BuildRequest {
        name: name.to_string(),
        command: target.command.clone(),
        output: output.clone(),
        dependencies: dependency_values(ctx, name)?,
        timeout: ctx.config.timeout(),
    };

    ctx.hook.before_build(&request);
    let started = Instant::now();
    let (outcome, attempts) = build_with_retry(&ctx.config.retry, name, || {
        ctx.executor.build(request.clone())
    })
    .await;
    let duration = started.elapsed();
    ctx.hook.after_build(name, &outcome);
    let value = outcome?;

    let (value, kernel) = match &output {
        Some(path) => match file_state(ctx.config.hash_algorithm, path) {
            FileState::Hash(hash) => (Value::String(unquote(name).to_string()), hash),
            FileState::Absent => return Err(BuildError::MissingOutput(path.clone())),
            FileState::Unreadable(reason) => return Err(BuildError::Other(reason)),
        },
        None => {
            let kernel = ctx.config.hash_algorithm.hash_value(&value);
            (value, kernel)
        }
    };

    let record = BuildRecord {
        built_at: Utc::now(),
        duration_ms: millis(duration),
        attempts,
    };
    ctx.store.commit(
        name,
        &Commit {
            value: &value,
            kernel: &kernel,
            depends: &current.depends_hash,
            command: &current.command,
            record: &record,
        },
    )?;
    let _ = ctx.env.insert(name, value);

    info!(target = %name, duration_ms = record.duration_ms, "Committed");
    ctx.emit(BuildEvent::TargetBuilt {
        name: name.to_string(),
        duration_ms: record.duration_ms,
        attempts,
    });
    Ok(NodeOutcome::Built)
}
