//! Fingerprint-driven build orchestration for target plans.
//!
//! A [`Plan`] is a set of named targets, each with a command and a
//! [`Trigger`] policy. The engine works out which targets are outdated and
//! rebuilds exactly those, in dependency order:
//!
//! - **Fingerprint store**: namespaced key/value records per target
//!   ([`MemoryStore`], [`DiskStore`])
//! - **Trigger evaluator**: decides from current vs. stored fingerprints
//!   whether a single target must rebuild
//! - **Dependency graph**: inferred from command text by a
//!   [`DependencyAnalyzer`], checked for cycles
//! - **Outdated resolver**: propagates outdatedness downstream, honouring
//!   each dependent's policy
//! - **Scheduler**: runs the outdated set in topological stages, in
//!   parallel, and commits results atomically per target
//!
//! # Example
//!
//! ```no_run
//! use convenient_plan::{BuildRequest, Engine, FnExecutor, Plan, Target, Trigger};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let plan = Plan::new(
//!     vec![Target::new("data", "load()"), Target::new("model", "fit(data)")],
//!     Trigger::Any,
//! )?;
//! let executor = FnExecutor::new(|request: &BuildRequest| Ok(json!(request.name.len())));
//! let engine = Engine::builder(plan).executor(Arc::new(executor)).build()?;
//!
//! let summary = engine.make().await?;
//! assert_eq!(summary.built, vec!["data", "model"]);
//!
//! // Nothing changed: the second run builds nothing.
//! assert!(engine.make().await?.built.is_empty());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(unused_results)]

pub mod analysis;
pub mod config;
pub mod engine;
pub mod environment;
pub mod error;
pub mod events;
pub mod executor;
pub mod graph;
pub mod hash;
pub mod imports;
pub mod meta;
pub mod outdated;
pub mod plan;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod trigger;

pub use analysis::{DependencyAnalyzer, SymbolAnalyzer};
pub use config::{EngineConfig, MemoryStrategy};
pub use engine::{Engine, EngineBuilder};
pub use environment::Environment;
pub use error::{
    BuildError, BuildResult, ConfigError, ConfigResult, EngineError, EngineResult, StoreError,
    StoreResult,
};
pub use events::{BuildEvent, BuildHook, CollectingReporter, NoopHook, Reporter, TracingReporter};
pub use executor::{BuildExecutor, BuildRequest, FnExecutor, ShellExecutor};
pub use graph::{NodeKind, PlanGraph, PlanNode};
pub use hash::HashAlgorithm;
pub use imports::{Import, ImportRegistry};
pub use outdated::OutdatedReason;
pub use plan::{Plan, Target};
pub use retry::RetryPolicy;
pub use scheduler::{CancelHandle, RunSummary};
pub use store::{
    BuildRecord, DiskStore, FingerprintStore, MemoryStore, Namespace, Progress, RecordsExt,
};
pub use trigger::{BuildReason, Trigger};
