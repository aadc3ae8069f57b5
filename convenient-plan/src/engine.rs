//! Public entry point tying plan, graph, store and scheduler together.

use crate::analysis::{DependencyAnalyzer, SymbolAnalyzer};
use crate::config::EngineConfig;
use crate::environment::Environment;
use crate::error::{ConfigError, EngineResult};
use crate::events::{BuildHook, NoopHook, Reporter, TracingReporter};
use crate::executor::{BuildExecutor, ShellExecutor};
use crate::graph::{NodeKind, PlanGraph};
use crate::hash::HashAlgorithm;
use crate::imports::ImportRegistry;
use crate::meta::import_fingerprints;
use crate::outdated::{OutdatedReason, resolve};
use crate::plan::Plan;
use crate::scheduler::{CancelHandle, RunContext, RunSummary, run, schedule};
use crate::store::{BuildRecord, FingerprintStore, MemoryStore, Namespace, Progress, RecordsExt};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

const HASH_ALGORITHM_KEY: &str = "hash_algorithm";

/// Configures and validates an [`Engine`].
pub struct EngineBuilder {
    plan: Plan,
    config: EngineConfig,
    store: Option<Arc<dyn FingerprintStore>>,
    executor: Option<Arc<dyn BuildExecutor>>,
    imports: ImportRegistry,
    reporter: Arc<dyn Reporter>,
    analyzer: Arc<dyn DependencyAnalyzer>,
    hook: Arc<dyn BuildHook>,
}

impl EngineBuilder {
    /// Start from a plan. Everything else has defaults: an in-memory
    /// store, a shell executor in `config.root`, tracing output and the
    /// symbol analyzer.
    #[must_use]
    pub fn new(plan: Plan) -> Self {
        Self {
            plan,
            config: EngineConfig::default(),
            store: None,
            executor: None,
            imports: ImportRegistry::new(),
            reporter: Arc::new(TracingReporter),
            analyzer: Arc::new(SymbolAnalyzer::new()),
            hook: Arc::new(NoopHook),
        }
    }

    /// Run settings.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Fingerprint store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn FingerprintStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build executor.
    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn BuildExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Imports available to commands.
    #[must_use]
    pub fn imports(mut self, imports: ImportRegistry) -> Self {
        self.imports = imports;
        self
    }

    /// Event consumer.
    #[must_use]
    pub fn reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Dependency analyzer for commands and import sources.
    #[must_use]
    pub fn analyzer(mut self, analyzer: Arc<dyn DependencyAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Hook run around every build.
    #[must_use]
    pub fn hook(mut self, hook: Arc<dyn BuildHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Validate everything and build the dependency graph.
    ///
    /// Nothing is built here; all configuration errors surface before the
    /// first run.
    ///
    /// # Errors
    ///
    /// - [`ConfigError`] for invalid settings, self-dependencies, cycles,
    ///   or a store created with another hash algorithm
    /// - [`crate::StoreError`] if the store cannot be read or initialized
    pub fn build(self) -> EngineResult<Engine> {
        let Self {
            mut plan,
            config,
            store,
            executor,
            imports,
            reporter,
            analyzer,
            hook,
        } = self;

        config.validate()?;
        if let Some(trigger) = config.default_trigger {
            plan.set_default_trigger(trigger);
        }

        let graph = PlanGraph::build(&plan, &imports, analyzer.as_ref(), &config.root)?;
        for (name, referrers) in graph.missed() {
            debug!(reference = %name, referrers = ?referrers, "Unresolved reference");
        }

        let store = store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        check_hash_algorithm(store.as_ref(), config.hash_algorithm)?;

        let executor = executor.unwrap_or_else(|| Arc::new(ShellExecutor::new(config.root.clone())));

        info!(
            targets = plan.len(),
            imports = imports.len(),
            nodes = graph.node_count(),
            "Engine ready"
        );

        Ok(Engine {
            plan: Arc::new(plan),
            graph: Arc::new(graph),
            imports: Arc::new(imports),
            store,
            executor,
            reporter,
            hook,
            env: Arc::new(Environment::new()),
            config,
            cancel: CancelHandle::new(),
        })
    }
}

/// Record the hash algorithm in a fresh store, or verify it matches.
fn check_hash_algorithm(store: &dyn FingerprintStore, algorithm: HashAlgorithm) -> EngineResult<()> {
    match store.get(Namespace::Config, HASH_ALGORITHM_KEY)? {
        Some(stored) if stored != algorithm.as_str() => Err(ConfigError::HashAlgorithmMismatch {
            stored,
            requested: algorithm.as_str().to_string(),
        }
        .into()),
        Some(_) => Ok(()),
        None => {
            store.set(Namespace::Config, HASH_ALGORITHM_KEY, algorithm.as_str())?;
            Ok(())
        }
    }
}

/// A validated plan bound to a store and an executor.
pub struct Engine {
    plan: Arc<Plan>,
    graph: Arc<PlanGraph>,
    imports: Arc<ImportRegistry>,
    store: Arc<dyn FingerprintStore>,
    executor: Arc<dyn BuildExecutor>,
    reporter: Arc<dyn Reporter>,
    hook: Arc<dyn BuildHook>,
    env: Arc<Environment>,
    config: EngineConfig,
    cancel: CancelHandle,
}

impl Engine {
    /// Start configuring an engine for `plan`.
    #[must_use]
    pub fn builder(plan: Plan) -> EngineBuilder {
        EngineBuilder::new(plan)
    }

    fn context(&self) -> RunContext {
        RunContext {
            plan: Arc::clone(&self.plan),
            graph: Arc::clone(&self.graph),
            imports: Arc::clone(&self.imports),
            fingerprints: import_fingerprints(
                &self.graph,
                &self.imports,
                self.config.hash_algorithm,
                &self.config.root,
            ),
            store: Arc::clone(&self.store),
            executor: Arc::clone(&self.executor),
            reporter: Arc::clone(&self.reporter),
            hook: Arc::clone(&self.hook),
            env: Arc::clone(&self.env),
            config: self.config.clone(),
            cancel: self.cancel.clone(),
        }
    }

    fn target_names(&self) -> impl Iterator<Item = &str> {
        self.plan.targets().iter().map(|t| t.name.as_str())
    }

    /// Build every outdated target.
    ///
    /// # Errors
    ///
    /// Only store failures while resolving the outdated set. Build failures
    /// are reported in the returned summary.
    pub async fn make(&self) -> EngineResult<RunSummary> {
        self.make_scoped(None).await
    }

    /// Build the named targets and whatever they need.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownTarget`] for names that are not plan targets,
    /// otherwise as [`Engine::make`].
    pub async fn make_targets(&self, names: &[&str]) -> EngineResult<RunSummary> {
        let scope = self.scope(names)?;
        self.make_scoped(Some(&scope)).await
    }

    fn scope(&self, names: &[&str]) -> EngineResult<BTreeSet<String>> {
        if let Some(unknown) = names.iter().find(|name| !self.plan.contains(name)) {
            return Err(ConfigError::UnknownTarget((*unknown).to_string()).into());
        }
        Ok(self.graph.upstream(names))
    }

    async fn make_scoped(&self, scope: Option<&BTreeSet<String>>) -> EngineResult<RunSummary> {
        let ctx = Arc::new(self.context());
        let outdated = resolve(&ctx.meta(), scope)?;
        let targets: BTreeSet<String> = outdated.into_keys().collect();
        let scheduled = schedule(&self.graph, &targets);
        info!(outdated = targets.len(), scheduled = scheduled.len(), "Resolved outdated targets");

        let summary = run(ctx, &scheduled).await;
        self.cancel.reset();
        Ok(summary)
    }

    /// Outdated targets and why, without building anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn outdated(&self) -> EngineResult<BTreeMap<String, OutdatedReason>> {
        Ok(resolve(&self.context().meta(), None)?)
    }

    /// Targets without a committed value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn missing(&self) -> EngineResult<BTreeSet<String>> {
        let ctx = self.context();
        let meta = ctx.meta();
        let mut missing = BTreeSet::new();
        for name in self.target_names() {
            if meta.collect(name)?.missing {
                let _ = missing.insert(name.to_string());
            }
        }
        Ok(missing)
    }

    /// Targets whose last build failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn failed(&self) -> EngineResult<BTreeSet<String>> {
        let mut failed = BTreeSet::new();
        for name in self.store.keys(Namespace::Progress)? {
            if self.store.progress(&name)? == Some(Progress::Failed) {
                let _ = failed.insert(name);
            }
        }
        Ok(failed)
    }

    /// Recorded progress of a target.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn progress(&self, name: &str) -> EngineResult<Option<Progress>> {
        Ok(self.store.progress(name)?)
    }

    /// References that matched no target, import or file, with the nodes
    /// that made them.
    #[must_use]
    pub fn missed(&self) -> &BTreeMap<String, BTreeSet<String>> {
        self.graph.missed()
    }

    /// Names with a committed value in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn cached(&self) -> EngineResult<BTreeSet<String>> {
        let mut cached = BTreeSet::new();
        for name in self.store.keys(Namespace::Objects)? {
            if self.store.progress(&name)? == Some(Progress::Done) {
                let _ = cached.insert(name);
            }
        }
        Ok(cached)
    }

    /// Timing of the last successful build of every cached target.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn build_times(&self) -> EngineResult<BTreeMap<String, BuildRecord>> {
        let mut times = BTreeMap::new();
        for name in self.store.keys(Namespace::Meta)? {
            if let Some(record) = self.store.build_record(&name)? {
                let _ = times.insert(name, record);
            }
        }
        Ok(times)
    }

    /// Current value of a target or import, from memory or the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn value(&self, name: &str) -> EngineResult<Option<Value>> {
        if let Some(value) = self.env.get(name) {
            return Ok(Some((*value).clone()));
        }
        if self.graph.kind(name) == Some(NodeKind::Import) {
            return Ok(self.imports.get(name).map(|import| import.value.clone()));
        }
        Ok(self.store.load_value(name)?)
    }

    /// Forget the named targets, or every recorded target when `names` is
    /// empty. They are missing on the next run.
    ///
    /// # Errors
    ///
    /// Returns the first store failure.
    pub fn clean(&self, names: &[&str]) -> EngineResult<()> {
        let names: BTreeSet<String> = if names.is_empty() {
            let mut all = BTreeSet::new();
            for ns in Namespace::TARGET {
                all.extend(self.store.keys(ns)?);
            }
            all
        } else {
            names.iter().map(ToString::to_string).collect()
        };

        for name in &names {
            self.store.clear_target(name)?;
            let _ = self.env.remove(name);
        }
        info!(count = names.len(), "Cleaned targets");
        Ok(())
    }

    /// Handle to cancel a running [`Engine::make`] from elsewhere.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// The plan, with the configured default trigger applied.
    #[must_use]
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// The dependency graph.
    #[must_use]
    pub fn graph(&self) -> &PlanGraph {
        &self.graph
    }

    /// Run settings.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Values currently held in memory.
    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.env
    }
}
