//! Dependency graph over targets and imports.
//!
//! Nodes are every plan target plus every import or existing file a
//! command references. An edge `a -> b` means `b` depends on `a`.

use crate::analysis::DependencyAnalyzer;
use crate::error::{ConfigError, ConfigResult};
use crate::imports::ImportRegistry;
use crate::plan::{Plan, file_path};
use convenient_graph::{DAG, GraphError, NodeId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, warn};

/// What a graph node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A plan target
    Target,
    /// A registered import
    Import,
    /// A file on disk that no target produces
    FileImport,
}

/// Graph node payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanNode {
    /// Target, import, or quoted file name
    pub name: String,
    /// Node kind
    pub kind: NodeKind,
}

/// Acyclic dependency graph of a plan.
#[derive(Debug, Clone)]
pub struct PlanGraph {
    dag: DAG<PlanNode, ()>,
    index: HashMap<String, NodeId>,
    order: Vec<NodeId>,
    level: HashMap<NodeId, usize>,
    missed: BTreeMap<String, BTreeSet<String>>,
}

struct Builder<'a> {
    imports: &'a ImportRegistry,
    analyzer: &'a dyn DependencyAnalyzer,
    root: &'a Path,
    dag: DAG<PlanNode, ()>,
    index: HashMap<String, NodeId>,
    missed: BTreeMap<String, BTreeSet<String>>,
}

impl Builder<'_> {
    fn add(&mut self, name: &str, kind: NodeKind) -> NodeId {
        let id = self.dag.add_node(PlanNode {
            name: name.to_string(),
            kind,
        });
        let _ = self.index.insert(name.to_string(), id);
        id
    }

    fn miss(&mut self, name: &str, referrer: &str) {
        let _ = self
            .missed
            .entry(name.to_string())
            .or_default()
            .insert(referrer.to_string());
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> ConfigResult<()> {
        self.dag.add_edge(from, to, ()).map_err(|e| match e {
            GraphError::CycleDetected(path) => ConfigError::Cycle(
                path.into_iter()
                    .filter_map(|id| self.dag.node(id).ok())
                    .map(|node| node.name.clone())
                    .collect(),
            ),
            GraphError::SelfLoop(id) => ConfigError::SelfDependency(
                self.dag
                    .node(id)
                    .map(|node| node.name.clone())
                    .unwrap_or_default(),
            ),
            GraphError::NodeNotFound(id) => ConfigError::InvalidPlan(format!("dangling node {id}")),
        })
    }

    /// Resolve a reference made by an import. Imports never depend on targets.
    fn resolve_for_import(&mut self, name: &str, referrer: &str) -> ConfigResult<Option<NodeId>> {
        if let Some(&id) = self.index.get(name) {
            let kind = self.dag.node(id).map(|n| n.kind).ok();
            return Ok((kind != Some(NodeKind::Target)).then_some(id));
        }
        if self.imports.contains(name) {
            return self.add_import(name).map(Some);
        }
        Ok(self.add_file_import(name, referrer))
    }

    fn add_import(&mut self, name: &str) -> ConfigResult<NodeId> {
        let id = self.add(name, NodeKind::Import);
        let refs = self
            .imports
            .get(name)
            .and_then(|import| import.source.as_deref())
            .map(|source| self.analyzer.analyze(source))
            .unwrap_or_default();

        for reference in refs {
            // Recursive definitions refer to themselves.
            if reference == name {
                continue;
            }
            if let Some(dep) = self.resolve_for_import(&reference, name)? {
                self.connect(dep, id)?;
            }
        }
        Ok(id)
    }

    fn add_file_import(&mut self, name: &str, referrer: &str) -> Option<NodeId> {
        match file_path(name, self.root) {
            Some(path) if path.exists() => {
                debug!(file = %name, "Found file import");
                Some(self.add(name, NodeKind::FileImport))
            }
            _ => {
                self.miss(name, referrer);
                None
            }
        }
    }

    fn resolve(&mut self, name: &str, referrer: &str) -> ConfigResult<Option<NodeId>> {
        if let Some(&id) = self.index.get(name) {
            return Ok(Some(id));
        }
        if self.imports.contains(name) {
            return self.add_import(name).map(Some);
        }
        Ok(self.add_file_import(name, referrer))
    }
}

impl PlanGraph {
    /// Build and validate the graph.
    ///
    /// References are resolved in this order: plan targets, registered
    /// imports, files existing under `root`. Anything else is recorded as
    /// missed and does not become a node.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::SelfDependency`] if a target references itself (a
    ///   file target naming its own output is allowed)
    /// - [`ConfigError::Cycle`] if the dependencies are cyclic
    pub fn build(
        plan: &Plan,
        imports: &ImportRegistry,
        analyzer: &dyn DependencyAnalyzer,
        root: &Path,
    ) -> ConfigResult<Self> {
        let mut builder = Builder {
            imports,
            analyzer,
            root,
            dag: DAG::new(),
            index: HashMap::new(),
            missed: BTreeMap::new(),
        };

        for target in plan.targets() {
            let _ = builder.add(&target.name, NodeKind::Target);
        }

        for target in plan.targets() {
            let id = builder.index[&target.name];
            let inferred = analyzer.analyze(&target.command);
            let declared: BTreeSet<String> = target.depends.iter().cloned().collect();

            for reference in inferred.union(&declared) {
                if *reference == target.name {
                    if target.is_file() && !declared.contains(reference) {
                        continue;
                    }
                    return Err(ConfigError::SelfDependency(target.name.clone()));
                }
                match builder.resolve(reference, &target.name)? {
                    Some(dep) => builder.connect(dep, id)?,
                    None if declared.contains(reference) => {
                        warn!(target = %target.name, dependency = %reference,
                              "Declared dependency matches no target, import or file");
                    }
                    None => {}
                }
            }
        }

        let Builder {
            dag, index, missed, ..
        } = builder;

        let order = dag.topological_sort().map_err(|_| cycle_error(&dag))?;
        let mut level = HashMap::with_capacity(order.len());
        for (depth, ids) in dag
            .levels()
            .map_err(|_| cycle_error(&dag))?
            .into_iter()
            .enumerate()
        {
            for id in ids {
                let _ = level.insert(id, depth);
            }
        }

        debug!(
            nodes = dag.node_count(),
            edges = dag.edge_count(),
            missed = missed.len(),
            "Built dependency graph"
        );

        Ok(Self {
            dag,
            index,
            order,
            level,
            missed,
        })
    }

    fn id(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    fn name_of(&self, id: NodeId) -> &str {
        self.dag.node(id).map_or("", |node| node.name.as_str())
    }

    fn names(&self, ids: impl IntoIterator<Item = NodeId>) -> BTreeSet<String> {
        ids.into_iter().map(|id| self.name_of(id).to_string()).collect()
    }

    fn ids(&self, names: &[&str]) -> Vec<NodeId> {
        names.iter().filter_map(|name| self.id(name)).collect()
    }

    /// Whether `name` is a node.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Kind of a node.
    #[must_use]
    pub fn kind(&self, name: &str) -> Option<NodeKind> {
        self.id(name)
            .and_then(|id| self.dag.node(id).ok())
            .map(|node| node.kind)
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.dag.node_count()
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.dag.edge_count()
    }

    /// Direct dependencies of `name`, sorted.
    #[must_use]
    pub fn dependencies(&self, name: &str) -> BTreeSet<String> {
        self.id(name)
            .and_then(|id| self.dag.dependencies(id).ok())
            .map(|ids| self.names(ids))
            .unwrap_or_default()
    }

    /// Direct dependents of `name`, sorted.
    #[must_use]
    pub fn dependents(&self, name: &str) -> BTreeSet<String> {
        self.id(name)
            .and_then(|id| self.dag.dependents(id).ok())
            .map(|ids| self.names(ids))
            .unwrap_or_default()
    }

    /// `names` and everything they transitively depend on.
    #[must_use]
    pub fn upstream(&self, names: &[&str]) -> BTreeSet<String> {
        self.names(self.dag.upstream(&self.ids(names)))
    }

    /// `names` and everything that transitively depends on them.
    #[must_use]
    pub fn downstream(&self, names: &[&str]) -> BTreeSet<String> {
        self.names(self.dag.downstream(&self.ids(names)))
    }

    /// All nodes in a deterministic topological order.
    pub fn topological_order(&self) -> impl Iterator<Item = &PlanNode> {
        self.order.iter().filter_map(|&id| self.dag.node(id).ok())
    }

    /// Topological level of a node (0 for nodes without dependencies).
    #[must_use]
    pub fn level(&self, name: &str) -> Option<usize> {
        self.id(name).and_then(|id| self.level.get(&id).copied())
    }

    /// Partition `subset` into stages by topological level of the subgraph
    /// it induces.
    ///
    /// Only edges between members count: nodes outside `subset` are not
    /// rebuilt, so they never hold a member back. Every node in a stage
    /// depends only on members of earlier stages. Members are sorted by
    /// name.
    #[must_use]
    pub fn stages(&self, subset: &BTreeSet<String>) -> Vec<Vec<String>> {
        let keep: BTreeSet<NodeId> = subset.iter().filter_map(|name| self.id(name)).collect();
        match self.dag.induced_subgraph(&keep).levels() {
            Ok(levels) => levels
                .into_iter()
                .map(|ids| self.names(ids).into_iter().collect())
                .collect(),
            Err(e) => {
                warn!(error = %e, "Subgraph levels unavailable, staging by graph level");
                self.global_stages(subset)
            }
        }
    }

    fn global_stages(&self, subset: &BTreeSet<String>) -> Vec<Vec<String>> {
        let mut by_level: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for name in subset {
            if let Some(level) = self.level(name) {
                by_level.entry(level).or_default().push(name.clone());
            }
        }
        by_level.into_values().collect()
    }

    /// References that resolved to nothing, with the nodes that made them.
    #[must_use]
    pub fn missed(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.missed
    }
}

fn cycle_error(dag: &DAG<PlanNode, ()>) -> ConfigError {
    let names = dag
        .find_cycles()
        .into_iter()
        .next()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|id| dag.node(id).ok())
        .map(|node| node.name.clone())
        .collect();
    ConfigError::Cycle(names)
}
