//! Generic directed acyclic graph (DAG) library for dependency resolution.
//!
//! This crate provides the graph layer used by build planners:
//! - Target dependency graphs
//! - Import/reference graphs
//! - Any precedence relation that must stay acyclic
//!
//! # Features
//!
//! - Generic nodes and edges with type parameters
//! - Deterministic iteration (nodes and adjacency are kept ordered by id)
//! - Topological sorting using Kahn's algorithm
//! - Topological levels (bulk-synchronous stages)
//! - Cycle and self-loop rejection with the offending path reported
//! - Upstream / downstream closure queries and induced subgraphs
//! - Optional serde support
//!
//! # Example
//!
//! ```
//! use convenient_graph::DAG;
//!
//! let mut dag = DAG::<&str, ()>::new();
//! let a = dag.add_node("a");
//! let b = dag.add_node("b");
//! let c = dag.add_node("c");
//! let d = dag.add_node("d");
//!
//! // Diamond: a -> {b, c} -> d
//! dag.add_edge(a, b, ()).unwrap();
//! dag.add_edge(a, c, ()).unwrap();
//! dag.add_edge(b, d, ()).unwrap();
//! dag.add_edge(c, d, ()).unwrap();
//!
//! let levels = dag.levels().unwrap();
//! assert_eq!(levels, vec![vec![a], vec![b, c], vec![d]]);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(unused_results)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Node identifier in the DAG.
///
/// Ids are handed out in insertion order, so ordering by id is ordering by
/// insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeId(usize);

impl NodeId {
    /// Raw index of this node.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

fn format_path(path: &[NodeId]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Error types for DAG operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Cycle detected in the graph. The path starts and ends at the same node.
    #[error("Cycle detected in graph: {}", format_path(.0))]
    CycleDetected(Vec<NodeId>),

    /// An edge from a node to itself was requested
    #[error("Self-loop on {0} is not allowed")]
    SelfLoop(NodeId),

    /// Node not found
    #[error("Node {0} not found in graph")]
    NodeNotFound(NodeId),
}

/// Result type for DAG operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// A node in the DAG containing data and tracking its edges.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct Node<N> {
    data: N,
    // this node -> other nodes (dependents)
    outgoing: BTreeSet<NodeId>,
    // other nodes -> this node (dependencies)
    incoming: BTreeSet<NodeId>,
}

/// An edge in the DAG connecting two nodes with optional data.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct Edge<E> {
    from: NodeId,
    to: NodeId,
    data: E,
}

/// Generic directed acyclic graph (DAG).
///
/// An edge `from -> to` means `from` must be processed before `to`
/// (`to` depends on `from`). The graph refuses edges that would close a
/// cycle, so every value of this type is acyclic.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DAG<N, E> {
    nodes: BTreeMap<NodeId, Node<N>>,
    edges: Vec<Edge<E>>,
    next_id: usize,
}

impl<N, E> Default for DAG<N, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N, E> DAG<N, E> {
    /// Create a new empty DAG.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            edges: Vec::new(),
            next_id: 0,
        }
    }

    /// Add a node to the graph and return its ID.
    pub fn add_node(&mut self, data: N) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;

        let node = Node {
            data,
            outgoing: BTreeSet::new(),
            incoming: BTreeSet::new(),
        };

        let _ = self.nodes.insert(id, node);
        id
    }

    /// Add a directed edge from `from` to `to` with associated data.
    ///
    /// If task B depends on task A, call `add_edge(A, B, ...)`. Adding an
    /// edge that already exists is a no-op and keeps the original data.
    ///
    /// # Errors
    ///
    /// - `GraphError::NodeNotFound` if either node doesn't exist
    /// - `GraphError::SelfLoop` if `from == to`
    /// - `GraphError::CycleDetected` if the edge would close a cycle; the
    ///   reported path is `from -> to -> ... -> from`
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, data: E) -> GraphResult<()> {
        if !self.nodes.contains_key(&from) {
            return Err(GraphError::NodeNotFound(from));
        }
        if !self.nodes.contains_key(&to) {
            return Err(GraphError::NodeNotFound(to));
        }
        if from == to {
            return Err(GraphError::SelfLoop(from));
        }
        if self.nodes[&from].outgoing.contains(&to) {
            return Ok(());
        }

        // If `to` can already reach `from`, the new edge closes a cycle.
        if let Some(back) = self.path_between(to, from) {
            let mut cycle = Vec::with_capacity(back.len() + 1);
            cycle.push(from);
            cycle.extend(back);
            return Err(GraphError::CycleDetected(cycle));
        }

        self.edges.push(Edge { from, to, data });
        if let Some(from_node) = self.nodes.get_mut(&from) {
            let _ = from_node.outgoing.insert(to);
        }
        if let Some(to_node) = self.nodes.get_mut(&to) {
            let _ = to_node.incoming.insert(from);
        }

        Ok(())
    }

    /// Shortest path from `start` to `end` following edge direction,
    /// inclusive of both endpoints.
    fn path_between(&self, start: NodeId, end: NodeId) -> Option<Vec<NodeId>> {
        let mut parent: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        let mut queue = VecDeque::from([start]);
        let mut seen = BTreeSet::from([start]);

        while let Some(current) = queue.pop_front() {
            if current == end {
                let mut path = vec![end];
                let mut cursor = end;
                while let Some(&prev) = parent.get(&cursor) {
                    path.push(prev);
                    cursor = prev;
                }
                path.reverse();
                return Some(path);
            }
            if let Some(node) = self.nodes.get(&current) {
                for &next in &node.outgoing {
                    if seen.insert(next) {
                        let _ = parent.insert(next, current);
                        queue.push_back(next);
                    }
                }
            }
        }

        None
    }

    /// Get a reference to a node's data.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::NodeNotFound` if the node doesn't exist.
    pub fn node(&self, id: NodeId) -> GraphResult<&N> {
        self.nodes
            .get(&id)
            .map(|node| &node.data)
            .ok_or(GraphError::NodeNotFound(id))
    }

    /// Get a mutable reference to a node's data.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::NodeNotFound` if the node doesn't exist.
    pub fn node_mut(&mut self, id: NodeId) -> GraphResult<&mut N> {
        self.nodes
            .get_mut(&id)
            .map(|node| &mut node.data)
            .ok_or(GraphError::NodeNotFound(id))
    }

    /// All node IDs in insertion order.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    /// Iterate over `(id, data)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &N)> {
        self.nodes.iter().map(|(id, node)| (*id, &node.data))
    }

    /// Get the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get the number of edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Whether `id` is a node of this graph.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Data attached to the edge `from -> to`, if present.
    #[must_use]
    pub fn edge(&self, from: NodeId, to: NodeId) -> Option<&E> {
        self.edges
            .iter()
            .find(|edge| edge.from == from && edge.to == to)
            .map(|edge| &edge.data)
    }

    /// Direct dependencies (incoming edges) of a node, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::NodeNotFound` if the node doesn't exist.
    pub fn dependencies(&self, id: NodeId) -> GraphResult<Vec<NodeId>> {
        self.nodes
            .get(&id)
            .map(|node| node.incoming.iter().copied().collect())
            .ok_or(GraphError::NodeNotFound(id))
    }

    /// Direct dependents (outgoing edges) of a node, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::NodeNotFound` if the node doesn't exist.
    pub fn dependents(&self, id: NodeId) -> GraphResult<Vec<NodeId>> {
        self.nodes
            .get(&id)
            .map(|node| node.outgoing.iter().copied().collect())
            .ok_or(GraphError::NodeNotFound(id))
    }

    /// Perform topological sort using Kahn's algorithm.
    ///
    /// Returns nodes in dependency order (dependencies before dependents).
    /// Among nodes that are ready at the same time the lowest id wins, so the
    /// order is stable for a given insertion sequence.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::CycleDetected` if the graph contains a cycle.
    pub fn topological_sort(&self) -> GraphResult<Vec<NodeId>> {
        let mut in_degree: BTreeMap<NodeId, usize> = self
            .nodes
            .iter()
            .map(|(id, node)| (*id, node.incoming.len()))
            .collect();

        let mut ready: BTreeSet<NodeId> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(node_id) = ready.pop_first() {
            result.push(node_id);

            if let Some(node) = self.nodes.get(&node_id) {
                for neighbor in &node.outgoing {
                    if let Some(degree) = in_degree.get_mut(neighbor) {
                        *degree -= 1;
                        if *degree == 0 {
                            let _ = ready.insert(*neighbor);
                        }
                    }
                }
            }
        }

        if result.len() == self.nodes.len() {
            Ok(result)
        } else {
            let cycle = self.find_cycles().into_iter().next().unwrap_or_default();
            Err(GraphError::CycleDetected(cycle))
        }
    }

    /// Partition the graph into topological levels.
    ///
    /// Level 0 holds nodes without dependencies; a node sits one level above
    /// its deepest dependency. Every node in level `k` depends only on nodes
    /// in levels `< k`, so each level can run concurrently once the previous
    /// ones have finished. Nodes inside a level are ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::CycleDetected` if the graph contains a cycle.
    pub fn levels(&self) -> GraphResult<Vec<Vec<NodeId>>> {
        let order = self.topological_sort()?;
        let mut depth: BTreeMap<NodeId, usize> = BTreeMap::new();
        let mut levels: Vec<Vec<NodeId>> = Vec::new();

        for id in order {
            let level = self.nodes[&id]
                .incoming
                .iter()
                .filter_map(|dep| depth.get(dep))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            let _ = depth.insert(id, level);
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(id);
        }

        for level in &mut levels {
            level.sort_unstable();
        }
        Ok(levels)
    }

    /// Every node reachable *upstream* of `seeds` (their transitive
    /// dependencies), including the seeds themselves.
    ///
    /// Unknown seeds are ignored.
    #[must_use]
    pub fn upstream(&self, seeds: &[NodeId]) -> BTreeSet<NodeId> {
        self.closure(seeds, |node| &node.incoming)
    }

    /// Every node reachable *downstream* of `seeds` (their transitive
    /// dependents), including the seeds themselves.
    ///
    /// Unknown seeds are ignored.
    #[must_use]
    pub fn downstream(&self, seeds: &[NodeId]) -> BTreeSet<NodeId> {
        self.closure(seeds, |node| &node.outgoing)
    }

    fn closure<F>(&self, seeds: &[NodeId], next: F) -> BTreeSet<NodeId>
    where
        F: Fn(&Node<N>) -> &BTreeSet<NodeId>,
    {
        let mut visited = BTreeSet::new();
        let mut stack: Vec<NodeId> = seeds
            .iter()
            .copied()
            .filter(|id| self.nodes.contains_key(id))
            .collect();

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(next(node).iter().filter(|id| !visited.contains(id)));
            }
        }

        visited
    }

    /// Find all cycles in the graph.
    ///
    /// Graphs built through [`DAG::add_edge`] are always acyclic, so this is
    /// a consistency check; each cycle is returned as a closed path.
    #[must_use]
    pub fn find_cycles(&self) -> Vec<Vec<NodeId>> {
        let mut cycles = Vec::new();
        let mut visited = BTreeSet::new();
        let mut rec_stack = BTreeSet::new();
        let mut path = Vec::new();

        for &node_id in self.nodes.keys() {
            if !visited.contains(&node_id) {
                self.find_cycles_dfs(
                    node_id,
                    &mut visited,
                    &mut rec_stack,
                    &mut path,
                    &mut cycles,
                );
            }
        }

        cycles
    }

    fn find_cycles_dfs(
        &self,
        node_id: NodeId,
        visited: &mut BTreeSet<NodeId>,
        rec_stack: &mut BTreeSet<NodeId>,
        path: &mut Vec<NodeId>,
        cycles: &mut Vec<Vec<NodeId>>,
    ) {
        let _ = visited.insert(node_id);
        let _ = rec_stack.insert(node_id);
        path.push(node_id);

        if let Some(node) = self.nodes.get(&node_id) {
            for &neighbor in &node.outgoing {
                if !visited.contains(&neighbor) {
                    self.find_cycles_dfs(neighbor, visited, rec_stack, path, cycles);
                } else if rec_stack.contains(&neighbor) {
                    if let Some(cycle_start) = path.iter().position(|&id| id == neighbor) {
                        let mut cycle = path[cycle_start..].to_vec();
                        cycle.push(neighbor);
                        cycles.push(cycle);
                    }
                }
            }
        }

        let _ = path.pop();
        let _ = rec_stack.remove(&node_id);
    }
}

impl<N: Clone, E: Clone> DAG<N, E> {
    /// Copy of the graph restricted to `keep`.
    ///
    /// Node ids are preserved, so ids from the original graph stay valid for
    /// the nodes that survive. Edges with an endpoint outside `keep` are
    /// dropped.
    #[must_use]
    pub fn induced_subgraph(&self, keep: &BTreeSet<NodeId>) -> Self {
        let nodes = self
            .nodes
            .iter()
            .filter(|(id, _)| keep.contains(id))
            .map(|(id, node)| {
                let trimmed = Node {
                    data: node.data.clone(),
                    outgoing: node.outgoing.intersection(keep).copied().collect(),
                    incoming: node.incoming.intersection(keep).copied().collect(),
                };
                (*id, trimmed)
            })
            .collect();

        let edges = self
            .edges
            .iter()
            .filter(|edge| keep.contains(&edge.from) && keep.contains(&edge.to))
            .cloned()
            .collect();

        Self {
            nodes,
            edges,
            next_id: self.next_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> (DAG<&'static str, ()>, [NodeId; 4]) {
        let mut dag = DAG::new();
        let a = dag.add_node("a");
        let b = dag.add_node("b");
        let c = dag.add_node("c");
        let d = dag.add_node("d");
        dag.add_edge(a, b, ()).unwrap();
        dag.add_edge(a, c, ()).unwrap();
        dag.add_edge(b, d, ()).unwrap();
        dag.add_edge(c, d, ()).unwrap();
        (dag, [a, b, c, d])
    }

    #[test]
    fn test_create_empty_dag() {
        let dag = DAG::<String, ()>::new();
        assert_eq!(dag.node_count(), 0);
        assert_eq!(dag.edge_count(), 0);
        assert!(dag.levels().unwrap().is_empty());
    }

    #[test]
    fn test_add_nodes() {
        let mut dag = DAG::<String, ()>::new();
        let a = dag.add_node("a".to_string());
        let b = dag.add_node("b".to_string());

        assert_eq!(dag.node_count(), 2);
        assert_eq!(dag.node(a).unwrap(), "a");
        assert_eq!(dag.node(b).unwrap(), "b");
        assert_eq!(dag.node_ids(), vec![a, b]);
    }

    #[test]
    fn test_duplicate_edge_is_noop() {
        let mut dag = DAG::<&str, u8>::new();
        let a = dag.add_node("a");
        let b = dag.add_node("b");
        dag.add_edge(a, b, 1).unwrap();
        dag.add_edge(a, b, 2).unwrap();
        assert_eq!(dag.edge_count(), 1);
        assert_eq!(dag.edge(a, b), Some(&1));
    }

    #[test]
    fn test_self_loop_rejected() {
        let mut dag = DAG::<&str, ()>::new();
        let a = dag.add_node("a");
        assert!(matches!(dag.add_edge(a, a, ()), Err(GraphError::SelfLoop(id)) if id == a));
    }

    #[test]
    fn test_cycle_detection_reports_path() {
        let mut dag = DAG::<&str, ()>::new();
        let a = dag.add_node("a");
        let b = dag.add_node("b");
        let c = dag.add_node("c");

        dag.add_edge(a, b, ()).unwrap();
        dag.add_edge(b, c, ()).unwrap();

        match dag.add_edge(c, a, ()) {
            Err(GraphError::CycleDetected(path)) => assert_eq!(path, vec![c, a, b, c]),
            other => panic!("expected cycle, got {other:?}"),
        }
        // Rejected edge leaves the graph untouched
        assert_eq!(dag.edge_count(), 2);
        assert!(dag.find_cycles().is_empty());
    }

    #[test]
    fn test_topological_sort_is_stable() {
        let mut dag = DAG::<&str, ()>::new();
        let z = dag.add_node("z");
        let y = dag.add_node("y");
        let x = dag.add_node("x");
        dag.add_edge(x, z, ()).unwrap();

        // y and x are both ready first; lowest id wins
        assert_eq!(dag.topological_sort().unwrap(), vec![y, x, z]);
    }

    #[test]
    fn test_levels_diamond() {
        let (dag, [a, b, c, d]) = diamond();
        assert_eq!(dag.levels().unwrap(), vec![vec![a], vec![b, c], vec![d]]);
    }

    #[test]
    fn test_levels_use_longest_path() {
        let mut dag = DAG::<&str, ()>::new();
        let a = dag.add_node("a");
        let b = dag.add_node("b");
        let c = dag.add_node("c");
        dag.add_edge(a, b, ()).unwrap();
        dag.add_edge(b, c, ()).unwrap();
        dag.add_edge(a, c, ()).unwrap();

        assert_eq!(dag.levels().unwrap(), vec![vec![a], vec![b], vec![c]]);
    }

    #[test]
    fn test_upstream_and_downstream() {
        let (mut dag, [a, b, c, d]) = diamond();
        let e = dag.add_node("e");

        assert_eq!(dag.upstream(&[b]), BTreeSet::from([a, b]));
        assert_eq!(dag.upstream(&[d]), BTreeSet::from([a, b, c, d]));
        assert_eq!(dag.downstream(&[b]), BTreeSet::from([b, d]));
        assert_eq!(dag.downstream(&[a, e]), BTreeSet::from([a, b, c, d, e]));
    }

    #[test]
    fn test_dependencies_and_dependents() {
        let (dag, [a, b, c, d]) = diamond();
        assert_eq!(dag.dependencies(d).unwrap(), vec![b, c]);
        assert_eq!(dag.dependents(a).unwrap(), vec![b, c]);
        assert!(dag.dependencies(a).unwrap().is_empty());
    }

    #[test]
    fn test_induced_subgraph_keeps_ids() {
        let (dag, [a, b, _c, d]) = diamond();
        let keep = BTreeSet::from([a, b, d]);
        let sub = dag.induced_subgraph(&keep);

        assert_eq!(sub.node_count(), 3);
        assert_eq!(sub.edge_count(), 2);
        assert_eq!(sub.node(d).unwrap(), &"d");
        assert_eq!(sub.levels().unwrap(), vec![vec![a], vec![b], vec![d]]);
    }

    #[test]
    fn test_unknown_node() {
        let (dag, _) = diamond();
        let ghost = NodeId(99);
        assert!(matches!(dag.node(ghost), Err(GraphError::NodeNotFound(_))));
        assert!(dag.upstream(&[ghost]).is_empty());
    }
}
