//! Staged rebuild simulation
//!
//! Exercises the pieces a build scheduler needs from the graph:
//! 1. Downstream closure of a changed node (what could be affected)
//! 2. Induced subgraph of the affected nodes
//! 3. Topological levels of that subgraph (what can run together)
//! 4. Cycle rejection before anything is scheduled

use convenient_graph::{DAG, GraphError, NodeId};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    name: &'static str,
    command: &'static str,
}

fn step(name: &'static str, command: &'static str) -> Step {
    Step { name, command }
}

fn names(dag: &DAG<Step, ()>, ids: &[NodeId]) -> Vec<&'static str> {
    ids.iter().map(|id| dag.node(*id).unwrap().name).collect()
}

/// compile -> {link, docs}; link -> package; lint stands alone
fn pipeline() -> (DAG<Step, ()>, Vec<NodeId>) {
    let mut dag = DAG::new();
    let compile = dag.add_node(step("compile", "cc -c main.c"));
    let link = dag.add_node(step("link", "cc -o app main.o"));
    let docs = dag.add_node(step("docs", "doxygen"));
    let package = dag.add_node(step("package", "tar czf app.tgz app"));
    let lint = dag.add_node(step("lint", "clang-tidy main.c"));

    dag.add_edge(compile, link, ()).unwrap();
    dag.add_edge(compile, docs, ()).unwrap();
    dag.add_edge(link, package, ()).unwrap();

    (dag, vec![compile, link, docs, package, lint])
}

#[test]
fn test_full_build_stages() {
    let (dag, ids) = pipeline();
    assert_eq!(dag.node(ids[0]).unwrap().command, "cc -c main.c");
    let levels = dag.levels().unwrap();
    let staged: Vec<Vec<&str>> = levels.iter().map(|l| names(&dag, l)).collect();

    assert_eq!(
        staged,
        vec![
            vec!["compile", "lint"],
            vec!["link", "docs"],
            vec!["package"],
        ]
    );
}

#[test]
fn test_change_in_middle_only_stages_downstream() {
    let (dag, ids) = pipeline();
    let link = ids[1];

    let affected = dag.downstream(&[link]);
    let sub = dag.induced_subgraph(&affected);
    let staged: Vec<Vec<&str>> = sub
        .levels()
        .unwrap()
        .iter()
        .map(|l| names(&sub, l))
        .collect();

    assert_eq!(staged, vec![vec!["link"], vec!["package"]]);
}

#[test]
fn test_partial_request_pulls_upstream() {
    let (dag, ids) = pipeline();
    let package = ids[3];

    let needed = dag.upstream(&[package]);
    let got: BTreeSet<&str> = needed.iter().map(|id| dag.node(*id).unwrap().name).collect();
    assert_eq!(got, BTreeSet::from(["compile", "link", "package"]));
}

#[test]
fn test_levels_are_reproducible() {
    let (first, _) = pipeline();
    let (second, _) = pipeline();
    assert_eq!(first.levels().unwrap(), second.levels().unwrap());
    assert_eq!(
        first.topological_sort().unwrap(),
        second.topological_sort().unwrap()
    );
}

#[test]
fn test_cycle_rejected_before_scheduling() {
    let (mut dag, ids) = pipeline();
    let (compile, package) = (ids[0], ids[3]);

    let err = dag.add_edge(package, compile, ()).unwrap_err();
    match err {
        GraphError::CycleDetected(path) => {
            assert_eq!(names(&dag, &path), vec!["package", "compile", "link", "package"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(dag.levels().unwrap().len(), 3);
}
