//! Property-based invariants for the layer grouper (spec.md §8 properties
//! 2–5): union, disjointness, budget, determinism, over random DAGs.
//!
//! Graphs are generated acyclic by construction: node `i` may only
//! reference nodes with a strictly higher index, so a plain forward scan
//! is already a topological order and nothing needs an explicit cycle
//! check. Sizes are kept well under the promotion threshold so union/
//! disjointness/budget hold against the graph's own reachability rather
//! than also having to reason about promoted-but-unreachable nodes.

use nixery::grouper::{self, Layer};
use nixery::resolver::{GraphNode, PathId, RuntimeGraph};
use proptest::prelude::*;
use proptest::strategy::BoxedStrategy;
use std::collections::{HashMap, HashSet};

fn arbitrary_graph() -> impl Strategy<Value = RuntimeGraph> {
    (2usize..15).prop_flat_map(|n| {
        let nodes = (0..n)
            .map(|i| {
                let refs: BoxedStrategy<Vec<PathId>> = if i + 1 < n {
                    prop::collection::vec((i as PathId + 1)..(n as PathId), 0..4).boxed()
                } else {
                    Just(Vec::new()).boxed()
                };
                (1u64..1000, refs).prop_map(move |(size, mut references)| {
                    references.sort_unstable();
                    references.dedup();
                    GraphNode { path: format!("/nix/store/{i:03}-pkg{i}"), closure_size: size, references }
                })
            })
            .collect::<Vec<_>>();

        let top_level = prop::collection::vec(0..(n as PathId), 1..=n.min(4));

        (nodes, top_level).prop_map(|(nodes, mut top_level)| {
            top_level.sort_unstable();
            top_level.dedup();
            RuntimeGraph { nodes, top_level }
        })
    })
}

fn reachable_paths(graph: &RuntimeGraph) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut stack: Vec<PathId> = graph.top_level.clone();
    while let Some(id) = stack.pop() {
        let node = &graph.nodes[id as usize];
        if seen.insert(node.path.clone()) {
            stack.extend(node.references.iter().copied());
        }
    }
    seen
}

fn empty_popularity() -> HashMap<String, u64> {
    HashMap::new()
}

fn layers_equal(a: &[Layer], b: &[Layer]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b.iter()).all(|(x, y)| x.paths == y.paths && x.merge_rating == y.merge_rating)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn union_disjoint_budget_and_determinism(
        graph in arbitrary_graph(),
        budget in 1usize..8,
    ) {
        let popularity = empty_popularity();
        let layers = grouper::group(&graph, &popularity, budget);

        prop_assert!(layers.len() <= budget, "budget exceeded: {} > {}", layers.len(), budget);

        let mut union: HashSet<String> = HashSet::new();
        let mut total_paths = 0usize;
        for layer in &layers {
            total_paths += layer.paths.len();
            for path in &layer.paths {
                prop_assert!(union.insert(path.clone()), "path {path} appeared in more than one layer");
            }
        }

        let expected = reachable_paths(&graph);
        prop_assert_eq!(union, expected, "union of layers must equal the full closure");
        prop_assert_eq!(total_paths, layers.iter().map(|l| l.paths.len()).sum::<usize>());

        let layers_again = grouper::group(&graph, &popularity, budget);
        prop_assert!(layers_equal(&layers, &layers_again), "grouping must be deterministic");
    }
}
