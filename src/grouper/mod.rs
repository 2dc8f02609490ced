//! Layer grouper (spec.md §4.6): partitions a runtime graph into a bounded
//! number of content layers using a dominator tree, biased by size and
//! popularity.
//!
//! The union/disjointness properties fall directly out of the dominator
//! tree: every node has exactly one immediate dominator, so "the set of
//! nodes dominated by each direct child of the root" is a partition of
//! every node reachable from the root.

use crate::resolver::{GraphNode, PathId, RuntimeGraph};
use petgraph::algo::dominators::{self, Dominators};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Closure size above which a node is promoted to its own subtree root
/// regardless of where the dominator tree would otherwise place it.
const SIZE_PROMOTION_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Popularity score above which a node is promoted likewise.
const POPULARITY_PROMOTION_THRESHOLD: u64 = 1000;

#[derive(Debug, Clone)]
pub struct Layer {
    /// Lexicographically sorted store paths.
    pub paths: Vec<String>,
    pub merge_rating: u64,
}

impl Layer {
    /// `SHA1(paths joined by ":")`, used only as a cache key (spec.md §3).
    pub fn identity_key(&self) -> String {
        use sha1::{Digest, Sha1};
        let joined = self.paths.join(":");
        let mut hasher = Sha1::new();
        hasher.update(joined.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Maps a store path's short name (basename with the store hash stripped)
/// to a popularity score. Absent entries default to popularity 1.
pub trait PopularityMap {
    fn popularity(&self, short_name: &str) -> u64;
}

impl PopularityMap for HashMap<String, u64> {
    fn popularity(&self, short_name: &str) -> u64 {
        self.get(short_name).copied().unwrap_or(1)
    }
}

/// Partition `graph` into at most `budget` layers.
///
/// Returned in merge-rating-descending order (spec.md §4.6 step 7); the
/// manifest builder re-sorts defensively but should not need to.
pub fn group(graph: &RuntimeGraph, popularity: &dyn PopularityMap, budget: usize) -> Vec<Layer> {
    if graph.nodes.is_empty() || budget == 0 {
        return Vec::new();
    }

    let scores: Vec<u64> = graph
        .nodes
        .iter()
        .map(|n| popularity.popularity(RuntimeGraph::short_name(&n.path)))
        .collect();

    let (dag, root, id_to_node) = build_graph(graph, &scores);
    let doms = dominators::simple_fast(&dag, root);

    let mut layers = direct_child_layers(graph, &scores, &dag, root, &doms, &id_to_node);

    merge_to_budget(&mut layers, budget);

    for layer in &mut layers {
        layer.paths.sort_unstable();
    }

    into_emission_order(layers)
}

/// Build the synthetic-root DAG with promoted nodes wired directly to the
/// root in addition to their normal references.
fn build_graph(
    graph: &RuntimeGraph,
    scores: &[u64],
) -> (DiGraph<PathId, ()>, NodeIndex, HashMap<PathId, NodeIndex>) {
    let mut dag = DiGraph::new();
    let root = dag.add_node(PathId::MAX);

    let mut id_to_node = HashMap::with_capacity(graph.nodes.len());
    for (i, _) in graph.nodes.iter().enumerate() {
        let idx = dag.add_node(i as PathId);
        id_to_node.insert(i as PathId, idx);
    }

    let top_level: std::collections::HashSet<PathId> = graph.top_level.iter().copied().collect();

    for (i, node) in graph.nodes.iter().enumerate() {
        let pid = i as PathId;
        let is_promoted = node.closure_size > SIZE_PROMOTION_THRESHOLD
            || scores[i] > POPULARITY_PROMOTION_THRESHOLD;

        if top_level.contains(&pid) || is_promoted {
            dag.add_edge(root, id_to_node[&pid], ());
        }

        for &reference in &node.references {
            if reference != pid {
                dag.add_edge(id_to_node[&pid], id_to_node[&reference], ());
            }
        }
    }

    (dag, root, id_to_node)
}

fn direct_child_layers(
    graph: &RuntimeGraph,
    scores: &[u64],
    dag: &DiGraph<PathId, ()>,
    root: NodeIndex,
    doms: &Dominators<NodeIndex>,
    id_to_node: &HashMap<PathId, NodeIndex>,
) -> Vec<Layer> {
    // Every node whose immediate dominator is the root starts a new layer.
    let mut dominated_by: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
    for idx in dag.node_indices() {
        if idx == root {
            continue;
        }
        if let Some(idom) = doms.immediate_dominator(idx) {
            dominated_by.entry(idom).or_default().push(idx);
        }
    }

    let direct_children: Vec<NodeIndex> = dominated_by.get(&root).cloned().unwrap_or_default();

    direct_children
        .into_iter()
        .map(|child_root| {
            let mut members = Vec::new();
            collect_dominated(child_root, &dominated_by, &mut members);

            let mut total_size: u64 = 0;
            let mut paths = Vec::with_capacity(members.len());
            for idx in &members {
                let pid = dag[*idx];
                let node: &GraphNode = &graph.nodes[pid as usize];
                total_size += node.closure_size;
                paths.push(node.path.clone());
            }

            let root_pid = dag[child_root];
            let root_popularity = scores[root_pid as usize];

            let _ = id_to_node;
            Layer { paths, merge_rating: root_popularity.saturating_mul(total_size) }
        })
        .collect()
}

fn collect_dominated(
    node: NodeIndex,
    dominated_by: &HashMap<NodeIndex, Vec<NodeIndex>>,
    out: &mut Vec<NodeIndex>,
) {
    out.push(node);
    if let Some(children) = dominated_by.get(&node) {
        for &child in children {
            collect_dominated(child, dominated_by, out);
        }
    }
}

/// Coalesce the two lowest-rated layers repeatedly until at most `budget`
/// remain. Internally sorts ascending to find the cheapest pair to merge
/// (spec.md §9 open question) — this is distinct from the descending order
/// the manifest expects on emission.
fn merge_to_budget(layers: &mut Vec<Layer>, budget: usize) {
    layers.sort_by_key(|l| l.merge_rating);
    while layers.len() > budget {
        let a = layers.remove(0);
        let b = layers.remove(0);
        let mut paths = a.paths;
        paths.extend(b.paths);
        let merged = Layer { paths, merge_rating: a.merge_rating.saturating_add(b.merge_rating) };

        let pos = layers.partition_point(|l| l.merge_rating < merged.merge_rating);
        layers.insert(pos, merged);
    }
}

/// Reorder layers into merge-rating-descending order for manifest
/// insertion (spec.md §4.6 step 7).
fn into_emission_order(mut layers: Vec<Layer>) -> Vec<Layer> {
    layers.sort_by(|a, b| b.merge_rating.cmp(&a.merge_rating));
    layers
}
