//! Wire types for the resolver subprocess contract (spec.md §4.8, §6).
//!
//! The resolver's result file is parsed into [`RawResolverOutput`] first,
//! then lowered into the graph-with-indices representation
//! ([`RuntimeGraph`]) that the layer grouper works with (spec.md §9 "Graph +
//! indices instead of pointer cycles").

use serde::Deserialize;
use std::collections::HashMap;

/// Opaque index into [`RuntimeGraph::nodes`]. Using an index rather than a
/// shared pointer keeps the graph free of reference cycles and makes the
/// dominator-tree computation a plain array-indexed algorithm.
pub type PathId = u32;

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub path: String,
    pub closure_size: u64,
    pub references: Vec<PathId>,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeGraph {
    pub nodes: Vec<GraphNode>,
    pub top_level: Vec<PathId>,
}

impl RuntimeGraph {
    /// Short name of a store path with the `<hash>-` store prefix stripped,
    /// used to key into the popularity map.
    pub fn short_name(path: &str) -> &str {
        path.rsplit('/')
            .next()
            .and_then(|basename| basename.split_once('-'))
            .map(|(_, name)| name)
            .unwrap_or(path)
    }
}

#[derive(Debug, Clone)]
pub struct SymlinkLayerDescriptor {
    pub size: u64,
    pub tar_hash: String,
    pub path: std::path::PathBuf,
}

#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    NotFound { pkgs: Vec<String> },
    Success { graph: RuntimeGraph, symlink_layer: SymlinkLayerDescriptor },
}

// --- Raw JSON shapes, as produced by `nixery-prepare-image` ---

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum RawResolverOutput {
    NotFound(RawNotFound),
    Success(RawSuccess),
}

#[derive(Debug, Deserialize)]
pub(super) struct RawNotFound {
    pub error: String,
    pub pkgs: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawSuccess {
    #[serde(rename = "runtimeGraph")]
    pub runtime_graph: RawRuntimeGraph,
    #[serde(rename = "symlinkLayer")]
    pub symlink_layer: RawSymlinkLayer,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawRuntimeGraph {
    pub graph: Vec<RawGraphNode>,
    #[serde(rename = "exportReferencesGraph")]
    pub export_references_graph: RawTopLevel,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawTopLevel {
    pub graph: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawGraphNode {
    pub path: String,
    #[serde(rename = "closureSize")]
    pub closure_size: u64,
    pub references: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct RawSymlinkLayer {
    pub size: u64,
    #[serde(rename = "tarHash")]
    pub tar_hash: String,
    pub path: std::path::PathBuf,
}

/// Lower the raw, path-keyed JSON graph into an index-keyed [`RuntimeGraph`].
pub(super) fn lower_graph(raw: RawRuntimeGraph) -> RuntimeGraph {
    let mut index_of: HashMap<String, PathId> = HashMap::with_capacity(raw.graph.len());
    for (i, node) in raw.graph.iter().enumerate() {
        index_of.insert(node.path.clone(), i as PathId);
    }

    let nodes = raw
        .graph
        .into_iter()
        .map(|n| GraphNode {
            references: n
                .references
                .iter()
                .filter_map(|r| index_of.get(r).copied())
                .collect(),
            path: n.path,
            closure_size: n.closure_size,
        })
        .collect();

    let top_level = raw
        .export_references_graph
        .graph
        .iter()
        .filter_map(|p| index_of.get(p).copied())
        .collect();

    RuntimeGraph { nodes, top_level }
}
