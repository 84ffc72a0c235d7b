use std::fs;
use std::path::Path;

use crate::error::GraphError;
use crate::graph::NodeGraph;

/// Load a layer graph from a JSON file of the form `{ "nodes": [...] }`.
///
/// Nodes must already be listed parents-first; parent references are indices
/// into the `nodes` array.
pub fn load_graph_from_path(path: impl AsRef<Path>) -> Result<NodeGraph, GraphError> {
    let path_ref = path.as_ref();
    let contents = fs::read_to_string(path_ref).map_err(|err| GraphError::io(path_ref, err))?;
    let graph: NodeGraph = serde_json::from_str(&contents)?;
    tracing::debug!(
        path = %path_ref.display(),
        nodes = graph.nodes.len(),
        "loaded layer graph"
    );
    Ok(graph)
}
