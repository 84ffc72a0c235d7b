use std::path::PathBuf;

use serde_json::Error as JsonError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph file {path} could not be read: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("graph JSON could not be parsed: {source}")]
    Parse {
        #[from]
        source: JsonError,
    },
    #[error("layer `{node}` of type `{layer_type}` has no shape rule")]
    NotSupported { node: String, layer_type: String },
    #[error("invalid graph at layer `{node}`: {reason}")]
    InvalidGraph { node: String, reason: String },
    #[error(
        "output shape of data layer `{node}` cannot be derived statically; \
         declare an explicit input shape (e.g. a deploy-style `Input` layer)"
    )]
    ShapeUnknown { node: String },
    #[error("graph could not be exported to {path}: {source}")]
    ExportIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GraphError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GraphError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn export(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GraphError::ExportIo {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_graph(node: impl Into<String>, reason: impl Into<String>) -> Self {
        GraphError::InvalidGraph {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Only an unknown data-layer shape can be worked around by the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, GraphError::ShapeUnknown { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::GraphError;

    #[test]
    fn test_only_unknown_shape_is_recoverable() {
        let unknown = GraphError::ShapeUnknown {
            node: "data".to_string(),
        };
        let unsupported = GraphError::NotSupported {
            node: "up".to_string(),
            layer_type: "Deconvolution".to_string(),
        };
        let invalid = GraphError::invalid_graph("relu", "layer has no parents");

        assert!(unknown.is_recoverable());
        assert!(!unsupported.is_recoverable());
        assert!(!invalid.is_recoverable());
    }

    #[test]
    fn test_messages_name_the_layer() {
        let err = GraphError::invalid_graph("conv1", "expected exactly one parent, found 2");
        assert_eq!(
            err.to_string(),
            "invalid graph at layer `conv1`: expected exactly one parent, found 2"
        );
        let err = GraphError::ShapeUnknown {
            node: "data".to_string(),
        };
        assert!(err.to_string().contains("`data`"));
        assert!(err.to_string().contains("explicit input shape"));
    }
}
