use std::collections::HashSet;

use crate::error::GraphError;
use crate::graph::{NodeGraph, NodeId, TensorShape};
use crate::registry::ShapeRegistry;

/// What to do with a data layer whose shape cannot be derived statically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownShapePolicy {
    /// Leave the layer unshaped and keep going.
    #[default]
    Skip,
    /// Fail with [`GraphError::ShapeUnknown`].
    Abort,
}

#[derive(Debug, Clone, Default)]
pub struct PropagationOptions {
    pub on_unknown_shape: UnknownShapePolicy,
}

#[derive(Debug, Default)]
pub struct PropagationReport {
    pub shaped: Vec<(NodeId, TensorShape)>,
    /// Layers left unshaped, including everything downstream of an unknown
    /// data layer.
    pub unknown: Vec<NodeId>,
    /// Data layers whose shape could not be derived; the cause of `unknown`.
    pub unknown_roots: Vec<NodeId>,
}

impl PropagationReport {
    pub fn is_complete(&self) -> bool {
        self.unknown.is_empty()
    }
}

/// Stores an output shape on every node of a graph.
///
/// Nodes are visited in the order they are listed; the caller guarantees that
/// every parent is listed before its children.
pub struct ShapePropagator<'a> {
    registry: &'a ShapeRegistry,
    options: PropagationOptions,
}

impl<'a> ShapePropagator<'a> {
    pub fn new(registry: &'a ShapeRegistry, options: PropagationOptions) -> Self {
        Self { registry, options }
    }

    pub fn propagate(&self, graph: &mut NodeGraph) -> Result<PropagationReport, GraphError> {
        let mut report = PropagationReport::default();
        let mut unshaped = HashSet::new();
        for idx in 0..graph.nodes.len() {
            let id = idx as NodeId;
            let node = &graph.nodes[idx];
            if let Some(parent) = node
                .parents
                .iter()
                .find(|parent| unshaped.contains(&parent.node))
            {
                tracing::debug!(
                    layer = %node.name,
                    parent = parent.node,
                    "skipping layer downstream of an unknown shape"
                );
                unshaped.insert(id);
                report.unknown.push(id);
                continue;
            }
            match self.registry.infer(graph, node) {
                Ok(shape) => {
                    tracing::debug!(
                        layer = %node.name,
                        layer_type = %node.layer_type,
                        %shape,
                        "inferred output shape"
                    );
                    graph.nodes[idx].output_shape = Some(shape);
                    report.shaped.push((id, shape));
                }
                Err(err) if err.is_recoverable() => {
                    if self.options.on_unknown_shape == UnknownShapePolicy::Abort {
                        return Err(err);
                    }
                    tracing::warn!(layer = %node.name, "{}", err);
                    unshaped.insert(id);
                    report.unknown.push(id);
                    report.unknown_roots.push(id);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{
        ConvolutionParameter, InnerProductParameter, LayerParameters, Node, PoolingParameter,
    };

    fn lenet_like(data_shape: Option<TensorShape>) -> NodeGraph {
        let mut graph = NodeGraph::default();
        let mut data = Node::new("data", "Data");
        data.output_shape = data_shape;
        let data = graph.push(data);
        let conv = graph.push(
            Node::new("conv1", "Convolution")
                .with_parents([data])
                .with_parameters(LayerParameters {
                    convolution_param: Some(ConvolutionParameter {
                        num_output: Some(20),
                        kernel_size: vec![5],
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
        );
        let pool = graph.push(
            Node::new("pool1", "Pooling")
                .with_parents([conv])
                .with_parameters(LayerParameters {
                    pooling_param: Some(PoolingParameter {
                        kernel_size: vec![2],
                        stride: vec![2],
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
        );
        let fc = graph.push(
            Node::new("ip1", "InnerProduct")
                .with_parents([pool])
                .with_parameters(LayerParameters {
                    inner_product_param: Some(InnerProductParameter {
                        num_output: Some(500),
                    }),
                    ..Default::default()
                }),
        );
        graph.push(Node::new("relu1", "ReLU").with_parents([fc]));
        graph
    }

    #[test]
    fn test_propagates_through_graph() {
        let registry = ShapeRegistry::with_defaults();
        let mut graph = lenet_like(Some(TensorShape::new(64, 1, 28, 28)));
        let report = ShapePropagator::new(&registry, PropagationOptions::default())
            .propagate(&mut graph)
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.shaped.len(), 5);
        let shapes: Vec<_> = graph.nodes.iter().map(|node| node.output_shape).collect();
        assert_eq!(
            shapes,
            vec![
                Some(TensorShape::new(64, 1, 28, 28)),
                Some(TensorShape::new(64, 20, 24, 24)),
                Some(TensorShape::new(64, 20, 12, 12)),
                Some(TensorShape::new(64, 500, 1, 1)),
                Some(TensorShape::new(64, 500, 1, 1)),
            ]
        );
    }

    #[test]
    fn test_unknown_data_shape_skips_descendants() {
        let registry = ShapeRegistry::with_defaults();
        let mut graph = lenet_like(None);
        let report = ShapePropagator::new(&registry, PropagationOptions::default())
            .propagate(&mut graph)
            .unwrap();
        assert!(report.shaped.is_empty());
        assert_eq!(report.unknown, vec![0, 1, 2, 3, 4]);
        assert_eq!(report.unknown_roots, vec![0]);
        assert!(graph.nodes.iter().all(|node| node.output_shape.is_none()));
    }

    #[test]
    fn test_unknown_branch_leaves_other_branches_shaped() {
        let registry = ShapeRegistry::with_defaults();
        let mut graph = NodeGraph::default();
        let images = graph.push(Node::new("images", "ImageData"));
        let labels =
            graph.push(Node::new("labels", "Input").with_output_shape(TensorShape::new(8, 1, 1, 1)));
        graph.push(Node::new("relu", "ReLU").with_parents([images]));
        graph.push(Node::new("label_copy", "Dropout").with_parents([labels]));
        graph.push(Node::new("loss", "SoftmaxWithLoss").with_parents([images, labels]));

        let report = ShapePropagator::new(&registry, PropagationOptions::default())
            .propagate(&mut graph)
            .unwrap();
        assert_eq!(report.unknown, vec![0, 2, 4]);
        assert_eq!(report.unknown_roots, vec![0]);
        assert_eq!(
            report.shaped,
            vec![
                (1, TensorShape::new(8, 1, 1, 1)),
                (3, TensorShape::new(8, 1, 1, 1)),
            ]
        );
    }

    #[test]
    fn test_skip_policy_reports_unknown_layers() {
        let registry = ShapeRegistry::with_defaults();
        let mut graph = NodeGraph::default();
        graph.push(Node::new("data", "ImageData"));
        graph.push(Node::new("labels", "Input").with_output_shape(TensorShape::new(8, 1, 1, 1)));

        let report = ShapePropagator::new(&registry, PropagationOptions::default())
            .propagate(&mut graph)
            .unwrap();
        assert_eq!(report.unknown, vec![0]);
        assert_eq!(report.unknown_roots, vec![0]);
        assert_eq!(report.shaped, vec![(1, TensorShape::new(8, 1, 1, 1))]);
        assert!(!report.is_complete());
    }

    #[test]
    fn test_abort_policy_returns_unknown_shape() {
        let registry = ShapeRegistry::with_defaults();
        let mut graph = lenet_like(None);
        let options = PropagationOptions {
            on_unknown_shape: UnknownShapePolicy::Abort,
        };
        let err = ShapePropagator::new(&registry, options)
            .propagate(&mut graph)
            .unwrap_err();
        assert!(matches!(err, GraphError::ShapeUnknown { ref node } if node == "data"));
    }

    #[test]
    fn test_unsupported_layer_aborts() {
        let registry = ShapeRegistry::with_defaults();
        let mut graph = lenet_like(Some(TensorShape::new(1, 1, 28, 28)));
        graph.push(Node::new("flat", "Flatten").with_parents([4]));
        let err = ShapePropagator::new(&registry, PropagationOptions::default())
            .propagate(&mut graph)
            .unwrap_err();
        assert!(matches!(err, GraphError::NotSupported { ref node, .. } if node == "flat"));
        // Earlier layers keep the shapes computed before the failure.
        assert_eq!(
            graph.nodes[4].output_shape,
            Some(TensorShape::new(1, 500, 1, 1))
        );
    }
}
