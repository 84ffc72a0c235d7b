use std::collections::HashMap;

use crate::error::GraphError;
use crate::graph::{Node, NodeGraph, TensorShape};
use crate::shape_inference::ShapeRule;

const IDENTITY_LAYERS: &[&str] = &[
    "AbsVal",
    "BatchNorm",
    "Bias",
    "Dropout",
    "ELU",
    "Eltwise",
    "Exp",
    "HDF5Output",
    "LRN",
    "Log",
    "PReLU",
    "Power",
    "ReLU",
    "Scale",
    "Sigmoid",
    "Softmax",
    "TanH",
    "Threshold",
];

const SCALAR_LAYERS: &[&str] = &[
    "Accuracy",
    "ContrastiveLoss",
    "EuclideanLoss",
    "HingeLoss",
    "InfogainLoss",
    "MultinomialLogisticLoss",
    "SigmoidCrossEntropyLoss",
    "SoftmaxWithLoss",
];

const DATA_LAYERS: &[&str] = &[
    "Data",
    "DummyData",
    "HDF5Data",
    "ImageData",
    "Input",
];

/// Maps layer type names to the shape rule that applies to them.
///
/// Types without an entry resolve to [`ShapeRule::NotImplemented`].
#[derive(Debug, Clone, Default)]
pub struct ShapeRegistry {
    rules: HashMap<String, ShapeRule>,
}

impl ShapeRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        for layer_type in IDENTITY_LAYERS {
            registry.register(*layer_type, ShapeRule::Identity);
        }
        for layer_type in SCALAR_LAYERS {
            registry.register(*layer_type, ShapeRule::Scalar);
        }
        for layer_type in DATA_LAYERS {
            registry.register(*layer_type, ShapeRule::Data);
        }
        registry.register("MemoryData", ShapeRule::MemoryData);
        registry.register("Concat", ShapeRule::Concat);
        registry.register("Convolution", ShapeRule::Convolution);
        registry.register("Pooling", ShapeRule::Pooling);
        registry.register("InnerProduct", ShapeRule::InnerProduct);
        registry
    }

    /// Adds or replaces the rule for `layer_type`.
    pub fn register(&mut self, layer_type: impl Into<String>, rule: ShapeRule) {
        self.rules.insert(layer_type.into(), rule);
    }

    pub fn rule_for(&self, layer_type: &str) -> ShapeRule {
        self.rules
            .get(layer_type)
            .copied()
            .unwrap_or(ShapeRule::NotImplemented)
    }

    pub fn layer_types(&self) -> Vec<&str> {
        let mut keys: Vec<_> = self.rules.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn infer(&self, graph: &NodeGraph, node: &Node) -> Result<TensorShape, GraphError> {
        self.rule_for(&node.layer_type).infer(graph, node)
    }
}
