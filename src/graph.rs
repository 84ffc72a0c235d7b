use std::fmt;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, OneOrMany};

use crate::error::GraphError;

/// Index of a node inside [`NodeGraph::nodes`].
pub type NodeId = u32;

/// Output shape of a 4-D activation tensor in NCHW order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct TensorShape {
    pub batch_size: u32,
    pub channels: u32,
    pub height: u32,
    pub width: u32,
}

impl TensorShape {
    pub const RANK: usize = 4;

    pub const fn new(batch_size: u32, channels: u32, height: u32, width: u32) -> Self {
        Self {
            batch_size,
            channels,
            height,
            width,
        }
    }

    pub fn dims(&self) -> [u32; 4] {
        [self.batch_size, self.channels, self.height, self.width]
    }

    /// Dimension at `axis` (0 = batch, 1 = channels, 2 = height, 3 = width).
    pub fn dim(&self, axis: usize) -> Option<u32> {
        self.dims().get(axis).copied()
    }
}

impl From<[u32; 4]> for TensorShape {
    fn from(dims: [u32; 4]) -> Self {
        Self::new(dims[0], dims[1], dims[2], dims[3])
    }
}

impl From<TensorShape> for [u32; 4] {
    fn from(shape: TensorShape) -> Self {
        shape.dims()
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{}x{}",
            self.batch_size, self.channels, self.height, self.width
        )
    }
}

/// Spatial geometry shared by Caffe's convolution and pooling parameters.
///
/// Repeated fields accept either a scalar or a list. A single value applies to
/// both axes; otherwise index 0 is height and index 1 is width.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvolutionParameter {
    #[serde(default)]
    pub num_output: Option<u32>,
    #[serde_as(as = "OneOrMany<_>")]
    #[serde(default)]
    pub kernel_size: Vec<u32>,
    #[serde(default)]
    pub kernel_h: Option<u32>,
    #[serde(default)]
    pub kernel_w: Option<u32>,
    #[serde_as(as = "OneOrMany<_>")]
    #[serde(default)]
    pub stride: Vec<u32>,
    #[serde(default)]
    pub stride_h: Option<u32>,
    #[serde(default)]
    pub stride_w: Option<u32>,
    #[serde_as(as = "OneOrMany<_>")]
    #[serde(default)]
    pub pad: Vec<u32>,
    #[serde(default)]
    pub pad_h: Option<u32>,
    #[serde(default)]
    pub pad_w: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolRoundMode {
    #[default]
    #[serde(alias = "CEIL")]
    Ceil,
    #[serde(alias = "FLOOR")]
    Floor,
}

#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolingParameter {
    #[serde_as(as = "OneOrMany<_>")]
    #[serde(default)]
    pub kernel_size: Vec<u32>,
    #[serde(default)]
    pub kernel_h: Option<u32>,
    #[serde(default)]
    pub kernel_w: Option<u32>,
    #[serde_as(as = "OneOrMany<_>")]
    #[serde(default)]
    pub stride: Vec<u32>,
    #[serde(default)]
    pub stride_h: Option<u32>,
    #[serde(default)]
    pub stride_w: Option<u32>,
    #[serde_as(as = "OneOrMany<_>")]
    #[serde(default)]
    pub pad: Vec<u32>,
    #[serde(default)]
    pub pad_h: Option<u32>,
    #[serde(default)]
    pub pad_w: Option<u32>,
    #[serde(default)]
    pub global_pooling: bool,
    #[serde(default)]
    pub round_mode: PoolRoundMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerProductParameter {
    #[serde(default)]
    pub num_output: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcatParameter {
    #[serde(default)]
    pub axis: Option<i32>,
    /// Legacy spelling of `axis`, only consulted when `axis` is absent.
    #[serde(default)]
    pub concat_dim: Option<u32>,
}

impl ConcatParameter {
    pub const DEFAULT_AXIS: i32 = 1;

    pub fn resolved_axis(&self) -> i32 {
        self.axis
            .or(self.concat_dim.map(|dim| dim as i32))
            .unwrap_or(Self::DEFAULT_AXIS)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobShape {
    #[serde(default)]
    pub dim: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputParameter {
    #[serde(default)]
    pub shape: Vec<BlobShape>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryDataParameter {
    pub batch_size: u32,
    pub channels: u32,
    pub height: u32,
    pub width: u32,
}

/// Per-layer parameter messages, mirroring the layout of a Caffe layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convolution_param: Option<ConvolutionParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pooling_param: Option<PoolingParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inner_product_param: Option<InnerProductParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concat_param: Option<ConcatParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_param: Option<InputParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_data_param: Option<MemoryDataParameter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub node: NodeId,
    #[serde(default)]
    pub output_index: u32,
}

impl ParentRef {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            output_index: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    #[serde(rename = "type")]
    pub layer_type: String,
    #[serde(default)]
    pub parents: Vec<ParentRef>,
    #[serde(default)]
    pub parameters: LayerParameters,
    #[serde(default)]
    pub output_shape: Option<TensorShape>,
}

impl Node {
    pub fn new(name: impl Into<String>, layer_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layer_type: layer_type.into(),
            parents: Vec::new(),
            parameters: LayerParameters::default(),
            output_shape: None,
        }
    }

    pub fn with_parents(mut self, parents: impl IntoIterator<Item = NodeId>) -> Self {
        self.parents = parents.into_iter().map(ParentRef::new).collect();
        self
    }

    pub fn with_parameters(mut self, parameters: LayerParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_output_shape(mut self, shape: TensorShape) -> Self {
        self.output_shape = Some(shape);
        self
    }
}

/// Arena of layer nodes. Parent references are indices into `nodes`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeGraph {
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl NodeGraph {
    pub fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        (self.nodes.len() - 1) as NodeId
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id as usize)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id as usize)
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| node.name == name)
            .map(|idx| idx as NodeId)
    }

    /// Output shape of the `position`-th parent of `node`.
    pub fn parent_shape(&self, node: &Node, position: usize) -> Result<TensorShape, GraphError> {
        let parent_ref = node.parents.get(position).ok_or_else(|| {
            GraphError::invalid_graph(&node.name, format!("missing parent #{}", position))
        })?;
        let parent = self.node(parent_ref.node).ok_or_else(|| {
            GraphError::invalid_graph(
                &node.name,
                format!("parent id {} does not exist", parent_ref.node),
            )
        })?;
        parent.output_shape.ok_or_else(|| {
            GraphError::invalid_graph(
                &node.name,
                format!("parent `{}` has no output shape yet", parent.name),
            )
        })
    }

    pub fn parent_shapes(&self, node: &Node) -> Result<Vec<TensorShape>, GraphError> {
        (0..node.parents.len())
            .map(|position| self.parent_shape(node, position))
            .collect()
    }

    /// Shape of the single parent of `node`; any other parent count is an error.
    pub fn only_parent_shape(&self, node: &Node) -> Result<TensorShape, GraphError> {
        if node.parents.len() != 1 {
            return Err(GraphError::invalid_graph(
                &node.name,
                format!("expected exactly one parent, found {}", node.parents.len()),
            ));
        }
        self.parent_shape(node, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_shape_serializes_as_array() {
        let shape = TensorShape::new(8, 64, 10, 10);
        let json = serde_json::to_string(&shape).unwrap();
        assert_eq!(json, "[8,64,10,10]");
        assert_eq!(shape.to_string(), "8x64x10x10");
        assert_eq!(shape.dim(1), Some(64));
        assert_eq!(shape.dim(4), None);
    }

    #[test]
    fn test_repeated_geometry_accepts_scalar_or_list() {
        let param: ConvolutionParameter =
            serde_json::from_str(r#"{"num_output": 96, "kernel_size": 11, "stride": [4, 2]}"#)
                .unwrap();
        assert_eq!(param.num_output, Some(96));
        assert_eq!(param.kernel_size, vec![11]);
        assert_eq!(param.stride, vec![4, 2]);
        assert!(param.pad.is_empty());
    }

    #[test]
    fn test_pooling_round_mode_defaults_to_ceil() {
        let param: PoolingParameter = serde_json::from_str(r#"{"kernel_size": 3}"#).unwrap();
        assert_eq!(param.round_mode, PoolRoundMode::Ceil);
        let param: PoolingParameter =
            serde_json::from_str(r#"{"kernel_size": 3, "round_mode": "FLOOR"}"#).unwrap();
        assert_eq!(param.round_mode, PoolRoundMode::Floor);
    }

    #[test]
    fn test_concat_axis_falls_back_to_legacy_field() {
        assert_eq!(ConcatParameter::default().resolved_axis(), 1);
        let legacy = ConcatParameter {
            axis: None,
            concat_dim: Some(2),
        };
        assert_eq!(legacy.resolved_axis(), 2);
        let both = ConcatParameter {
            axis: Some(-1),
            concat_dim: Some(2),
        };
        assert_eq!(both.resolved_axis(), -1);
    }

    #[test]
    fn test_parent_shape_requires_shaped_parent() {
        let mut graph = NodeGraph::default();
        let data = graph.push(Node::new("data", "Input"));
        let relu = graph.push(Node::new("relu", "ReLU").with_parents([data]));

        let node = graph.node(relu).unwrap();
        let err = graph.parent_shape(node, 0).unwrap_err();
        assert!(matches!(err, GraphError::InvalidGraph { ref node, .. } if node == "relu"));

        graph.node_mut(data).unwrap().output_shape = Some(TensorShape::new(1, 3, 4, 4));
        let node = graph.node(relu).unwrap();
        assert_eq!(
            graph.only_parent_shape(node).unwrap(),
            TensorShape::new(1, 3, 4, 4)
        );
    }

    #[test]
    fn test_dangling_parent_is_invalid() {
        let mut graph = NodeGraph::default();
        let relu = graph.push(Node::new("relu", "ReLU").with_parents([7]));
        let node = graph.node(relu).unwrap();
        assert!(matches!(
            graph.parent_shape(node, 0),
            Err(GraphError::InvalidGraph { .. })
        ));
        assert_eq!(graph.node_id("relu"), Some(relu));
        assert_eq!(graph.node_id("missing"), None);
    }
}
