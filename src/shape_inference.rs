/// Output shape inference for Caffe layers
use crate::error::GraphError;
use crate::graph::{ConcatParameter, Node, NodeGraph, TensorShape};
use crate::kernel::{KernelParameters, Rounding};

/// Shape rule applied to a layer, selected by its layer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeRule {
    Identity,
    Scalar,
    Data,
    MemoryData,
    Concat,
    Convolution,
    Pooling,
    InnerProduct,
    NotImplemented,
}

impl ShapeRule {
    /// Computes the output shape of `node`. Every parent of `node` must
    /// already carry its output shape in `graph`.
    pub fn infer(self, graph: &NodeGraph, node: &Node) -> Result<TensorShape, GraphError> {
        match self {
            ShapeRule::Identity => infer_identity_shape(graph, node),
            ShapeRule::Scalar => Ok(infer_scalar_shape()),
            ShapeRule::Data => infer_data_shape(node),
            ShapeRule::MemoryData => infer_memory_data_shape(node),
            ShapeRule::Concat => infer_concat_shape(graph, node),
            ShapeRule::Convolution => infer_convolution_shape(graph, node),
            ShapeRule::Pooling => infer_pooling_shape(graph, node),
            ShapeRule::InnerProduct => infer_inner_product_shape(graph, node),
            ShapeRule::NotImplemented => Err(GraphError::NotSupported {
                node: node.name.clone(),
                layer_type: node.layer_type.clone(),
            }),
        }
    }
}

/// Shape of the first parent, unchanged.
pub fn infer_identity_shape(graph: &NodeGraph, node: &Node) -> Result<TensorShape, GraphError> {
    if node.parents.is_empty() {
        return Err(GraphError::invalid_graph(
            &node.name,
            "identity layer has no parents",
        ));
    }
    graph.parent_shape(node, 0)
}

/// Losses and accuracies produce a single value.
pub fn infer_scalar_shape() -> TensorShape {
    TensorShape::new(1, 1, 1, 1)
}

/// Infer output shape for data and input layers
///
/// An explicit shape already attached to the node (old-style `input_dim`
/// declaration) wins, then the first `input_param` blob shape. Layers backed by
/// an external source (LMDB, HDF5, image lists) have no static shape and yield
/// `ShapeUnknown`.
pub fn infer_data_shape(node: &Node) -> Result<TensorShape, GraphError> {
    if let Some(shape) = node.output_shape {
        return Ok(shape);
    }
    let declared = node
        .parameters
        .input_param
        .as_ref()
        .and_then(|param| param.shape.first());
    let Some(blob) = declared else {
        return Err(GraphError::ShapeUnknown {
            node: node.name.clone(),
        });
    };
    match blob.dim.as_slice() {
        &[n, c, h, w] => Ok(TensorShape::new(n, c, h, w)),
        dims => Err(GraphError::invalid_graph(
            &node.name,
            format!(
                "input shape must have {} dimensions, got {:?}",
                TensorShape::RANK,
                dims
            ),
        )),
    }
}

pub fn infer_memory_data_shape(node: &Node) -> Result<TensorShape, GraphError> {
    let param = node.parameters.memory_data_param.ok_or_else(|| {
        GraphError::invalid_graph(&node.name, "memory data layer is missing memory_data_param")
    })?;
    Ok(TensorShape::new(
        param.batch_size,
        param.channels,
        param.height,
        param.width,
    ))
}

/// Infer output shape for concat layers
///
/// The concat axis is the sum over all parents; every other dimension must
/// match the first parent.
pub fn infer_concat_shape(graph: &NodeGraph, node: &Node) -> Result<TensorShape, GraphError> {
    if node.parents.is_empty() {
        return Err(GraphError::invalid_graph(
            &node.name,
            "concat layer has no parents",
        ));
    }
    let requested = node
        .parameters
        .concat_param
        .as_ref()
        .map(|param| param.resolved_axis())
        .unwrap_or(ConcatParameter::DEFAULT_AXIS);
    let axis = normalize_axis(requested).ok_or_else(|| {
        GraphError::invalid_graph(
            &node.name,
            format!(
                "concat axis {} out of bounds for rank {}",
                requested,
                TensorShape::RANK
            ),
        )
    })?;

    let parent_shapes = graph.parent_shapes(node)?;
    let first = parent_shapes[0].dims();
    let mut output = first;
    for (parent_idx, shape) in parent_shapes.iter().enumerate().skip(1) {
        let dims = shape.dims();
        for dim_idx in 0..TensorShape::RANK {
            if dim_idx == axis {
                continue;
            }
            if dims[dim_idx] != first[dim_idx] {
                return Err(GraphError::invalid_graph(
                    &node.name,
                    format!(
                        "concat input {} dimension {} is {} but expected {} (all non-concat dimensions must match)",
                        parent_idx, dim_idx, dims[dim_idx], first[dim_idx]
                    ),
                ));
            }
        }
        output[axis] = output[axis].checked_add(dims[axis]).ok_or_else(|| {
            GraphError::invalid_graph(&node.name, "concat axis size overflows")
        })?;
    }

    Ok(TensorShape::from(output))
}

fn normalize_axis(axis: i32) -> Option<usize> {
    let rank = TensorShape::RANK as i32;
    let normalized = if axis < 0 { axis + rank } else { axis };
    (0..rank).contains(&normalized).then_some(normalized as usize)
}

/// Infer output shape for convolution layers
///
/// Spatial sizes round down. The channel count is `num_output` when declared,
/// otherwise the parent's.
pub fn infer_convolution_shape(graph: &NodeGraph, node: &Node) -> Result<TensorShape, GraphError> {
    let input = graph.only_parent_shape(node)?;
    let param = node.parameters.convolution_param.as_ref().ok_or_else(|| {
        GraphError::invalid_graph(&node.name, "convolution layer is missing convolution_param")
    })?;
    let kernel = KernelParameters::from_convolution(&node.name, param)?;
    strided_kernel_shape(node, input, &kernel, Rounding::Floor, param.num_output)
}

/// Infer output shape for pooling layers
///
/// Same rule as convolution, but spatial sizes round up by default since a
/// pooling window may hang over the padded border.
pub fn infer_pooling_shape(graph: &NodeGraph, node: &Node) -> Result<TensorShape, GraphError> {
    let input = graph.only_parent_shape(node)?;
    let param = node.parameters.pooling_param.as_ref().ok_or_else(|| {
        GraphError::invalid_graph(&node.name, "pooling layer is missing pooling_param")
    })?;
    let kernel = KernelParameters::from_pooling(&node.name, param, (input.height, input.width))?;
    strided_kernel_shape(node, input, &kernel, param.round_mode.into(), None)
}

fn strided_kernel_shape(
    node: &Node,
    input: TensorShape,
    kernel: &KernelParameters,
    rounding: Rounding,
    num_output: Option<u32>,
) -> Result<TensorShape, GraphError> {
    let (o_h, o_w) = kernel
        .output_hw((input.height, input.width), rounding)
        .ok_or_else(|| {
            GraphError::invalid_graph(
                &node.name,
                format!(
                    "kernel {}x{} (stride {}x{}, pad {}x{}) does not fit input {}x{}",
                    kernel.k_h,
                    kernel.k_w,
                    kernel.s_h,
                    kernel.s_w,
                    kernel.p_h,
                    kernel.p_w,
                    input.height,
                    input.width
                ),
            )
        })?;
    let channels = num_output.unwrap_or(input.channels);
    Ok(TensorShape::new(input.batch_size, channels, o_h, o_w))
}

/// Fully connected layers collapse to `(batch, num_output, 1, 1)`.
pub fn infer_inner_product_shape(
    graph: &NodeGraph,
    node: &Node,
) -> Result<TensorShape, GraphError> {
    let input = graph.only_parent_shape(node)?;
    let num_output = node
        .parameters
        .inner_product_param
        .as_ref()
        .and_then(|param| param.num_output)
        .ok_or_else(|| {
            GraphError::invalid_graph(&node.name, "inner product layer does not declare num_output")
        })?;
    Ok(TensorShape::new(input.batch_size, num_output, 1, 1))
}
