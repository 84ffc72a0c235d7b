//! Spatial geometry of convolution and pooling layers.

use crate::error::GraphError;
use crate::graph::{ConvolutionParameter, PoolRoundMode, PoolingParameter};

/// Rounding applied to the fractional output size of a sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Floor,
    Ceil,
}

impl Rounding {
    fn apply(self, value: f64) -> f64 {
        match self {
            Rounding::Floor => value.floor(),
            Rounding::Ceil => value.ceil(),
        }
    }
}

impl From<PoolRoundMode> for Rounding {
    fn from(mode: PoolRoundMode) -> Self {
        match mode {
            PoolRoundMode::Ceil => Rounding::Ceil,
            PoolRoundMode::Floor => Rounding::Floor,
        }
    }
}

/// Output size of one spatial axis of a strided kernel.
///
/// Computes `round((input + 2 * pad - kernel) / stride + 1)` in floating point.
/// Returns `None` for a zero stride or kernel, or when the kernel is larger
/// than the padded input, so every returned size is at least 1.
pub fn strided_output_size(
    input: u32,
    kernel: u32,
    stride: u32,
    pad: u32,
    rounding: Rounding,
) -> Option<u32> {
    if stride == 0 || kernel == 0 {
        return None;
    }
    let padded = u64::from(input) + 2 * u64::from(pad);
    if padded < u64::from(kernel) {
        return None;
    }
    let size = (padded - u64::from(kernel)) as f64 / f64::from(stride) + 1.0;
    let rounded = rounding.apply(size);
    if rounded > f64::from(u32::MAX) {
        return None;
    }
    Some(rounded as u32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelParameters {
    pub k_h: u32,
    pub k_w: u32,
    pub s_h: u32,
    pub s_w: u32,
    pub p_h: u32,
    pub p_w: u32,
}

impl KernelParameters {
    pub fn from_convolution(node: &str, param: &ConvolutionParameter) -> Result<Self, GraphError> {
        let geometry = Geometry {
            kernel: (param.kernel_h, param.kernel_w, param.kernel_size.as_slice()),
            stride: (param.stride_h, param.stride_w, param.stride.as_slice()),
            pad: (param.pad_h, param.pad_w, param.pad.as_slice()),
        };
        geometry.resolve(node)
    }

    /// Resolves pooling geometry. Global pooling spans the whole input plane,
    /// so the parent's `(height, width)` is needed in that case.
    pub fn from_pooling(
        node: &str,
        param: &PoolingParameter,
        input_hw: (u32, u32),
    ) -> Result<Self, GraphError> {
        if param.global_pooling {
            return Ok(Self {
                k_h: input_hw.0,
                k_w: input_hw.1,
                s_h: 1,
                s_w: 1,
                p_h: 0,
                p_w: 0,
            });
        }
        let geometry = Geometry {
            kernel: (param.kernel_h, param.kernel_w, param.kernel_size.as_slice()),
            stride: (param.stride_h, param.stride_w, param.stride.as_slice()),
            pad: (param.pad_h, param.pad_w, param.pad.as_slice()),
        };
        geometry.resolve(node)
    }

    /// Output `(height, width)` for an input plane of `(height, width)`.
    pub fn output_hw(&self, input_hw: (u32, u32), rounding: Rounding) -> Option<(u32, u32)> {
        let o_h = strided_output_size(input_hw.0, self.k_h, self.s_h, self.p_h, rounding)?;
        let o_w = strided_output_size(input_hw.1, self.k_w, self.s_w, self.p_w, rounding)?;
        Some((o_h, o_w))
    }
}

type AxisFields<'a> = (Option<u32>, Option<u32>, &'a [u32]);

struct Geometry<'a> {
    kernel: AxisFields<'a>,
    stride: AxisFields<'a>,
    pad: AxisFields<'a>,
}

impl Geometry<'_> {
    fn resolve(&self, node: &str) -> Result<KernelParameters, GraphError> {
        Ok(KernelParameters {
            k_h: axis_value(node, "kernel", self.kernel.0, self.kernel.2, 0, None)?,
            k_w: axis_value(node, "kernel", self.kernel.1, self.kernel.2, 1, None)?,
            s_h: axis_value(node, "stride", self.stride.0, self.stride.2, 0, Some(1))?,
            s_w: axis_value(node, "stride", self.stride.1, self.stride.2, 1, Some(1))?,
            p_h: axis_value(node, "pad", self.pad.0, self.pad.2, 0, Some(0))?,
            p_w: axis_value(node, "pad", self.pad.1, self.pad.2, 1, Some(0))?,
        })
    }
}

// Explicit per-axis value, then the repeated field, then the default.
fn axis_value(
    node: &str,
    field: &str,
    explicit: Option<u32>,
    repeated: &[u32],
    axis: usize,
    default: Option<u32>,
) -> Result<u32, GraphError> {
    if let Some(value) = explicit {
        return Ok(value);
    }
    match repeated {
        [] => default.ok_or_else(|| {
            GraphError::invalid_graph(node, format!("{} size is not declared", field))
        }),
        [value] => Ok(*value),
        values => values.get(axis).copied().ok_or_else(|| {
            GraphError::invalid_graph(
                node,
                format!("{} has {} values, none for axis {}", field, values.len(), axis),
            )
        }),
    }
}
