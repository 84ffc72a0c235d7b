pub mod error;
pub mod graph;
pub mod graphviz;
pub mod kernel;
pub mod loader;
pub mod propagate;
pub mod registry;
pub mod shape_inference;

pub use error::GraphError;
pub use graph::{LayerParameters, Node, NodeGraph, NodeId, ParentRef, TensorShape};
pub use graphviz::graph_to_dot;
pub use kernel::{strided_output_size, KernelParameters, Rounding};
pub use loader::load_graph_from_path;
pub use propagate::{PropagationOptions, PropagationReport, ShapePropagator, UnknownShapePolicy};
pub use registry::ShapeRegistry;
pub use shape_inference::ShapeRule;
