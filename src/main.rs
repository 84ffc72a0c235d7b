use std::path::PathBuf;

use caffe_shape::{
    graph_to_dot, load_graph_from_path, GraphError, PropagationOptions, ShapePropagator,
    ShapeRegistry, TensorShape, UnknownShapePolicy,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Infer output shapes of Caffe layer graphs", long_about = None)]
struct Cli {
    /// Path to a JSON file listing the graph's layers, parents first.
    graph: PathBuf,
    /// Explicit output shape for a data layer, as `NAME=N,C,H,W`.
    #[arg(long = "input-shape", value_parser = parse_input_shape)]
    input_shapes: Vec<(String, TensorShape)>,
    /// Fail instead of skipping data layers whose shape is unknown.
    #[arg(long)]
    abort_on_unknown: bool,
    /// Optional path to write a Graphviz DOT export of the shaped graph.
    #[arg(long)]
    export_dot: Option<PathBuf>,
    /// Print the shaped layers as JSON.
    #[arg(long)]
    json: bool,
}

fn parse_input_shape(value: &str) -> Result<(String, TensorShape), String> {
    let (name, dims) = value
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=N,C,H,W, got `{}`", value))?;
    let dims = dims
        .split(',')
        .map(|dim| dim.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| format!("invalid dimension in `{}`: {}", value, err))?;
    match dims.as_slice() {
        &[n, c, h, w] => Ok((name.to_string(), TensorShape::new(n, c, h, w))),
        _ => Err(format!("expected 4 dimensions, got {}", dims.len())),
    }
}

fn run() -> Result<(), GraphError> {
    let cli = Cli::parse();
    let mut graph = load_graph_from_path(&cli.graph)?;

    for (name, shape) in &cli.input_shapes {
        let node = graph
            .node_id(name)
            .and_then(|id| graph.node_mut(id))
            .ok_or_else(|| GraphError::InvalidGraph {
                node: name.clone(),
                reason: "no layer with this name for --input-shape".to_string(),
            })?;
        node.output_shape = Some(*shape);
    }

    let options = PropagationOptions {
        on_unknown_shape: if cli.abort_on_unknown {
            UnknownShapePolicy::Abort
        } else {
            UnknownShapePolicy::Skip
        },
    };
    let registry = ShapeRegistry::with_defaults();
    let report = ShapePropagator::new(&registry, options).propagate(&mut graph)?;

    if cli.json {
        let shaped: serde_json::Map<String, serde_json::Value> = graph
            .nodes
            .iter()
            .filter_map(|node| {
                let shape = node.output_shape?;
                Some((node.name.clone(), serde_json::json!(shape)))
            })
            .collect();
        println!("{:#}", serde_json::Value::Object(shaped));
    } else {
        println!(
            "Inferred shapes for {} of {} layers in `{}`.",
            report.shaped.len(),
            graph.nodes.len(),
            cli.graph.display()
        );
        for (id, shape) in &report.shaped {
            if let Some(node) = graph.node(*id) {
                println!("  - {} ({}): {}", node.name, node.layer_type, shape);
            }
        }
    }

    for id in &report.unknown_roots {
        if let Some(node) = graph.node(*id) {
            eprintln!(
                "warning: shape of data layer `{}` is unknown; pass --input-shape {}=N,C,H,W \
                 or declare an `Input` layer with an explicit shape",
                node.name, node.name
            );
        }
    }
    let downstream = report.unknown.len() - report.unknown_roots.len();
    if downstream > 0 {
        eprintln!("warning: {} dependent layers were left unshaped", downstream);
    }

    if let Some(dot_path) = cli.export_dot {
        let dot = graph_to_dot(&graph);
        std::fs::write(&dot_path, dot).map_err(|err| GraphError::export(dot_path.clone(), err))?;
        println!("Exported Graphviz DOT to `{}`.", dot_path.display());
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("CAFFE_SHAPE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}
