use std::fmt::Write;

use crate::graph::NodeGraph;

pub fn graph_to_dot(graph: &NodeGraph) -> String {
    let mut dot = String::from("digraph caffe {\n");
    dot.push_str("  rankdir=TB;\n");
    dot.push_str("  node [fontname=\"Helvetica\"];\n");
    dot.push_str("  edge [fontname=\"Helvetica\"];\n\n");

    for (idx, node) in graph.nodes.iter().enumerate() {
        let fill = if node.output_shape.is_some() {
            "#d6f5d6"
        } else {
            "#f5d6d6"
        };
        let shape = node
            .output_shape
            .map(|shape| shape.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let label_lines = [
            format!("{} (#{})", node.name, idx),
            node.layer_type.clone(),
            shape,
        ];
        let label = escape_label(&label_lines.join("\n"));
        let _ = writeln!(
            dot,
            "  layer_{} [shape=box,style=\"rounded,filled\",fillcolor=\"{}\",label=\"{}\"];",
            idx, fill, label
        );
    }

    dot.push('\n');

    for (idx, node) in graph.nodes.iter().enumerate() {
        for parent in &node.parents {
            let _ = writeln!(
                dot,
                "  layer_{} -> layer_{} [label=\"out{}\"];",
                parent.node, idx, parent.output_index
            );
        }
    }

    dot.push_str("}\n");
    dot
}

fn escape_label(label: &str) -> String {
    label
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
