//! DOT graph visualization for operator graphs.
//!
//! Generates Graphviz DOT format showing the data flow between nodes, with
//! one edge per use labeled by the value and its type.

use crate::ir::Graph;

/// Generate a DOT graph from an operator graph.
///
/// The graph shows:
/// - Each node labeled with its op kind and node name
/// - Graph inputs (green) and outputs (red)
/// - One edge per operand slot, labeled `%id: type`
///
/// Source-vocabulary nodes are filled so that unconverted nodes stand out
/// in a partially lowered graph.
///
/// # Example
///
/// ```ignore
/// let dot = to_dot(&graph);
/// std::fs::write("lowered.dot", dot)?;
/// // Render with: dot -Tpng lowered.dot -o lowered.png
/// ```
pub fn to_dot(graph: &Graph) -> String {
    let mut dot = String::new();
    dot.push_str("digraph operator_graph {\n");
    dot.push_str("  rankdir=TB;\n");
    dot.push_str("  node [shape=box, style=rounded];\n\n");

    for &input in graph.inputs() {
        let label = match graph.value(input) {
            Ok(value) => format!("{}\\n{}", value.name, value.ty),
            Err(_) => input.to_string(),
        };
        dot.push_str(&format!(
            "  value_{} [label=\"{}\", shape=ellipse, color=green];\n",
            input.index(),
            escape(&label)
        ));
    }

    for id in graph.topological_order() {
        let Ok(node) = graph.node(id) else { continue };
        let label = if node.name.is_empty() {
            format!("{} [#{}]", node.kind, id.index())
        } else {
            format!("{} [#{}]\\n{}", node.kind, id.index(), node.name)
        };
        let style = if node.kind.is_source() {
            ", style=\"rounded,filled\", fillcolor=lightgrey"
        } else {
            ""
        };
        dot.push_str(&format!(
            "  node_{} [label=\"{}\"{}];\n",
            id.index(),
            escape(&label),
            style
        ));

        for &input in node.inputs() {
            let source = match graph.producer(input) {
                Some(producer) => format!("node_{}", producer.index()),
                None => format!("value_{}", input.index()),
            };
            let edge_label = match graph.value_type(input) {
                Ok(ty) => format!("{}: {}", input, ty),
                Err(_) => input.to_string(),
            };
            dot.push_str(&format!(
                "  {} -> node_{} [label=\"{}\"];\n",
                source,
                id.index(),
                escape(&edge_label)
            ));
        }
    }

    for (idx, &output) in graph.outputs().iter().enumerate() {
        dot.push_str(&format!(
            "  output_{} [label=\"output {}\", shape=ellipse, color=red];\n",
            idx, idx
        ));
        let source = match graph.producer(output) {
            Some(producer) => format!("node_{}", producer.index()),
            None => format!("value_{}", output.index()),
        };
        dot.push_str(&format!("  {} -> output_{};\n", source, idx));
    }

    dot.push_str("}\n");
    dot
}

/// Escape double quotes for use inside a DOT label.
fn escape(label: &str) -> String {
    label.replace('"', "\\\"")
}
