//! Graphviz export of finalized graphs.

use std::fmt::Write;

use crate::node::{Edge, Node};

fn label(node: &Node) -> String {
    format!(
        "\"{}\nid {} pri {} lev {} par {}\"",
        node.name.trim(),
        node.id,
        node.priority,
        node.level,
        node.parent_count,
    )
}

/// Renders edges as a dot-format digraph, one `parent -> child` line per
/// edge, for inspection with graphviz. Obtain the edges from
/// [`FinalTask::graph`](crate::FinalTask::graph).
pub fn make_dot(edges: &[Edge]) -> String {
    let mut dot = String::from("digraph {\n");
    for edge in edges {
        writeln!(dot, "{} -> {}", label(&edge.parent), label(&edge.child))
            .expect("writing to a string cannot fail");
    }
    dot.push_str("}\n");
    dot
}
