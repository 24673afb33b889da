//! Passive metadata describing tasks and their dependency links.

/// Metadata record for one task in a graph.
///
/// A fresh node starts with an unset id; ids are assigned exactly once, when
/// the final task owning the graph runs its finalize pass, and follow a
/// valid topological order of the reachable subgraph. `level` is computed at
/// construction time from the parents known at that moment and never changes
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Unique within one finalized graph.
    pub id: usize,
    /// Tie-breaker among tasks of equal level; higher is dispatched first.
    pub priority: usize,
    /// One past the deepest parent level, zero for parentless tasks.
    pub level: usize,
    /// Auto-generated as `task<id>` at finalize time when left empty.
    pub name: String,
    /// Number of direct parents.
    pub parent_count: usize,
}

/// A dependency link between two nodes.
///
/// Edges are collected once, during the finalize pass, and are only used for
/// diagnostic graph export (see [`make_dot`](crate::make_dot)). The node
/// snapshots are taken after ids and default names have been assigned.
#[derive(Debug, Clone)]
pub struct Edge {
    pub child: Node,
    pub parent: Node,
}
