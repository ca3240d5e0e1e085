//! Loop descriptors derived from back edges.

use crate::{
    analysis::paths,
    ir::{BlockId, Method},
    utils::BitSet,
};

/// A directed edge of the block graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    /// Block the edge leaves
    pub source: BlockId,
    /// Block the edge enters
    pub target: BlockId,
}

/// One back edge: `latch -> header`, where `header` dominates `latch`.
///
/// A header with several descriptors is a transient state that only exists between a
/// dominance run and the next normalization step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopInfo {
    /// Target of the back edge
    pub header: BlockId,
    /// Source of the back edge
    pub latch: BlockId,
}

impl LoopInfo {
    /// Creates a descriptor for the back edge `latch -> header`.
    #[must_use]
    pub fn new(header: BlockId, latch: BlockId) -> Self {
        LoopInfo { header, latch }
    }

    /// Blocks on any path from the header to the latch, both included.
    #[must_use]
    pub fn body(&self, method: &Method) -> BitSet {
        paths::all_paths_blocks(method, self.header, self.latch)
    }

    /// Edges leaving the loop body, excluding edges into exception handlers.
    #[must_use]
    pub fn exit_edges(&self, method: &Method) -> Vec<Edge> {
        let body = self.body(method);
        let mut edges = Vec::new();
        for source in body.iter().map(BlockId::new) {
            for &target in method[source].successors() {
                if !body.contains(target.index()) && !method[target].is_handler_entry() {
                    edges.push(Edge { source, target });
                }
            }
        }
        edges
    }
}
