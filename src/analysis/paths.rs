//! Path queries over the block graph.
//!
//! Every walk uses an explicit work stack, so generated methods with thousands of blocks do
//! not exhaust the call stack.

use crate::{
    ir::{BlockId, Method},
    utils::BitSet,
};

/// Returns `true` if `end` is reachable from `start` following clean successors.
///
/// A block always reaches itself, and a block reaches every block it dominates.
#[must_use]
pub fn is_path_exists(method: &Method, start: BlockId, end: BlockId) -> bool {
    if start == end || method[end].is_dominated_by(start) {
        return true;
    }

    let mut visited = BitSet::new(method.block_count());
    let mut stack = vec![start];
    visited.insert(start.index());
    while let Some(block) = stack.pop() {
        for &succ in method[block].clean_successors() {
            if succ == end {
                return true;
            }
            if !visited.contains(succ.index()) {
                visited.insert(succ.index());
                stack.push(succ);
            }
        }
    }
    false
}

/// Blocks on any path from `start` to `end`, both included.
///
/// Walks predecessors backwards from `end` and stops at `start`.
#[must_use]
pub fn all_paths_blocks(method: &Method, start: BlockId, end: BlockId) -> BitSet {
    let mut set = BitSet::new(method.block_count());
    set.insert(start.index());
    if start == end {
        return set;
    }
    set.insert(end.index());

    let mut stack = vec![end];
    while let Some(block) = stack.pop() {
        for &pred in method[block].predecessors() {
            if !set.contains(pred.index()) {
                set.insert(pred.index());
                stack.push(pred);
            }
        }
    }
    set
}

/// Blocks reachable from `start` through clean successors while staying dominated by
/// `dominator`, in discovery order. `start` itself is not included.
#[must_use]
pub fn collect_blocks_dominated_by(
    method: &Method,
    dominator: BlockId,
    start: BlockId,
) -> Vec<BlockId> {
    let mut result = Vec::new();
    let mut visited = BitSet::new(method.block_count());
    visited.insert(start.index());

    let mut stack = vec![start];
    while let Some(block) = stack.pop() {
        for &succ in method[block].clean_successors().iter().rev() {
            if visited.contains(succ.index()) || !method[succ].is_dominated_by(dominator) {
                continue;
            }
            visited.insert(succ.index());
            result.push(succ);
            stack.push(succ);
        }
    }
    result
}

/// Blocks reachable from the enter block over all successors.
#[must_use]
pub fn reachable_blocks(method: &Method) -> BitSet {
    let mut reached = BitSet::new(method.block_count());
    let Some(enter) = method.enter_block() else {
        return reached;
    };

    reached.insert(enter.index());
    let mut stack = vec![enter];
    while let Some(block) = stack.pop() {
        for &succ in method[block].successors() {
            if !reached.contains(succ.index()) {
                reached.insert(succ.index());
                stack.push(succ);
            }
        }
    }
    reached
}
