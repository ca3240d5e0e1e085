//! Dominator sets, immediate dominators, dominance frontiers and back-edge loop marking.
//!
//! # Theory
//!
//! A block `d` **dominates** a block `n` if every path from the enter block to `n` passes
//! through `d`. The **immediate dominator** of `n` is the strict dominator of `n` that is
//! dominated by every other strict dominator of `n`. The **dominance frontier** of `b` holds
//! the blocks where a path leaving the region dominated by `b` rejoins other control flow.
//!
//! # Algorithm
//!
//! Dominator sets are computed with the classic iterative dataflow formulation over dense
//! [`BitSet`]s:
//!
//! ```text
//! dom(enter) = {enter}
//! dom(b)     = {b} ∪ ⋂ dom(p) for p in preds(b)
//! ```
//!
//! Every set starts full and only shrinks, so the iteration converges without an explicit
//! cap. An edge `b -> s` whose target is already in `dom(b)` is a back edge and marks a loop.
//!
//! All results are a cache over the current graph. Any structural edit invalidates them and
//! [`crate::ir::Method::clear_blocks_state`] must run before the next computation.

use crate::{
    analysis::paths,
    ir::{BlockFlags, BlockId, InsnType, LoopInfo, Method},
    utils::BitSet,
    Error, Result,
};

/// Computes dominator sets and immediate dominators, and marks loops.
///
/// # Errors
///
/// Returns [`Error::UnreachableBlock`] if any block cannot be reached from the enter block,
/// and [`Error::NoImmediateDominator`] if the sets do not single out one immediate dominator.
pub fn compute_dominators(method: &mut Method) -> Result<()> {
    let Some(enter) = method.enter else {
        return Err(structural_error!("Method {} has no enter block", method.name()));
    };
    let count = method.block_count();

    let reached = paths::reachable_blocks(method);
    if let Some(block) = (0..count).find(|&i| !reached.contains(i)) {
        let block = BlockId::new(block);
        return Err(Error::UnreachableBlock {
            block,
            offset: method[block].start_offset(),
        });
    }

    let mut doms: Vec<BitSet> = vec![BitSet::full(count); count];
    doms[enter.index()] = BitSet::new(count);
    doms[enter.index()].insert(enter.index());

    let mut changed = true;
    while changed {
        changed = false;
        for block in method.blocks() {
            let id = block.id().index();
            if id == enter.index() {
                continue;
            }
            let mut dom = BitSet::full(count);
            for pred in block.predecessors() {
                dom.and(&doms[pred.index()]);
            }
            dom.insert(id);
            if dom != doms[id] {
                doms[id] = dom;
                changed = true;
            }
        }
    }

    for (block, dom) in method.blocks.iter_mut().zip(doms) {
        block.doms = Some(dom);
    }

    mark_loops(method);

    for block in &mut method.blocks {
        let id = block.id.index();
        if let Some(doms) = &mut block.doms {
            doms.remove(id);
        }
    }

    compute_immediate_dominators(method, enter)
}

/// Registers a loop descriptor on both ends of every back edge.
fn mark_loops(method: &mut Method) {
    let mut back_edges = Vec::new();
    for block in method.blocks() {
        for &succ in block.successors() {
            if block.is_dominated_by(succ) {
                back_edges.push(LoopInfo::new(succ, block.id()));
            }
        }
    }

    for info in back_edges {
        method[info.header].flags |= BlockFlags::LOOP_START;
        method[info.latch].flags |= BlockFlags::LOOP_END;
        method[info.header].loops.push(info);
        if info.latch != info.header {
            method[info.latch].loops.push(info);
        }
    }
}

fn compute_immediate_dominators(method: &mut Method, enter: BlockId) -> Result<()> {
    for index in 0..method.block_count() {
        let id = BlockId::new(index);
        if id == enter {
            continue;
        }

        let block = &method[id];
        let idom = if let [pred] = block.predecessors() {
            *pred
        } else {
            let Some(doms) = block.doms() else {
                return Err(structural_error!("Block {} has no dominator set", id));
            };
            let mut candidates = doms.clone();
            for dom in doms.iter() {
                if let Some(outer) = method.blocks[dom].doms() {
                    candidates.and_not(outer);
                }
            }
            match (candidates.cardinality(), candidates.first()) {
                (1, Some(first)) => BlockId::new(first),
                (count, _) => {
                    return Err(Error::NoImmediateDominator {
                        block: id,
                        candidates: count,
                    })
                }
            }
        };

        method[id].idom = Some(idom);
        method[idom].dominates_on.push(id);
    }
    Ok(())
}

/// Resets the exit list to the blocks ending in a RETURN and flags them.
pub fn mark_return_blocks(method: &mut Method) {
    method.exits.clear();
    for block in &mut method.blocks {
        if block.ends_with(InsnType::Return) {
            block.flags |= BlockFlags::RETURN;
            method.exits.push(block.id);
        }
    }
}

/// Computes the dominance frontier of every block.
///
/// Requires immediate dominators. Exit blocks get an empty frontier; every other block is
/// processed in post-order over the dominator tree so children are ready before parents.
pub fn compute_dominance_frontier(method: &mut Method) {
    let count = method.block_count();
    for block in &mut method.blocks {
        block.dom_frontier = None;
    }
    for &exit in &method.exits {
        method.blocks[exit.index()].dom_frontier = Some(BitSet::new(count));
    }

    let mut roots: Vec<BlockId> = method.enter.into_iter().collect();
    roots.extend((0..count).map(BlockId::new));

    for root in roots {
        let mut stack = vec![(root, false)];
        while let Some((block, expanded)) = stack.pop() {
            if method[block].dom_frontier.is_some() {
                continue;
            }
            if !expanded {
                stack.push((block, true));
                for &child in method[block].dominates_on().iter().rev() {
                    if method[child].dom_frontier.is_none() {
                        stack.push((child, false));
                    }
                }
                continue;
            }
            let frontier = block_frontier(method, block, count);
            method[block].dom_frontier = Some(frontier);
        }
    }
}

fn block_frontier(method: &Method, block: BlockId, count: usize) -> BitSet {
    let mut frontier = BitSet::new(count);
    for &succ in method[block].successors() {
        if method[succ].idom() != Some(block) {
            frontier.insert(succ.index());
        }
    }
    for &child in method[block].dominates_on() {
        let Some(child_frontier) = method[child].dom_frontier() else {
            continue;
        };
        for p in child_frontier {
            if method.blocks[p].idom() != Some(block) {
                frontier.insert(p);
            }
        }
    }
    frontier
}

/// Publishes one [`LoopInfo`] per back edge into the method's loop list.
pub fn register_loops(method: &mut Method) {
    let mut loops = Vec::new();
    for block in method.blocks() {
        if block.has(BlockFlags::LOOP_START) {
            loops.extend(block.loops().iter().filter(|l| l.header == block.id()).copied());
        }
    }
    method.loops = loops;
}

/// Recomputes every block's clean successors: successors minus handler entries, and minus
/// the loop header for blocks that close a loop.
pub fn update_clean_successors(method: &mut Method) {
    for index in 0..method.block_count() {
        let id = BlockId::new(index);
        let block = &method[id];
        let clean: Vec<BlockId> = block
            .successors()
            .iter()
            .copied()
            .filter(|&succ| !method[succ].is_handler_entry())
            .filter(|&succ| {
                !block
                    .loops()
                    .iter()
                    .any(|l| l.latch == id && l.header == succ)
            })
            .collect();
        method[id].clean_successors = clean;
    }
}
