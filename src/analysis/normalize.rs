//! Tree normalization: repairs block graph shapes the structuring pass cannot handle.
//!
//! Each round looks for one pathology, fixes it and restarts with fresh dominance data:
//!
//! 1. A loop header targeted by several back edges gets a synthetic block that collects all
//!    latches, leaving a single back edge.
//! 2. Every exit edge of a loop with several exits gets a synthetic block, unless its target
//!    already is one.
//! 3. In void methods, an exit block whose sole predecessor also dominates another exit's
//!    predecessor absorbs that exit.
//! 4. A lone exit block shared by several predecessors is duplicated, one copy per
//!    predecessor, when its returned value is defined on every incoming path.
//!
//! The loop ends at a fixed point or fails with [`Error::NonConvergence`] after
//! [`crate::pipeline::PipelineConfig::max_normalize_iterations`] rounds.

use crate::{
    analysis::dominance::{
        compute_dominance_frontier, compute_dominators, mark_return_blocks, register_loops,
        update_clean_successors,
    },
    ir::{BlockFlags, BlockId, LoopInfo, Method, Operand},
    pipeline::{EventKind, PassContext},
    Error, Result,
};

/// Computes dominance, normalizes the graph to a fixed point, then computes frontiers,
/// registers loops and derives clean successors.
///
/// # Errors
///
/// Propagates dominance errors from every round and returns [`Error::NonConvergence`] when the
/// iteration ceiling is exceeded.
pub fn process_blocks_tree(method: &mut Method, ctx: &PassContext<'_>) -> Result<()> {
    compute_dominators(method)?;
    mark_return_blocks(method);

    let max = ctx.config.max_normalize_iterations;
    let mut iterations = 0;
    while modify_blocks_tree(method, ctx)? {
        method.clear_blocks_state();
        compute_dominators(method)?;
        mark_return_blocks(method);

        iterations += 1;
        log::debug!(
            "{}: normalization round {} ({} blocks)",
            method.name(),
            iterations,
            method.block_count()
        );
        if iterations > max {
            return Err(Error::NonConvergence { iterations: max });
        }
    }

    compute_dominance_frontier(method);
    register_loops(method);
    update_clean_successors(method);
    for info in method.loops() {
        ctx.event(
            EventKind::LoopRegistered,
            method.name(),
            info.header.index(),
            format!("loop {} <- {}", info.header, info.latch),
        );
    }
    Ok(())
}

/// Applies the first applicable fix. Returns `true` if the graph changed.
fn modify_blocks_tree(method: &mut Method, ctx: &PassContext<'_>) -> Result<bool> {
    for index in 0..method.block_count() {
        let id = BlockId::new(index);
        if method[id].predecessors().is_empty() && method.enter_block() != Some(id) {
            return Err(Error::UnreachableBlock {
                block: id,
                offset: method[id].start_offset(),
            });
        }

        let headed: Vec<LoopInfo> = method[id]
            .loops()
            .iter()
            .filter(|l| l.header == id)
            .copied()
            .collect();

        if headed.len() > 1 {
            split_loop_header(method, id, &headed, ctx);
            return Ok(true);
        }

        if let [info] = headed.as_slice() {
            if isolate_loop_exits(method, info, ctx) {
                return Ok(true);
            }
        }
    }

    if ctx.config.merge_returns && merge_return(method, ctx) {
        return Ok(true);
    }
    if ctx.config.split_returns && split_return(method, ctx) {
        return Ok(true);
    }
    Ok(false)
}

/// Routes every back edge of `header` through one new synthetic block.
fn split_loop_header(
    method: &mut Method,
    header: BlockId,
    loops: &[LoopInfo],
    ctx: &PassContext<'_>,
) {
    let offset = method[header].start_offset();
    let collector = method.start_new_block(offset);
    method[collector].flags |= BlockFlags::SYNTHETIC;
    method.connect(collector, header);
    for info in loops {
        method.replace_connection(info.latch, header, collector);
    }

    ctx.event(
        EventKind::LoopHeaderSplit,
        method.name(),
        header.index(),
        format!("{} back edges into {} moved to {}", loops.len(), header, collector),
    );
}

/// Puts a synthetic block on each exit edge of a loop with several exits.
fn isolate_loop_exits(method: &mut Method, info: &LoopInfo, ctx: &PassContext<'_>) -> bool {
    let edges = info.exit_edges(method);
    if edges.len() <= 1 {
        return false;
    }

    let mut changed = false;
    for edge in edges {
        if method[edge.target].has(BlockFlags::SYNTHETIC) {
            continue;
        }
        let block = method.insert_block_between(edge.source, edge.target);
        ctx.event(
            EventKind::LoopExitIsolated,
            method.name(),
            block.index(),
            format!("{} -> {} -> {}", edge.source, block, edge.target),
        );
        changed = true;
    }
    changed
}

/// Merges two exit blocks of a void method.
///
/// Looks for an exit `E` with a single predecessor `P` and another exit `O` dominated by `P`
/// whose single predecessor differs from `P`; `O`'s predecessor is rerouted to `E`.
fn merge_return(method: &mut Method, ctx: &PassContext<'_>) -> bool {
    if method.exits.len() <= 1 || !method.return_type().is_void() {
        return false;
    }

    let mut found = None;
    'search: for &exit in &method.exits {
        let [pred] = method[exit].predecessors() else {
            continue;
        };
        for &other in &method.exits {
            if other == exit || !method[other].is_dominated_by(*pred) {
                continue;
            }
            if let [other_pred] = method[other].predecessors() {
                if other_pred != pred {
                    found = Some((exit, other, *other_pred));
                    break 'search;
                }
            }
        }
    }

    let Some((exit, other, other_pred)) = found else {
        return false;
    };
    method.replace_connection(other_pred, other, exit);
    ctx.event(
        EventKind::ReturnMerged,
        method.name(),
        exit.index(),
        format!("{other_pred} rerouted from {other} to {exit}"),
    );
    clean_exit_nodes(method);
    true
}

/// Duplicates a shared exit block once per predecessor.
fn split_return(method: &mut Method, ctx: &PassContext<'_>) -> bool {
    let &[exit] = method.exits.as_slice() else {
        return false;
    };
    let block = &method[exit];
    let [ret] = block.instructions() else {
        return false;
    };
    if block.predecessors().len() < 2
        || ret.attrs().catch.is_some()
        || block.has(BlockFlags::SYNTHETIC)
    {
        return false;
    }

    let preds = block.predecessors().to_vec();
    if let Some(Operand::Register(arg)) = ret.args().first() {
        if !is_return_arg_assigned(method, &preds, arg.reg()) {
            return false;
        }
    }

    let ret = ret.duplicate();
    let offset = block.start_offset();
    for &pred in &preds {
        let copy = method.start_new_block(offset);
        method[copy].flags |= BlockFlags::SYNTHETIC;
        method[copy].instructions.push(ret.duplicate());
        method.replace_connection(pred, exit, copy);
    }

    ctx.event(
        EventKind::ReturnSplit,
        method.name(),
        exit.index(),
        format!("{} split into {} blocks", exit, preds.len()),
    );
    clean_exit_nodes(method);
    true
}

/// The returned register is written in at least one predecessor, and every predecessor sees
/// a definition in itself, in one of its dominators, or as a method argument.
fn is_return_arg_assigned(method: &Method, preds: &[BlockId], reg: u16) -> bool {
    let defines = |block: BlockId| {
        method[block]
            .instructions()
            .iter()
            .any(|insn| insn.result().is_some_and(|r| r.reg() == reg))
    };

    if !preds.iter().any(|&p| defines(p)) {
        return false;
    }
    if method.arguments().iter().any(|a| a.reg() == reg) {
        return true;
    }
    preds.iter().all(|&pred| {
        defines(pred)
            || method[pred]
                .doms()
                .is_some_and(|doms| doms.iter().any(|d| defines(BlockId::new(d))))
    })
}

/// Drops exit blocks left without predecessors.
fn clean_exit_nodes(method: &mut Method) {
    let enter = method.enter_block();
    let dead: Vec<BlockId> = method
        .exits
        .iter()
        .copied()
        .filter(|&e| method[e].predecessors().is_empty() && Some(e) != enter)
        .collect();
    method.remove_blocks(&dead);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::blocks::build_blocks,
        ir::{ArgType, IfCond, InsnType, MethodBuilder},
        pipeline::{EventLog, PipelineConfig},
    };

    fn id(i: usize) -> BlockId {
        BlockId::new(i)
    }

    fn normalize(b: MethodBuilder, config: &PipelineConfig, events: &EventLog) -> Result<Method> {
        let mut method = b.build()?;
        build_blocks(&mut method)?;
        process_blocks_tree(&mut method, &PassContext::new(config, events))?;
        Ok(method)
    }

    #[test]
    fn test_three_back_edges_share_one_collector() {
        let mut b = MethodBuilder::new("three_latches", ArgType::Void);
        let r0 = b.reg(0);
        b.const_int(r0.clone(), 0);
        b.label("head");
        b.invoke_static("tick", vec![], None);
        b.if_zero(IfCond::Eq, r0.clone(), "done");
        b.if_zero(IfCond::Lt, r0.clone(), "a");
        b.if_zero(IfCond::Gt, r0, "b");
        b.goto("head");
        b.label("a");
        b.invoke_static("x", vec![], None);
        b.goto("head");
        b.label("b");
        b.invoke_static("y", vec![], None);
        b.goto("head");
        b.label("done");
        b.ret(None);

        let events = EventLog::new();
        let method = normalize(b, &PipelineConfig::default(), &events).unwrap();

        assert_eq!(method.block_count(), 10);
        let collector = id(9);
        assert!(method[collector].has(BlockFlags::SYNTHETIC));
        assert_eq!(method[collector].predecessors(), &[id(5), id(6), id(7)]);
        assert_eq!(method[id(1)].predecessors(), &[id(0), collector]);
        assert_eq!(method.loops(), &[LoopInfo::new(id(1), collector)]);
        assert_eq!(
            method[id(1)].loops().iter().filter(|l| l.header == id(1)).count(),
            1
        );
        assert_eq!(events.count_kind(EventKind::LoopHeaderSplit), 1);
        assert!(method.validate_edges().is_ok());
    }

    #[test]
    fn test_loop_exit_edges_isolated() {
        let mut b = MethodBuilder::new("two_exits", ArgType::Int);
        let r0 = b.reg(0);
        b.const_int(r0.clone(), 0);
        b.label("head");
        b.if_zero(IfCond::Eq, r0.clone(), "out1");
        b.if_zero(IfCond::Lt, r0.clone(), "out2");
        b.invoke_static("tick", vec![], None);
        b.goto("head");
        b.label("out1");
        b.ret(Some(r0.clone().into()));
        b.label("out2");
        b.ret(Some(r0.into()));

        let events = EventLog::new();
        let method = normalize(b, &PipelineConfig::default(), &events).unwrap();

        assert_eq!(method.block_count(), 8);
        assert_eq!(method[id(1)].successors(), &[id(2), id(6)]);
        assert_eq!(method[id(2)].successors(), &[id(3), id(7)]);
        assert_eq!(method[id(6)].successors(), &[id(4)]);
        assert_eq!(method[id(7)].successors(), &[id(5)]);
        assert!(method[id(6)].has(BlockFlags::SYNTHETIC));
        assert_eq!(method[id(6)].start_offset(), Some(5));
        assert_eq!(events.count_kind(EventKind::LoopExitIsolated), 2);

        let info = method.loops()[0];
        assert!(info
            .exit_edges(&method)
            .iter()
            .all(|e| method[e.target].has(BlockFlags::SYNTHETIC)));
    }

    fn two_void_returns() -> MethodBuilder {
        let mut b = MethodBuilder::new("two_returns", ArgType::Void);
        let r0 = b.reg(0);
        b.if_zero(IfCond::Eq, r0, "p1");
        b.ret(None);
        b.label("p1");
        b.invoke_static("work", vec![], None);
        b.ret(None);
        b
    }

    #[test]
    fn test_void_returns_merged() {
        let events = EventLog::new();
        let method = normalize(two_void_returns(), &PipelineConfig::default(), &events).unwrap();

        assert_eq!(method.exit_blocks().len(), 1);
        let exit = method.exit_blocks()[0];
        assert_eq!(method[exit].predecessors().len(), 2);
        assert!(method[exit].ends_with(InsnType::Return));
        assert!(events.has(EventKind::ReturnMerged));
        assert!(method.validate_edges().is_ok());
    }

    #[test]
    fn test_void_returns_kept_without_merge() {
        let events = EventLog::new();
        let method = normalize(two_void_returns(), &PipelineConfig::minimal(), &events).unwrap();
        assert_eq!(method.exit_blocks().len(), 2);
        assert!(!events.has(EventKind::ReturnMerged));
    }

    fn shared_return(ret_reg: u16) -> MethodBuilder {
        let mut b = MethodBuilder::new("shared_return", ArgType::Int);
        let r1 = b.argument(1, ArgType::Int);
        let r0 = b.reg(0);
        b.if_zero(IfCond::Eq, r1, "else");
        b.const_int(r0.clone(), 1);
        b.goto("end");
        b.label("else");
        b.const_int(r0, 2);
        b.label("end");
        b.ret(Some(Operand::reg(ret_reg)));
        b
    }

    #[test]
    fn test_shared_return_split() {
        let events = EventLog::new();
        let method = normalize(shared_return(0), &PipelineConfig::default(), &events).unwrap();

        assert_eq!(method.block_count(), 5);
        assert_eq!(method.exit_blocks().len(), 2);
        for &exit in method.exit_blocks() {
            let block = &method[exit];
            assert!(block.has(BlockFlags::SYNTHETIC));
            assert_eq!(block.predecessors().len(), 1);
            assert_eq!(block.instructions().len(), 1);
            assert_eq!(block.instructions()[0].offset(), None);
            assert_eq!(block.start_offset(), Some(4));
        }
        assert_eq!(events.count_kind(EventKind::ReturnSplit), 1);
    }

    #[test]
    fn test_shared_return_kept_when_value_undefined() {
        let events = EventLog::new();
        let method = normalize(shared_return(5), &PipelineConfig::default(), &events).unwrap();

        assert_eq!(method.exit_blocks().len(), 1);
        assert_eq!(method[method.exit_blocks()[0]].predecessors().len(), 2);
        assert!(!events.has(EventKind::ReturnSplit));
    }

    #[test]
    fn test_non_convergence() {
        let config = PipelineConfig {
            max_normalize_iterations: 0,
            ..PipelineConfig::default()
        };
        let events = EventLog::new();
        let err = normalize(two_void_returns(), &config, &events).unwrap_err();
        assert_eq!(err, Error::NonConvergence { iterations: 0 });
    }
}
