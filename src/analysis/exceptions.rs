//! Exception wiring: binds handlers to blocks once the graph is stable.
//!
//! Runs after normalization, on a graph with valid dominance data:
//!
//! 1. Handler entries (blocks whose first instruction carries a handler marker) are bound to
//!    their handler; a leading MOVE_EXCEPTION gets the catch type and a variable name.
//! 2. Each handler owns its entry and every block the entry dominates along clean successors.
//!    MONITOR_EXIT instructions at the start of owned blocks are stripped, and a protected
//!    THROW inside an owned block folds its region into the handler's own region.
//! 3. Blocks whose instructions all share one region record it, and that region's handlers
//!    are bound to their entry blocks.
//! 4. Catch-all handlers that only rethrow are removed.

use crate::{
    analysis::{dominance::update_clean_successors, paths},
    ir::{
        ArgType, BlockId, HandlerId, InsnKind, InsnType, Method, MethodDiagnostic, TryBlockId,
    },
    pipeline::{EventKind, PassContext},
    DiagnosticKind, Result,
};

/// Runs every exception wiring step in order.
///
/// # Errors
///
/// Returns [`crate::Error::Structural`] when a handler marker disagrees with its handler's
/// offset or references an unknown handler or region.
pub fn process_exceptions(method: &mut Method, ctx: &PassContext<'_>) -> Result<()> {
    mark_exception_handlers(method, ctx)?;
    update_clean_successors(method);
    process_exception_handlers(method, ctx)?;
    process_try_catch_blocks(method, ctx)?;
    if ctx.config.remove_dead_rethrows {
        remove_dead_rethrows(method, ctx);
        update_clean_successors(method);
    }
    Ok(())
}

/// Binds every marked handler entry block to its handler and types the caught value.
///
/// # Errors
///
/// Returns [`crate::Error::Structural`] if the marker references an unknown handler or the
/// marked instruction does not sit at the handler's offset.
pub fn mark_exception_handlers(method: &mut Method, ctx: &PassContext<'_>) -> Result<()> {
    for index in 0..method.block_count() {
        let id = BlockId::new(index);
        let Some(first) = method[id].instructions().first() else {
            continue;
        };
        let Some(handler_id) = first.attrs().handler else {
            continue;
        };
        let offset = first.offset();
        let is_move = matches!(first.kind(), InsnKind::MoveException);

        let handler = method
            .handler(handler_id)
            .ok_or_else(|| structural_error!("Unknown handler {}", handler_id))?;
        if offset != Some(handler.handle_offset()) {
            return Err(structural_error!(
                "Handler {} starts at {:#x} but its marker sits at {:?}",
                handler_id,
                handler.handle_offset(),
                offset
            ));
        }
        let (ty, name) = match handler.catch_type() {
            None => (ArgType::throwable(), "th"),
            Some(class) => (ArgType::object(class), "e"),
        };

        let mut arg = None;
        if is_move {
            if let Some(result) = method[id].instructions[0].result_mut() {
                result.set_type(ty);
                result.set_name(name);
                arg = Some(result.clone());
            }
        }

        let handler = &mut method.handlers[handler_id.index()];
        handler.arg = arg;
        handler.handle_block = Some(id);
        method[id].handler = Some(handler_id);

        ctx.event(
            EventKind::HandlerBound,
            method.name(),
            index,
            format!("{handler_id} bound to {id}"),
        );
    }
    Ok(())
}

/// Collects handler blocks, strips monitor exits and merges rethrow chains.
///
/// # Errors
///
/// Returns [`crate::Error::Structural`] if a region referenced by a THROW does not exist.
pub fn process_exception_handlers(method: &mut Method, ctx: &PassContext<'_>) -> Result<()> {
    for index in 0..method.block_count() {
        let entry = BlockId::new(index);
        let Some(handler_id) = method[entry].handler() else {
            continue;
        };

        let mut owned = vec![entry];
        owned.extend(paths::collect_blocks_dominated_by(method, entry, entry));
        method.handlers[handler_id.index()].blocks = owned.clone();

        for &block in &owned {
            strip_monitor_exits(method, block, ctx);

            let throws: Vec<(usize, TryBlockId)> = method[block]
                .instructions()
                .iter()
                .enumerate()
                .filter(|(_, insn)| insn.insn_type() == InsnType::Throw)
                .filter_map(|(pos, insn)| insn.attrs().catch.map(|c| (pos, c)))
                .collect();

            for (pos, catch) in throws {
                let into = method.handlers[handler_id.index()].try_block;
                if catch == into {
                    continue;
                }
                merge_try_blocks(method, into, catch)?;
                method[block].instructions[pos].attrs_mut().catch = None;
                ctx.event(
                    EventKind::TryBlocksMerged,
                    method.name(),
                    block.index(),
                    format!("{catch} merged into {into}"),
                );
            }
        }
    }
    Ok(())
}

/// Removes MONITOR_EXIT instructions up to the first MONITOR_ENTER of `block`.
fn strip_monitor_exits(method: &mut Method, block: BlockId, ctx: &PassContext<'_>) {
    let limit = method[block]
        .instructions()
        .iter()
        .position(|insn| insn.insn_type() == InsnType::MonitorEnter)
        .unwrap_or(method[block].instructions().len());

    let before = method[block].instructions().len();
    let mut position = 0;
    method[block].instructions.retain(|insn| {
        let keep = position >= limit || insn.insn_type() != InsnType::MonitorExit;
        position += 1;
        keep
    });

    let removed = before - method[block].instructions().len();
    if removed > 0 {
        ctx.event(
            EventKind::MonitorExitRemoved,
            method.name(),
            block.index(),
            format!("{removed} monitor exit(s) removed from {block}"),
        );
    }
}

/// Folds region `from` into region `into`.
///
/// Handlers of `from` move to `into`, and every block and instruction protected by `from` is
/// re-pointed. `from` stays in the arena as a forwarding entry.
///
/// # Errors
///
/// Returns [`crate::Error::Structural`] if either region does not exist.
pub fn merge_try_blocks(method: &mut Method, into: TryBlockId, from: TryBlockId) -> Result<()> {
    let mut from = from;
    while let Some(next) = method.try_block(from).and_then(|t| t.merged_into()) {
        from = next;
    }
    if from == into {
        return Ok(());
    }
    if method.try_block(into).is_none() {
        return Err(structural_error!("Unknown try block {}", into));
    }

    let moved = match method.try_blocks.get_mut(from.index()) {
        Some(region) => {
            region.merged_into = Some(into);
            std::mem::take(&mut region.handlers)
        }
        None => return Err(structural_error!("Unknown try block {}", from)),
    };
    for handler in moved {
        let region = &mut method.try_blocks[into.index()];
        if !region.handlers.contains(&handler) {
            region.handlers.push(handler);
        }
        method.handlers[handler.index()].try_block = into;
    }

    for block in &mut method.blocks {
        if block.catch == Some(from) {
            block.catch = Some(into);
        }
        for insn in &mut block.instructions {
            if insn.attrs().catch == Some(from) {
                insn.attrs_mut().catch = Some(into);
            }
        }
    }
    Ok(())
}

/// Marks blocks whose instructions share one region and binds that region's handlers.
///
/// # Errors
///
/// Returns [`crate::Error::Structural`] if an instruction references an unknown region.
pub fn process_try_catch_blocks(method: &mut Method, ctx: &PassContext<'_>) -> Result<()> {
    for index in 0..method.block_count() {
        let id = BlockId::new(index);
        let mut common = None;
        let mut mixed = false;
        for insn in method[id].instructions() {
            let Some(catch) = insn.attrs().catch else {
                continue;
            };
            match common {
                None => common = Some(catch),
                Some(seen) if seen != catch => {
                    mixed = true;
                    break;
                }
                Some(_) => {}
            }
        }
        let Some(catch) = common.filter(|_| !mixed) else {
            continue;
        };

        method[id].catch = Some(catch);
        let handlers = method
            .try_block(catch)
            .map(|t| t.handlers().to_vec())
            .ok_or_else(|| structural_error!("Unknown try block {}", catch))?;
        for handler in handlers {
            connect_handler(method, handler, ctx);
        }
    }
    Ok(())
}

/// Binds `handler` to the handler entry block starting at its offset, unless already bound.
fn connect_handler(method: &mut Method, handler: HandlerId, ctx: &PassContext<'_>) {
    let Some(info) = method.handler(handler) else {
        return;
    };
    if info.handle_block().is_some() {
        return;
    }
    let offset = info.handle_offset();

    let entry = method.blocks().iter().find_map(|block| {
        let bound = block.handler()?;
        (method.handler(bound)?.handle_offset() == offset).then_some(block.id())
    });
    if let Some(entry) = entry {
        method.handlers[handler.index()].handle_block = Some(entry);
        ctx.event(
            EventKind::HandlerBound,
            method.name(),
            entry.index(),
            format!("{handler} bound to {entry} by offset {offset:#x}"),
        );
    }
}

/// Removes catch-all handlers whose only behavior is rethrowing the caught exception.
///
/// A trailing THROW is popped from every block of a catch-all handler. Other content left in
/// such a block is dropped and reported as [`DiagnosticKind::UnsupportedShape`]. An unused
/// leading MOVE_EXCEPTION is removed for every handler. A handler left without instructions,
/// whose blocks never lead outside the handler and that rethrew, is removed from its region.
pub fn remove_dead_rethrows(method: &mut Method, ctx: &PassContext<'_>) {
    for index in 0..method.block_count() {
        let entry = BlockId::new(index);
        let Some(handler_id) = method[entry].handler() else {
            continue;
        };
        let handler = &method.handlers[handler_id.index()];
        if handler.removed {
            continue;
        }
        let catch_all = handler.is_catch_all();
        let owned = handler.blocks.clone();

        let mut no_exit = true;
        let mut rethrow = false;
        for &block in &owned {
            if no_exit {
                no_exit = method[block]
                    .clean_successors()
                    .iter()
                    .all(|succ| owned.contains(succ));
            }
            if catch_all && method[block].ends_with(InsnType::Throw) {
                rethrow = true;
                method[block].instructions.pop();
                drop_finally_content(method, entry, block, ctx);
            }
        }

        let unused_move = method[entry].instructions().first().is_some_and(|insn| {
            matches!(insn.kind(), InsnKind::MoveException)
                && insn.result().is_some_and(|r| method.use_count(r.var()) == 0)
        });
        if unused_move {
            method[entry].instructions.remove(0);
            ctx.event(
                EventKind::InstructionRemoved,
                method.name(),
                entry.index(),
                format!("unused move-exception in {entry}"),
            );
        }

        let total: usize = owned
            .iter()
            .map(|&b| method[b].instructions().len())
            .sum();
        if total == 0 && no_exit && rethrow {
            remove_handler(method, handler_id);
            ctx.event(
                EventKind::HandlerRemoved,
                method.name(),
                entry.index(),
                format!("dead rethrow handler {handler_id} removed"),
            );
        }
    }
}

/// Drops what is left of a rethrowing block except a leading MOVE_EXCEPTION in the entry.
fn drop_finally_content(method: &mut Method, entry: BlockId, block: BlockId, ctx: &PassContext<'_>) {
    let insns = method[block].instructions();
    let keep = usize::from(
        block == entry
            && insns
                .first()
                .is_some_and(|i| matches!(i.kind(), InsnKind::MoveException)),
    );
    let dropped = insns.len().saturating_sub(keep);
    if dropped == 0 {
        return;
    }

    let offset = insns.get(keep).and_then(|i| i.offset());
    method[block].instructions.truncate(keep);

    let message = format!("finally content in {block} not extracted, {dropped} instruction(s) dropped");
    log::warn!("{}: {}", method.name(), message);
    ctx.event(EventKind::UnsupportedShape, method.name(), block.index(), message.clone());
    method.add_diagnostic(MethodDiagnostic {
        kind: DiagnosticKind::UnsupportedShape,
        message,
        block: Some(block),
        offset,
    });
}

/// Detaches `handler` from its region. A region left without handlers stops protecting its
/// instructions.
pub fn remove_handler(method: &mut Method, handler: HandlerId) {
    let Some(info) = method.handlers.get_mut(handler.index()) else {
        return;
    };
    info.removed = true;
    let region = info.try_block;
    let entry = info.handle_block;

    if let Some(entry) = entry {
        if method[entry].handler == Some(handler) {
            method[entry].handler = None;
        }
    }

    let Some(try_block) = method.try_blocks.get_mut(region.index()) else {
        return;
    };
    try_block.handlers.retain(|&h| h != handler);
    if !try_block.handlers.is_empty() {
        return;
    }

    for block in &mut method.blocks {
        if block.catch == Some(region) {
            block.catch = None;
        }
        for insn in &mut block.instructions {
            if insn.attrs().catch == Some(region) {
                insn.attrs_mut().catch = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{blocks::build_blocks, normalize::process_blocks_tree},
        ir::{MethodBuilder, Operand},
        pipeline::{EventLog, PipelineConfig},
        Error,
    };

    fn id(i: usize) -> BlockId {
        BlockId::new(i)
    }

    fn prepare(b: MethodBuilder, config: &PipelineConfig, events: &EventLog) -> Method {
        let mut method = b.build().unwrap();
        build_blocks(&mut method).unwrap();
        process_blocks_tree(&mut method, &PassContext::new(config, events)).unwrap();
        method
    }

    fn wire(b: MethodBuilder, config: &PipelineConfig, events: &EventLog) -> Method {
        let mut method = prepare(b, config, events);
        process_exceptions(&mut method, &PassContext::new(config, events)).unwrap();
        method
    }

    fn rethrow_only() -> MethodBuilder {
        let mut b = MethodBuilder::new("rethrow", ArgType::Void);
        let r1 = b.reg(1);
        b.nop();
        b.label("try");
        b.invoke_static("a", vec![], None);
        b.invoke_static("b", vec![], None);
        b.label("end");
        b.ret(None);
        b.label("handler");
        b.move_exception(r1.clone());
        b.throw(r1);
        b.try_region("try", "end", &[(None, "handler")]);
        b
    }

    #[test]
    fn test_dead_rethrow_handler_removed() {
        let events = EventLog::new();
        let method = wire(rethrow_only(), &PipelineConfig::default(), &events);

        assert_eq!(method.handlers().count(), 0);
        let region = method.try_blocks().next().unwrap();
        assert!(region.handlers().is_empty());
        assert!(method
            .blocks()
            .iter()
            .flat_map(|b| b.instructions())
            .all(|i| i.attrs().catch.is_none()));
        assert!(method[id(4)].instructions().is_empty());
        assert!(events.has(EventKind::HandlerRemoved));
        assert!(method.diagnostics().is_empty());
    }

    #[test]
    fn test_dead_rethrow_kept_when_disabled() {
        let events = EventLog::new();
        let config = PipelineConfig {
            remove_dead_rethrows: false,
            ..PipelineConfig::default()
        };
        let method = wire(rethrow_only(), &config, &events);

        let handler = method.handlers().next().unwrap();
        assert_eq!(handler.handle_block(), Some(id(4)));
        assert_eq!(handler.blocks(), &[id(4)]);
        let arg = handler.arg().unwrap();
        assert_eq!(arg.ty(), &ArgType::throwable());
        assert_eq!(arg.name(), Some("th"));
        assert_eq!(method[id(2)].catch(), method.handlers().next().map(|h| h.try_block()));
    }

    #[test]
    fn test_bare_throw_handler_removed() {
        let mut b = MethodBuilder::new("bare", ArgType::Void);
        let r1 = b.reg(1);
        b.label("try");
        b.invoke_static("a", vec![], None);
        b.label("end");
        b.ret(None);
        b.label("handler");
        b.throw(r1);
        b.try_region("try", "end", &[(None, "handler")]);

        let events = EventLog::new();
        let method = wire(b, &PipelineConfig::default(), &events);
        assert_eq!(method.handlers().count(), 0);
    }

    #[test]
    fn test_typed_handler_binding() {
        let mut b = MethodBuilder::new("typed", ArgType::Void);
        let r1 = b.reg(1);
        b.label("try");
        b.invoke_static("read", vec![], None);
        b.label("end");
        b.ret(None);
        b.label("handler");
        b.move_exception(r1.clone());
        b.invoke_static("log", vec![r1.into()], None);
        b.ret(None);
        b.try_region("try", "end", &[(Some("java.io.IOException"), "handler")]);

        let events = EventLog::new();
        let method = wire(b, &PipelineConfig::sequential(), &events);

        let handler = method.handlers().next().unwrap();
        let arg = handler.arg().unwrap();
        assert_eq!(arg.ty(), &ArgType::object("java.io.IOException"));
        assert_eq!(arg.name(), Some("e"));
        let entry = handler.handle_block().unwrap();
        assert_eq!(method[entry].handler(), Some(handler.id()));
        assert!(handler.blocks().iter().all(|&b| b == entry || method[b].is_dominated_by(entry)));
        assert!(!handler.is_removed());
    }

    fn synchronized() -> MethodBuilder {
        let mut b = MethodBuilder::new("sync", ArgType::Void);
        let r0 = b.reg(0);
        let r1 = b.reg(1);
        b.monitor_enter(r0.clone());
        b.label("try");
        b.invoke_static("work", vec![], None);
        b.label("end");
        b.monitor_exit(r0.clone());
        b.ret(None);
        b.label("handler");
        b.move_exception(r1.clone());
        b.monitor_exit(r0);
        b.throw(r1);
        b.try_region("try", "end", &[(None, "handler")]);
        b
    }

    #[test]
    fn test_monitor_exit_stripped_from_handler() {
        let events = EventLog::new();
        let config = PipelineConfig {
            remove_dead_rethrows: false,
            ..PipelineConfig::default()
        };
        let method = wire(synchronized(), &config, &events);

        let handler = method.handlers().next().unwrap();
        assert_eq!(handler.blocks(), &[id(5), id(6), id(7)]);
        assert!(method[id(6)].instructions().is_empty());
        assert!(method[id(3)].ends_with(InsnType::MonitorExit));
        assert_eq!(events.count_kind(EventKind::MonitorExitRemoved), 1);
    }

    #[test]
    fn test_synchronized_handler_removed() {
        let events = EventLog::new();
        let method = wire(synchronized(), &PipelineConfig::default(), &events);
        assert_eq!(method.handlers().count(), 0);
        assert!(method.diagnostics().is_empty());
    }

    fn nested_rethrow() -> MethodBuilder {
        let mut b = MethodBuilder::new("nested", ArgType::Void);
        let r1 = b.reg(1);
        let r2 = b.reg(2);
        b.label("try1");
        b.invoke_static("a", vec![], None);
        b.label("end1");
        b.ret(None);
        b.label("h1");
        b.move_exception(r1.clone());
        b.label("try2");
        b.throw(r1);
        b.label("h2");
        b.move_exception(r2.clone());
        b.throw(r2);
        b.try_region("try1", "end1", &[(Some("java.io.IOException"), "h1")]);
        b.try_region("try2", "h2", &[(None, "h2")]);
        b
    }

    #[test]
    fn test_rethrow_chain_merges_regions() {
        let events = EventLog::new();
        let config = PipelineConfig {
            remove_dead_rethrows: false,
            ..PipelineConfig::default()
        };
        let method = wire(nested_rethrow(), &config, &events);

        assert_eq!(method.try_blocks().count(), 1);
        let outer = method.try_blocks().next().unwrap();
        assert_eq!(outer.handlers().len(), 2);
        for handler in method.handlers() {
            assert_eq!(handler.try_block(), outer.id());
        }
        let inner = method
            .try_block(TryBlockId(1))
            .and_then(|t| t.merged_into());
        assert_eq!(inner, Some(outer.id()));
        assert!(events.has(EventKind::TryBlocksMerged));
        assert!(method[id(5)].instructions()[0].attrs().catch.is_none());
    }

    #[test]
    fn test_rethrow_chain_drops_inner_catch_all() {
        let events = EventLog::new();
        let method = wire(nested_rethrow(), &PipelineConfig::default(), &events);

        let outer = method.try_blocks().next().unwrap();
        assert_eq!(outer.handlers().len(), 1);
        let remaining = method.handlers().next().unwrap();
        assert_eq!(remaining.catch_type(), Some("java.io.IOException"));
    }

    #[test]
    fn test_finally_content_reported() {
        let mut b = MethodBuilder::new("finally", ArgType::Void);
        let r1 = b.reg(1);
        b.label("try");
        b.invoke_static("a", vec![], None);
        b.label("end");
        b.ret(None);
        b.label("handler");
        b.move_exception(r1.clone());
        b.invoke_static("cleanup", vec![], None);
        b.throw(r1);
        b.try_region("try", "end", &[(None, "handler")]);

        let events = EventLog::new();
        let method = wire(b, &PipelineConfig::default(), &events);

        assert_eq!(method.diagnostics().len(), 1);
        assert_eq!(method.diagnostics()[0].kind, DiagnosticKind::UnsupportedShape);
        assert_eq!(events.count_kind(EventKind::UnsupportedShape), 1);
        assert_eq!(method.handlers().count(), 0);
    }

    #[test]
    fn test_handler_offset_mismatch() {
        let events = EventLog::new();
        let config = PipelineConfig::default();
        let mut method = prepare(rethrow_only(), &config, &events);
        method.handlers[0].handle_offset = 99;

        let err = mark_exception_handlers(&mut method, &PassContext::new(&config, &events));
        assert!(matches!(err, Err(Error::Structural { .. })));
    }

    #[test]
    fn test_handler_bound_by_offset() {
        let events = EventLog::new();
        let config = PipelineConfig::default();
        let mut method = prepare(rethrow_only(), &config, &events);
        let ctx = PassContext::new(&config, &events);
        mark_exception_handlers(&mut method, &ctx).unwrap();
        method.handlers[0].handle_block = None;

        process_try_catch_blocks(&mut method, &ctx).unwrap();
        assert_eq!(method.handlers[0].handle_block, Some(id(4)));
    }

    #[test]
    fn test_used_move_exception_kept() {
        let mut b = MethodBuilder::new("log", ArgType::Void);
        let r1 = b.reg(1);
        b.label("try");
        b.invoke_static("a", vec![], None);
        b.label("end");
        b.ret(None);
        b.label("handler");
        b.move_exception(r1.clone());
        b.invoke_static("log", vec![Operand::Register(r1)], None);
        b.ret(None);
        b.try_region("try", "end", &[(None, "handler")]);

        let events = EventLog::new();
        let method = wire(b, &PipelineConfig::default(), &events);
        let handler = method.handlers().next().unwrap();
        let entry = handler.handle_block().unwrap();
        assert_eq!(method[entry].instructions()[0].insn_type(), InsnType::MoveException);
    }
}
