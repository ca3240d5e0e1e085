//! End-to-end pipeline tests.
//!
//! Each test builds a decoded method with `MethodBuilder`, runs it through
//! `MethodProcessor` and checks the finished block graph through the public API.

use dexscope::{
    analysis::{blocks, dominance},
    prelude::*,
};

fn process(method: &mut Method, config: PipelineConfig) -> Result<MethodProcessor> {
    let processor = MethodProcessor::new(config);
    if !processor.process(method) {
        let message = method
            .diagnostics()
            .first()
            .map_or_else(|| "method skipped".to_string(), |d| d.message.clone());
        panic!("{} failed: {message}", method.name());
    }
    Ok(processor)
}

#[test]
fn test_counting_loop() -> Result<()> {
    let mut b = MethodBuilder::new("count", ArgType::Int);
    let r0 = b.reg(0);
    b.const_int(r0.clone(), 5);
    b.label("head");
    b.if_zero(IfCond::Gt, r0.clone(), "done");
    b.arith(ArithOp::Add, r0.clone(), r0.clone().into(), Operand::int(1));
    b.goto("head");
    b.label("done");
    b.ret(Some(r0.into()));
    let mut method = b.build()?;

    process(&mut method, PipelineConfig::minimal())?;

    let head = BlockId::new(1);
    let body = BlockId::new(2);
    let done = BlockId::new(3);
    assert_eq!(method.block_count(), 4);
    assert_eq!(method[body].successors(), &[head]);
    assert!(method[body].ends_with(InsnType::Goto));
    assert_eq!(method.loops(), &[LoopInfo::new(head, body)]);
    assert!(method[head].has(BlockFlags::LOOP_START));
    assert!(method[body].has(BlockFlags::LOOP_END));
    assert_eq!(method.exit_blocks(), &[done]);
    assert_eq!(method[done].idom(), Some(head));

    let branches = method[head].if_branches().unwrap();
    assert_eq!(branches.then_block, done);
    assert_eq!(branches.else_block, body);
    Ok(())
}

#[test]
fn test_rethrow_only_handler_removed() -> Result<()> {
    let mut b = MethodBuilder::new("guarded", ArgType::Void);
    let r1 = b.reg(1);
    b.label("try");
    b.invoke_static("open", vec![], None);
    b.invoke_static("close", vec![], None);
    b.label("end");
    b.ret(None);
    b.label("handler");
    b.move_exception(r1.clone());
    b.throw(r1);
    b.try_region("try", "end", &[(None, "handler")]);
    let mut method = b.build()?;

    let processor = process(&mut method, PipelineConfig::sequential())?;

    assert_eq!(method.handlers().count(), 0);
    let region = method.try_blocks().next().unwrap();
    assert!(region.handlers().is_empty());
    assert!(processor.events().has(EventKind::HandlerRemoved));
    assert!(method.diagnostics().is_empty());
    Ok(())
}

#[test]
fn test_void_returns_merged() -> Result<()> {
    let mut b = MethodBuilder::new("two_returns", ArgType::Void);
    let r0 = b.reg(0);
    b.if_zero(IfCond::Eq, r0, "p1");
    b.ret(None);
    b.label("p1");
    b.invoke_static("work", vec![], None);
    b.ret(None);
    let mut method = b.build()?;

    let processor = process(&mut method, PipelineConfig::sequential())?;

    assert_eq!(method.exit_blocks().len(), 1);
    let exit = method.exit_blocks()[0];
    assert_eq!(method[exit].predecessors().len(), 2);
    assert!(processor.events().has(EventKind::ReturnMerged));
    Ok(())
}

#[test]
fn test_transitive_fold() -> Result<()> {
    let mut b = MethodBuilder::new("fold", ArgType::Void);
    let r1 = b.reg(1);
    let r2 = b.reg(2);
    b.const_int(r1.clone(), 5);
    b.arith(ArithOp::Add, r2.clone(), r1.into(), Operand::int(1));
    b.invoke_static("invoke", vec![r2.into()], None);
    b.ret(None);
    let mut method = b.build()?;

    process(&mut method, PipelineConfig::sequential())?;

    let block = &method[BlockId::new(0)];
    assert_eq!(block.instructions().len(), 1);
    assert_eq!(block.instructions()[0].to_string(), "invoke((5 + 1))");
    assert!(matches!(
        block.instructions()[0].args()[0],
        Operand::Wrapped(_)
    ));
    Ok(())
}

#[test]
fn test_three_latches_collapsed() -> Result<()> {
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
    let mut method = b.build()?;

    let processor = process(&mut method, PipelineConfig::sequential())?;

    assert_eq!(method.loops().len(), 1);
    let info = method.loops()[0];
    let collector = &method[info.latch];
    assert!(collector.has(BlockFlags::SYNTHETIC));
    assert_eq!(collector.predecessors().len(), 3);
    assert_eq!(collector.successors(), &[info.header]);
    assert_eq!(
        processor.events().count_kind(EventKind::LoopHeaderSplit),
        1
    );
    Ok(())
}

#[test]
fn test_synchronized_block() -> Result<()> {
    let mut b = MethodBuilder::new("sync", ArgType::Void);
    let r0 = b.argument(0, ArgType::object("java.lang.Object"));
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
    let mut method = b.build()?;

    let processor = process(&mut method, PipelineConfig::sequential())?;

    assert_eq!(method.handlers().count(), 0);
    assert!(processor.events().has(EventKind::MonitorExitRemoved));
    let monitor_exits = method
        .blocks()
        .iter()
        .flat_map(|block| block.instructions())
        .filter(|insn| insn.insn_type() == InsnType::MonitorExit)
        .count();
    assert_eq!(monitor_exits, 1);
    Ok(())
}

#[test]
fn test_typed_handler_kept() -> Result<()> {
    let mut b = MethodBuilder::new("read", ArgType::Void);
    let r1 = b.reg(1);
    b.label("try");
    b.invoke_static("read", vec![], None);
    b.label("end");
    b.ret(None);
    b.label("handler");
    b.move_exception(r1.clone());
    b.invoke_static("report", vec![r1.into()], None);
    b.ret(None);
    b.try_region("try", "end", &[(Some("java.io.IOException"), "handler")]);
    let mut method = b.build()?;

    process(&mut method, PipelineConfig::sequential())?;

    let handler = method.handlers().next().unwrap();
    let entry = handler.handle_block().unwrap();
    assert_eq!(handler.catch_type(), Some("java.io.IOException"));
    assert_eq!(
        handler.arg().map(RegisterArg::ty),
        Some(&ArgType::object("java.io.IOException"))
    );
    assert_eq!(method[entry].handler(), Some(handler.id()));
    assert!(method[entry].is_handler_entry());
    Ok(())
}

#[test]
fn test_step_by_step_api() -> Result<()> {
    let mut b = MethodBuilder::new("diamond", ArgType::Void);
    let r0 = b.reg(0);
    b.if_zero(IfCond::Eq, r0, "else");
    b.invoke_static("a", vec![], None);
    b.goto("join");
    b.label("else");
    b.invoke_static("b", vec![], None);
    b.label("join");
    b.ret(None);
    let mut method = b.build()?;

    blocks::build_blocks(&mut method)?;
    dominance::compute_dominators(&mut method)?;
    dominance::compute_dominance_frontier(&mut method);

    let join = BlockId::new(3);
    assert_eq!(method[join].idom(), Some(BlockId::new(0)));
    for side in [BlockId::new(1), BlockId::new(2)] {
        let frontier = method[side].dom_frontier().unwrap();
        assert_eq!(frontier.iter().collect::<Vec<_>>(), vec![join.index()]);
    }
    assert!(method.to_dot().contains("B0 -> B1;"));
    Ok(())
}

#[test]
fn test_failures_stay_local() -> Result<()> {
    let mut dead = MethodBuilder::new("dead_code", ArgType::Void);
    dead.ret(None);
    dead.invoke_static("never", vec![], None);
    dead.ret(None);

    let mut fine = MethodBuilder::new("fine", ArgType::Void);
    fine.ret(None);

    let mut methods = vec![dead.build()?, fine.build()?];
    let processor = MethodProcessor::new(PipelineConfig::default());
    let summary = processor.process_all(&mut methods);

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.processed, 1);
    assert_eq!(methods[0].state(), ProcessingState::Failed);
    assert_eq!(methods[0].block_count(), 0);
    assert_eq!(
        methods[0].diagnostics()[0].kind,
        DiagnosticKind::StructuralInconsistency
    );
    assert_eq!(methods[1].state(), ProcessingState::Processed);
    assert_eq!(processor.events().errors().count(), 1);
    Ok(())
}
