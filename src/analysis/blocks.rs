//! Block building: partitions a decoded instruction stream into basic blocks.
//!
//! Blocks are split after every control transfer and in front of every jump target. A
//! protected region gets a synthetic *splitter* block in front of its first instruction; all
//! handler edges of the region leave from that splitter, never from a block that also carries
//! ordinary fallthrough logic.
//!
//! After the linear pass, every jump attribute is resolved into a block edge and every
//! splitter is connected to the entry blocks of its region's handlers.

use std::collections::HashMap;

use crate::{
    ir::{BlockFlags, BlockId, IfBranches, InsnKind, InsnType, Instruction, Jump, Method},
    Error, Result,
};

/// Returns `true` for instructions that always end their block.
const fn is_separate(ty: InsnType) -> bool {
    matches!(
        ty,
        InsnType::Return
            | InsnType::If
            | InsnType::Switch
            | InsnType::MonitorEnter
            | InsnType::MonitorExit
    )
}

/// What the linear pass remembers about the previous instruction.
struct Previous {
    ty: InsnType,
    offset: u32,
    jumps: Vec<Jump>,
}

impl Previous {
    fn of(insn: &Instruction, offset: u32) -> Self {
        Previous {
            ty: insn.insn_type(),
            offset,
            jumps: insn.attrs().jumps.clone(),
        }
    }
}

/// Builds the block graph of `method` from its instruction list.
///
/// On success the method's instruction list is empty, every instruction lives in exactly one
/// block, the first block is the enter block and all jump and handler edges are connected.
///
/// # Errors
///
/// Returns [`Error::Structural`] for an instruction without an offset and
/// [`Error::MissingBlock`] for a jump or handler offset no block starts at.
pub fn build_blocks(method: &mut Method) -> Result<()> {
    let instructions = std::mem::take(&mut method.instructions);
    method.blocks.clear();
    method.exits.clear();
    method.loops.clear();

    let Some(first) = instructions.first() else {
        return Err(structural_error!("Method {} has no instructions", method.name()));
    };
    let mut current = method.start_new_block(first.offset());
    method.enter = Some(current);

    let mut blocks_map: HashMap<u32, BlockId> = HashMap::with_capacity(instructions.len());
    let mut prev: Option<Previous> = None;

    for insn in instructions {
        let Some(offset) = insn.offset() else {
            return Err(structural_error!(
                "Instruction '{}' in {} has no offset",
                insn,
                method.name()
            ));
        };

        let mut start_new = false;
        if let Some(prev) = &prev {
            if matches!(prev.ty, InsnType::Goto | InsnType::Throw) || is_separate(prev.ty) {
                let block = method.start_new_block(Some(offset));
                if matches!(prev.ty, InsnType::MonitorEnter | InsnType::MonitorExit) {
                    method.connect(current, block);
                }
                current = block;
                start_new = true;
            } else if is_split_by_jump(prev, &insn, offset)
                || is_separate(insn.insn_type())
                || insn.attrs().handler.is_some()
                || is_do_while(&blocks_map, current, &insn)
            {
                let block = method.start_new_block(Some(offset));
                method.connect(current, block);
                current = block;
                start_new = true;
            }
        }

        if insn.attrs().try_entry {
            if offset != 0 && !start_new {
                let block = method.start_new_block(Some(offset));
                method.connect(current, block);
                current = block;
            }
            blocks_map.insert(offset, current);

            let splitter = current;
            method[splitter].flags |= BlockFlags::SYNTHETIC;
            let block = method.start_new_block(None);
            method[block].splitter = Some(splitter);
            method.connect(splitter, block);
            current = block;
        } else {
            blocks_map.insert(offset, current);
        }

        prev = Some(Previous::of(&insn, offset));
        method[current].instructions.push(insn);
    }

    setup_connections(method, &blocks_map)?;
    log::trace!("{}: built {} blocks", method.name(), method.block_count());
    Ok(())
}

/// The previous instruction branches away, or the current one is a branch target.
fn is_split_by_jump(prev: &Previous, insn: &Instruction, offset: u32) -> bool {
    if prev.jumps.iter().any(|j| j.src == prev.offset) {
        return true;
    }
    !is_separate(prev.ty) && insn.attrs().jumps.iter().any(|j| j.dest == offset)
}

/// An `IF` jumping back to the start of the block being built.
fn is_do_while(blocks_map: &HashMap<u32, BlockId>, current: BlockId, insn: &Instruction) -> bool {
    match insn.kind() {
        InsnKind::If { target, .. } => blocks_map.get(target) == Some(&current),
        _ => false,
    }
}

fn block_at(blocks_map: &HashMap<u32, BlockId>, offset: u32) -> Result<BlockId> {
    blocks_map
        .get(&offset)
        .copied()
        .ok_or(Error::MissingBlock { offset })
}

/// Turns jump attributes into edges and connects splitters to handler entries.
fn setup_connections(method: &mut Method, blocks_map: &HashMap<u32, BlockId>) -> Result<()> {
    let mut edges = Vec::new();
    for block in method.blocks() {
        for insn in block.instructions() {
            for jump in &insn.attrs().jumps {
                edges.push((block_at(blocks_map, jump.src)?, block_at(blocks_map, jump.dest)?));
            }

            let (Some(catch), Some(splitter)) = (insn.attrs().catch, block.splitter()) else {
                continue;
            };
            let Some(region) = method.try_block(catch) else {
                return Err(structural_error!("Unknown try block {}", catch));
            };
            for &handler in region.handlers() {
                let Some(handler) = method.handler(handler) else {
                    return Err(structural_error!("Unknown handler {}", handler));
                };
                let handler_block = block_at(blocks_map, handler.handle_offset())?;
                if handler_block != splitter {
                    edges.push((splitter, handler_block));
                }
            }
        }
    }

    for (from, to) in edges {
        method.connect(from, to);
    }
    Ok(())
}

/// Binds the `then` and `else` successors of every block ending in an `IF`.
///
/// `then` is the successor starting at the branch target. Blocks whose target successor
/// cannot be found keep no binding.
pub fn init_if_branches(method: &mut Method) {
    for index in 0..method.block_count() {
        let id = BlockId::new(index);
        let target = match method[id].last_insn().map(Instruction::kind) {
            Some(InsnKind::If { target, .. }) => *target,
            _ => continue,
        };
        let successors = method[id].successors();
        let Some(then_block) = successors
            .iter()
            .copied()
            .find(|&s| method[s].start_offset() == Some(target))
        else {
            continue;
        };
        let else_block = successors
            .iter()
            .copied()
            .find(|&s| s != then_block)
            .unwrap_or(then_block);
        method[id].branches = Some(IfBranches {
            then_block,
            else_block,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ArgType, ArithOp, IfCond, MethodBuilder, Operand};

    fn loop_method() -> Method {
        let mut b = MethodBuilder::new("loop", ArgType::Int);
        let r0 = b.reg(0);
        b.const_int(r0.clone(), 5);
        b.label("head");
        b.if_zero(IfCond::Le, r0.clone(), "done");
        b.arith(ArithOp::Add, r0.clone(), r0.clone().into(), Operand::int(1));
        b.goto("head");
        b.label("done");
        b.ret(Some(r0.into()));
        b.build().unwrap()
    }

    fn ids(list: &[BlockId]) -> Vec<usize> {
        list.iter().map(|b| b.index()).collect()
    }

    #[test]
    fn test_build_blocks_loop() {
        let mut method = loop_method();
        build_blocks(&mut method).unwrap();

        assert!(method.instructions().is_empty());
        assert_eq!(method.block_count(), 4);
        let offsets: Vec<_> = method.blocks().iter().map(|b| b.start_offset()).collect();
        assert_eq!(offsets, vec![Some(0), Some(1), Some(2), Some(4)]);

        assert_eq!(ids(method[BlockId::new(0)].successors()), vec![1]);
        assert_eq!(ids(method[BlockId::new(1)].successors()), vec![2, 3]);
        assert_eq!(ids(method[BlockId::new(2)].successors()), vec![1]);
        assert!(method[BlockId::new(2)].ends_with(InsnType::Goto));
        assert!(method[BlockId::new(3)].successors().is_empty());
        assert!(method.validate_edges().is_ok());
    }

    #[test]
    fn test_build_blocks_try_splitter() {
        let mut b = MethodBuilder::new("guarded", ArgType::Void);
        let r1 = b.reg(1);
        b.nop();
        b.label("try");
        b.invoke_static("work", vec![], None);
        b.label("end");
        b.ret(None);
        b.label("handler");
        b.move_exception(r1.clone());
        b.throw(r1);
        b.try_region("try", "end", &[(None, "handler")]);
        let mut method = b.build().unwrap();
        build_blocks(&mut method).unwrap();

        // B0 nop, B1 splitter @1, B2 invoke, B3 return, B4 handler
        assert_eq!(method.block_count(), 5);
        let splitter = BlockId::new(1);
        assert!(method[splitter].has(BlockFlags::SYNTHETIC));
        assert!(method[splitter].instructions().is_empty());
        assert_eq!(method[splitter].start_offset(), Some(1));
        assert_eq!(method[BlockId::new(2)].splitter(), Some(splitter));
        assert_eq!(method[BlockId::new(2)].start_offset(), None);
        assert_eq!(ids(method[splitter].successors()), vec![2, 4]);
        assert!(method[BlockId::new(4)].is_handler_entry());
    }

    #[test]
    fn test_build_blocks_monitor_boundaries() {
        let mut b = MethodBuilder::new("sync", ArgType::Void);
        let r0 = b.reg(0);
        b.monitor_enter(r0.clone());
        b.invoke_static("work", vec![], None);
        b.monitor_exit(r0);
        b.ret(None);
        let mut method = b.build().unwrap();
        build_blocks(&mut method).unwrap();

        assert_eq!(method.block_count(), 4);
        for i in 0..3 {
            assert_eq!(ids(method[BlockId::new(i)].successors()), vec![i + 1]);
            assert_eq!(method[BlockId::new(i)].instructions().len(), 1);
        }
    }

    #[test]
    fn test_build_blocks_do_while() {
        let mut b = MethodBuilder::new("do_while", ArgType::Void);
        let r0 = b.reg(0);
        b.label("body");
        b.invoke_static("work", vec![], None);
        b.if_zero(IfCond::Ne, r0, "body");
        b.ret(None);
        let mut method = b.build().unwrap();
        build_blocks(&mut method).unwrap();

        assert_eq!(method.block_count(), 3);
        assert_eq!(ids(method[BlockId::new(1)].successors()), vec![2, 0]);
    }

    #[test]
    fn test_build_blocks_missing_handler_block() {
        let mut method = loop_method();
        let t = method.add_try_block();
        method.add_handler(t, 0x40, None).unwrap();
        method.instructions[1].attrs_mut().catch = Some(t);
        method.instructions[1].attrs_mut().try_entry = true;

        assert_eq!(
            build_blocks(&mut method).unwrap_err(),
            Error::MissingBlock { offset: 0x40 }
        );
    }

    #[test]
    fn test_build_blocks_requires_offsets() {
        let insn = Instruction::new(InsnKind::Return, vec![], None);
        let mut method = Method::new("m", ArgType::Void, vec![insn]);
        assert!(matches!(
            build_blocks(&mut method),
            Err(Error::Structural { .. })
        ));
    }

    #[test]
    fn test_init_if_branches() {
        let mut method = loop_method();
        build_blocks(&mut method).unwrap();
        init_if_branches(&mut method);

        let branches = method[BlockId::new(1)].if_branches().unwrap();
        assert_eq!(branches.then_block, BlockId::new(3));
        assert_eq!(branches.else_block, BlockId::new(2));
        assert!(method[BlockId::new(0)].if_branches().is_none());
    }
}
