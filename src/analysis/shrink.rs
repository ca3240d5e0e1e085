//! Expression shrinking: folds single-use definitions into the operand tree of their consumer.
//!
//! Every block is processed in instruction order. For each top-level instruction the register
//! operands of its whole tree are collected, direct operands first and then those inside
//! wrapped operands. A register whose value is read exactly once and defined by a top-level
//! instruction of the same block is folded:
//!
//! - directly, when the definition may be reordered freely;
//! - otherwise only if every instruction between the definition and the *inline border* of the
//!   consumer is reorderable and does not overwrite a register the definition reads. The border
//!   starts at the consumer and moves up to each definition folded this way, so evaluation
//!   order is preserved.
//!
//! Definitions in another block are folded only when a path leads from their block to the
//! consumer and every instruction that could run in between is clean. Such folds are applied
//! immediately; same-block folds are collected and applied per block in consumer order so that
//! chains fold transitively.

use std::collections::{HashMap, HashSet};

use crate::{
    analysis::paths,
    ir::{BlockId, InsnKind, Instruction, Method, Operand, RegisterArg, VarId},
    pipeline::{EventKind, PassContext},
};

/// Number of register reads of every value in `method`, nested operands included.
fn use_counts(method: &Method) -> HashMap<VarId, usize> {
    let mut counts = HashMap::new();
    for block in method.blocks() {
        for insn in block.instructions() {
            insn.visit_registers(&mut |r| *counts.entry(r.var()).or_insert(0) += 1);
        }
    }
    counts
}

/// A register operand and the argument indices leading to it from the top-level instruction.
struct Slot {
    path: Vec<usize>,
    reg: RegisterArg,
}

fn collect_slots(insn: &Instruction, prefix: &mut Vec<usize>, slots: &mut Vec<Slot>) {
    for (index, arg) in insn.args().iter().enumerate() {
        if let Operand::Register(reg) = arg {
            let mut path = prefix.clone();
            path.push(index);
            slots.push(Slot {
                path,
                reg: reg.clone(),
            });
        }
    }
    for (index, arg) in insn.args().iter().enumerate() {
        if let Operand::Wrapped(inner) = arg {
            prefix.push(index);
            collect_slots(inner, prefix, slots);
            prefix.pop();
        }
    }
}

/// Per-instruction bookkeeping for one block.
struct ArgsInfo {
    slots: Vec<Slot>,
    reads: HashSet<u16>,
    writes: Option<u16>,
    reorderable: bool,
    inline_border: usize,
    inlined_into: Option<usize>,
}

impl ArgsInfo {
    fn new(insn: &Instruction, pos: usize) -> Self {
        let mut slots = Vec::new();
        collect_slots(insn, &mut Vec::new(), &mut slots);
        let reads = slots.iter().map(|s| s.reg.reg()).collect();
        ArgsInfo {
            slots,
            reads,
            writes: insn.result().map(RegisterArg::reg),
            reorderable: insn.can_reorder(),
            inline_border: pos,
            inlined_into: None,
        }
    }

    /// Instruction is reorderable and leaves every register in `reads` untouched.
    fn is_clean_for(&self, reads: &HashSet<u16>) -> bool {
        self.reorderable && self.writes.is_none_or(|w| !reads.contains(&w))
    }
}

/// A same-block fold waiting to be applied.
struct Wrap {
    def: usize,
    consumer: usize,
    path: Vec<usize>,
    var: VarId,
}

/// Returns `true` if `pos` is folded into `consumer`, directly or through a chain.
fn is_inlined_into(infos: &[ArgsInfo], pos: usize, consumer: usize) -> bool {
    let mut current = infos[pos].inlined_into;
    while let Some(next) = current {
        if next == consumer {
            return true;
        }
        current = infos[next].inlined_into;
    }
    false
}

/// The definition at `from` may move down to just before `to`.
fn can_move(infos: &[ArgsInfo], from: usize, to: usize, consumer: usize) -> bool {
    let start = from + 1;
    if start >= to {
        return start == to;
    }
    let reads = &infos[from].reads;
    (start..to).all(|i| is_inlined_into(infos, i, consumer) || infos[i].is_clean_for(reads))
}

fn is_clean(insn: &Instruction, reads: &HashSet<u16>) -> bool {
    insn.can_reorder() && insn.result().is_none_or(|r| !reads.contains(&r.reg()))
}

/// Definitions that must stay materialized regardless of their use count.
fn is_pinned(insn: &Instruction) -> bool {
    matches!(insn.kind(), InsnKind::Phi | InsnKind::MoveException)
}

/// Checks whether the definition at `def_pos` of `def_block` may move in front of the
/// instruction at `use_pos` of `use_block`.
fn can_move_between_blocks(
    method: &Method,
    def_block: BlockId,
    def_pos: usize,
    use_block: BlockId,
    use_pos: usize,
) -> bool {
    if !paths::is_path_exists(method, def_block, use_block) {
        return false;
    }
    let Some(def) = method[def_block].instructions().get(def_pos) else {
        return false;
    };
    let mut reads = HashSet::new();
    def.visit_registers(&mut |r| {
        reads.insert(r.reg());
    });

    if !method[def_block].instructions()[def_pos + 1..]
        .iter()
        .all(|insn| is_clean(insn, &reads))
    {
        return false;
    }

    let mut between = paths::all_paths_blocks(method, def_block, use_block);
    between.remove(def_block.index());
    between.remove(use_block.index());
    for index in &between {
        if !method[BlockId::new(index)]
            .instructions()
            .iter()
            .all(|insn| is_clean(insn, &reads))
        {
            return false;
        }
    }

    method[use_block].instructions()[..use_pos]
        .iter()
        .all(|insn| is_clean(insn, &reads))
}

/// Returns the operand at `path` inside `insn`.
fn operand_at_mut<'a>(insn: &'a mut Instruction, path: &[usize]) -> Option<&'a mut Operand> {
    let (&first, rest) = path.split_first()?;
    let operand = insn.args_mut().get_mut(first)?;
    if rest.is_empty() {
        return Some(operand);
    }
    match operand {
        Operand::Wrapped(inner) => operand_at_mut(inner, rest),
        _ => None,
    }
}

/// Replaces the register operand reading `var` at `path` with `wrapped`.
///
/// Hands `wrapped` back if the slot no longer holds that register.
fn wrap_operand(
    consumer: &mut Instruction,
    path: &[usize],
    var: VarId,
    wrapped: Instruction,
) -> std::result::Result<(), Instruction> {
    match operand_at_mut(consumer, path) {
        Some(operand) if operand.as_register().is_some_and(|r| r.var() == var) => {
            *operand = Operand::Wrapped(Box::new(wrapped));
            Ok(())
        }
        _ => Err(wrapped),
    }
}

/// Shrinks every block of `method`. Returns `true` if anything was folded.
pub fn shrink_method(method: &mut Method, ctx: &PassContext<'_>) -> bool {
    if method.is_no_code() {
        return false;
    }
    let counts = use_counts(method);
    let mut changed = false;
    for index in 0..method.block_count() {
        changed |= shrink_block(method, BlockId::new(index), &counts, ctx);
    }
    changed
}

fn shrink_block(
    method: &mut Method,
    block: BlockId,
    counts: &HashMap<VarId, usize>,
    ctx: &PassContext<'_>,
) -> bool {
    if method[block].instructions().is_empty() {
        return false;
    }

    let mut infos: Vec<ArgsInfo> = method[block]
        .instructions()
        .iter()
        .enumerate()
        .map(|(pos, insn)| ArgsInfo::new(insn, pos))
        .collect();
    let local_defs: HashMap<VarId, usize> = method[block]
        .instructions()
        .iter()
        .enumerate()
        .filter_map(|(pos, insn)| insn.result().map(|r| (r.var(), pos)))
        .collect();

    let mut wraps = Vec::new();
    let mut changed = false;

    for consumer in 0..infos.len() {
        if matches!(method[block].instructions()[consumer].kind(), InsnKind::Phi) {
            continue;
        }
        let slots: Vec<(Vec<usize>, VarId)> = infos[consumer]
            .slots
            .iter()
            .rev()
            .map(|s| (s.path.clone(), s.reg.var()))
            .collect();

        for (path, var) in slots {
            if counts.get(&var).copied() != Some(1) {
                continue;
            }

            if let Some(&def) = local_defs.get(&var) {
                if def >= consumer || is_pinned(&method[block].instructions()[def]) {
                    continue;
                }
                if !infos[def].reorderable {
                    let border = infos[consumer].inline_border;
                    if def >= border || !can_move(&infos, def, border, consumer) {
                        continue;
                    }
                    infos[consumer].inline_border = def;
                }
                infos[def].inlined_into = Some(consumer);
                let def_reads = infos[def].reads.clone();
                infos[consumer].reads.extend(def_reads);
                infos[consumer].reorderable &= infos[def].reorderable;
                wraps.push(Wrap {
                    def,
                    consumer,
                    path,
                    var,
                });
                continue;
            }

            let Some((def_block, def_pos)) = method.find_definition(var) else {
                continue;
            };
            if def_block == block
                || is_pinned(&method[def_block].instructions()[def_pos])
                || !can_move_between_blocks(method, def_block, def_pos, block, consumer)
            {
                continue;
            }

            let def = method[def_block].instructions.remove(def_pos);
            let consumer_insn = &mut method[block].instructions[consumer];
            match wrap_operand(consumer_insn, &path, var, def) {
                Ok(()) => {
                    infos[consumer].reorderable = consumer_insn.can_reorder();
                    consumer_insn.visit_registers(&mut |r| {
                        infos[consumer].reads.insert(r.reg());
                    });
                    log::trace!("{}: folded {} from {} into {}", method.name(), var, def_block, block);
                    ctx.event(
                        EventKind::InstructionFolded,
                        method.name(),
                        block.index(),
                        format!("{var} moved from {def_block}"),
                    );
                    changed = true;
                }
                Err(def) => method[def_block].instructions.insert(def_pos, def),
            }
        }
    }

    if wraps.is_empty() {
        return changed;
    }

    let mut slots: Vec<Option<Instruction>> = std::mem::take(&mut method[block].instructions)
        .into_iter()
        .map(Some)
        .collect();
    for wrap in wraps {
        let Some(def) = slots[wrap.def].take() else {
            continue;
        };
        let Some(consumer) = slots[wrap.consumer].as_mut() else {
            slots[wrap.def] = Some(def);
            continue;
        };
        match wrap_operand(consumer, &wrap.path, wrap.var, def) {
            Ok(()) => {
                log::trace!("{}: folded {} into {} of {}", method.name(), wrap.var, wrap.consumer, block);
                ctx.event(
                    EventKind::InstructionFolded,
                    method.name(),
                    block.index(),
                    format!("{} inlined at {}", wrap.var, wrap.consumer),
                );
                changed = true;
            }
            Err(def) => slots[wrap.def] = Some(def),
        }
    }
    method[block].instructions = slots.into_iter().flatten().collect();
    changed
}
