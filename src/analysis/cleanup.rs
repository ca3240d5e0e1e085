//! Removal of instructions whose meaning is already carried by the block graph.

use crate::{
    ir::{InsnType, Method},
    pipeline::{EventKind, PassContext},
};

/// Removes NOP and GOTO instructions from every block.
///
/// Unconditional jumps are fully described by block edges once blocks are built. Returns
/// `true` if any instruction was removed.
pub fn remove_redundant(method: &mut Method, ctx: &PassContext<'_>) -> bool {
    let mut removed = 0;
    for index in 0..method.block_count() {
        let block = &mut method.blocks[index];
        let before = block.instructions.len();
        block
            .instructions
            .retain(|insn| !matches!(insn.insn_type(), InsnType::Nop | InsnType::Goto));
        let count = before - block.instructions.len();
        if count > 0 {
            removed += count;
            ctx.event(
                EventKind::InstructionRemoved,
                method.name(),
                index,
                format!("{count} nop/goto instruction(s) removed"),
            );
        }
    }
    removed > 0
}
