//! Basic blocks and their identifiers.

use std::fmt;

use bitflags::bitflags;

use crate::{
    ir::{HandlerId, InsnType, Instruction, LoopInfo, TryBlockId},
    utils::BitSet,
};

/// Dense index of a block in its method's block list.
///
/// Ids are reassigned when blocks are removed, so a `BlockId` is only meaningful for the graph
/// state it was read from.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) usize);

impl BlockId {
    /// Creates a block id from a raw index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

bitflags! {
    /// Structural markers on a block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BlockFlags: u8 {
        /// Inserted by the pipeline, not present in the original code
        const SYNTHETIC = 1 << 0;
        /// Ends in a RETURN instruction
        const RETURN = 1 << 1;
        /// Target of at least one back edge
        const LOOP_START = 1 << 2;
        /// Source of at least one back edge
        const LOOP_END = 1 << 3;
    }
}

/// Blocks a conditional branch continues at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfBranches {
    /// Successor reached when the condition holds
    pub then_block: BlockId,
    /// Fallthrough successor
    pub else_block: BlockId,
}

/// A maximal straight-line run of instructions.
#[derive(Debug, Clone)]
pub struct Block {
    pub(crate) id: BlockId,
    pub(crate) start_offset: Option<u32>,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) successors: Vec<BlockId>,
    pub(crate) predecessors: Vec<BlockId>,
    pub(crate) clean_successors: Vec<BlockId>,
    pub(crate) flags: BlockFlags,
    pub(crate) doms: Option<BitSet>,
    pub(crate) idom: Option<BlockId>,
    pub(crate) dom_frontier: Option<BitSet>,
    pub(crate) dominates_on: Vec<BlockId>,
    pub(crate) loops: Vec<LoopInfo>,
    pub(crate) splitter: Option<BlockId>,
    pub(crate) handler: Option<HandlerId>,
    pub(crate) catch: Option<TryBlockId>,
    pub(crate) branches: Option<IfBranches>,
}

impl Block {
    pub(crate) fn new(id: BlockId, start_offset: Option<u32>) -> Self {
        Block {
            id,
            start_offset,
            instructions: Vec::new(),
            successors: Vec::new(),
            predecessors: Vec::new(),
            clean_successors: Vec::new(),
            flags: BlockFlags::empty(),
            doms: None,
            idom: None,
            dom_frontier: None,
            dominates_on: Vec::new(),
            loops: Vec::new(),
            splitter: None,
            handler: None,
            catch: None,
            branches: None,
        }
    }

    /// Position of this block in the method's block list.
    #[must_use]
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// Offset of the first original instruction, `None` for splitter blocks.
    #[must_use]
    pub fn start_offset(&self) -> Option<u32> {
        self.start_offset
    }

    /// The instructions, in execution order.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Mutable access to the instructions.
    pub fn instructions_mut(&mut self) -> &mut Vec<Instruction> {
        &mut self.instructions
    }

    /// The last instruction, if any.
    #[must_use]
    pub fn last_insn(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    /// Returns `true` if the last instruction has kind `ty`.
    #[must_use]
    pub fn ends_with(&self, ty: InsnType) -> bool {
        self.last_insn().is_some_and(|i| i.insn_type() == ty)
    }

    /// Control-flow successors, including exception edges.
    #[must_use]
    pub fn successors(&self) -> &[BlockId] {
        &self.successors
    }

    /// Control-flow predecessors.
    #[must_use]
    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }

    /// Successors without exception handler entries and, for loop ends, without the loop
    /// header.
    #[must_use]
    pub fn clean_successors(&self) -> &[BlockId] {
        &self.clean_successors
    }

    /// Structural markers.
    #[must_use]
    pub fn flags(&self) -> BlockFlags {
        self.flags
    }

    /// Returns `true` if all of `flags` are set.
    #[must_use]
    pub fn has(&self, flags: BlockFlags) -> bool {
        self.flags.contains(flags)
    }

    /// Strict dominators of this block, valid only after a dominance run.
    #[must_use]
    pub fn doms(&self) -> Option<&BitSet> {
        self.doms.as_ref()
    }

    /// Returns `true` if `other` strictly dominates this block.
    #[must_use]
    pub fn is_dominated_by(&self, other: BlockId) -> bool {
        self.doms.as_ref().is_some_and(|d| d.contains(other.index()))
    }

    /// Immediate dominator; `None` for the enter block or before a dominance run.
    #[must_use]
    pub fn idom(&self) -> Option<BlockId> {
        self.idom
    }

    /// Dominance frontier, valid only after normalization finished.
    #[must_use]
    pub fn dom_frontier(&self) -> Option<&BitSet> {
        self.dom_frontier.as_ref()
    }

    /// Blocks whose immediate dominator is this block.
    #[must_use]
    pub fn dominates_on(&self) -> &[BlockId] {
        &self.dominates_on
    }

    /// Loops this block is the header or latch of.
    #[must_use]
    pub fn loops(&self) -> &[LoopInfo] {
        &self.loops
    }

    /// For the first block of a protected region, the splitter block in front of it.
    #[must_use]
    pub fn splitter(&self) -> Option<BlockId> {
        self.splitter
    }

    /// The handler this block is the entry of, once exception wiring bound it.
    #[must_use]
    pub fn handler(&self) -> Option<HandlerId> {
        self.handler
    }

    /// The protected region shared by every instruction of this block.
    #[must_use]
    pub fn catch(&self) -> Option<TryBlockId> {
        self.catch
    }

    /// Branch targets when this block is a lone `IF`.
    #[must_use]
    pub fn if_branches(&self) -> Option<IfBranches> {
        self.branches
    }

    /// Returns `true` if this block starts a handler, either bound already or marked by the
    /// decoding layer on its first instruction.
    #[must_use]
    pub fn is_handler_entry(&self) -> bool {
        self.handler.is_some()
            || self
                .instructions
                .first()
                .is_some_and(|insn| insn.attrs().handler.is_some())
    }

    /// Forgets everything computed by the dominance engine.
    pub(crate) fn clear_dominance(&mut self) {
        self.flags
            .remove(BlockFlags::LOOP_START | BlockFlags::LOOP_END | BlockFlags::RETURN);
        self.loops.clear();
        self.doms = None;
        self.idom = None;
        self.dom_frontier = None;
        self.dominates_on.clear();
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;
        if let Some(offset) = self.start_offset {
            write!(f, " @{offset:#x}")?;
        }
        if self.has(BlockFlags::SYNTHETIC) {
            f.write_str(" (synthetic)")?;
        }
        writeln!(f, ":")?;
        for insn in &self.instructions {
            writeln!(f, "    {insn}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{InsnKind, Operand};

    #[test]
    fn test_block_id_display() {
        let id = BlockId::new(7);
        assert_eq!(id.index(), 7);
        assert_eq!(format!("{id}"), "B7");
        assert_eq!(format!("{id:?}"), "B7");
    }

    #[test]
    fn test_block_clear_dominance() {
        let mut block = Block::new(BlockId::new(1), Some(4));
        block.flags |= BlockFlags::LOOP_START | BlockFlags::SYNTHETIC;
        block.doms = Some(BitSet::full(2));
        block.idom = Some(BlockId::new(0));
        block.clear_dominance();
        assert!(block.has(BlockFlags::SYNTHETIC));
        assert!(!block.has(BlockFlags::LOOP_START));
        assert!(block.doms().is_none());
        assert!(block.idom().is_none());
        assert!(!block.is_dominated_by(BlockId::new(0)));
    }

    #[test]
    fn test_block_ends_with() {
        let mut block = Block::new(BlockId::new(0), Some(0));
        assert!(!block.ends_with(InsnType::Return));
        block
            .instructions
            .push(Instruction::new(InsnKind::Return, vec![Operand::int(0)], None).at(0));
        assert!(block.ends_with(InsnType::Return));
        assert_eq!(block.to_string(), "B0 @0x0:\n    return 0\n");
    }
}
