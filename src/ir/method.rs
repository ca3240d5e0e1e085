//! The method container: raw instructions, the block arena and exception metadata.

use std::{
    fmt::Write as _,
    ops::{Index, IndexMut},
};

use crate::{
    ir::{
        ArgType, Block, BlockFlags, BlockId, ExceptionHandler, HandlerId, Instruction, LoopInfo,
        RegisterArg, TryBlockId, TryCatchBlock, VarId,
    },
    utils::escape_label,
    DiagnosticKind, Error, Result,
};

/// Where a method stands in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display)]
pub enum ProcessingState {
    /// Not processed yet
    #[default]
    Pending,
    /// All passes completed
    Processed,
    /// Flagged as having no code
    Skipped,
    /// A fatal diagnostic was recorded and the block graph discarded
    Failed,
}

/// A problem found while processing one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDiagnostic {
    /// Category of the problem
    pub kind: DiagnosticKind,
    /// Human readable description
    pub message: String,
    /// Offending block, if known
    pub block: Option<BlockId>,
    /// Offending bytecode offset, if known
    pub offset: Option<u32>,
}

impl MethodDiagnostic {
    /// Builds a diagnostic from a pipeline error.
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        MethodDiagnostic {
            kind: error.kind(),
            message: error.to_string(),
            block: error.block(),
            offset: error.offset(),
        }
    }
}

/// A method and everything the pipeline derives from it.
///
/// Before block building the method holds its decoded instruction list. Block building moves
/// every instruction into exactly one block; from then on the blocks own them.
#[derive(Debug, Clone)]
pub struct Method {
    name: String,
    return_type: ArgType,
    arguments: Vec<RegisterArg>,
    no_code: bool,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) blocks: Vec<Block>,
    pub(crate) enter: Option<BlockId>,
    pub(crate) exits: Vec<BlockId>,
    pub(crate) loops: Vec<LoopInfo>,
    pub(crate) try_blocks: Vec<TryCatchBlock>,
    pub(crate) handlers: Vec<ExceptionHandler>,
    pub(crate) diagnostics: Vec<MethodDiagnostic>,
    pub(crate) state: ProcessingState,
}

impl Method {
    /// Creates a method from its decoded instructions.
    pub fn new(name: impl Into<String>, return_type: ArgType, instructions: Vec<Instruction>) -> Self {
        Method {
            name: name.into(),
            return_type,
            arguments: Vec::new(),
            no_code: false,
            instructions,
            blocks: Vec::new(),
            enter: None,
            exits: Vec::new(),
            loops: Vec::new(),
            try_blocks: Vec::new(),
            handlers: Vec::new(),
            diagnostics: Vec::new(),
            state: ProcessingState::Pending,
        }
    }

    /// Creates an abstract or native method, which every pass skips.
    pub fn without_code(name: impl Into<String>, return_type: ArgType) -> Self {
        let mut method = Method::new(name, return_type, Vec::new());
        method.no_code = true;
        method
    }

    /// Declares the registers holding the method arguments.
    pub fn set_arguments(&mut self, arguments: Vec<RegisterArg>) {
        self.arguments = arguments;
    }

    /// Registers a new protected region.
    pub fn add_try_block(&mut self) -> TryBlockId {
        let id = TryBlockId(self.try_blocks.len());
        self.try_blocks.push(TryCatchBlock::new(id));
        id
    }

    /// Registers a handler for `try_block`, starting at `handle_offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] if `try_block` is not a region of this method.
    pub fn add_handler(
        &mut self,
        try_block: TryBlockId,
        handle_offset: u32,
        catch_type: Option<String>,
    ) -> Result<HandlerId> {
        let id = HandlerId(self.handlers.len());
        let region = self
            .try_blocks
            .get_mut(try_block.index())
            .ok_or_else(|| structural_error!("Unknown try block {}", try_block))?;
        region.handlers.push(id);
        self.handlers
            .push(ExceptionHandler::new(id, try_block, handle_offset, catch_type));
        Ok(id)
    }

    /// Method name, used to identify diagnostics and events.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared return type.
    #[must_use]
    pub fn return_type(&self) -> &ArgType {
        &self.return_type
    }

    /// Argument registers.
    #[must_use]
    pub fn arguments(&self) -> &[RegisterArg] {
        &self.arguments
    }

    /// Returns `true` for abstract or native methods.
    #[must_use]
    pub fn is_no_code(&self) -> bool {
        self.no_code
    }

    /// Instructions not yet moved into blocks.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// The block list, indexed by [`BlockId`].
    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Returns the block with the given id.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.index())
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// The enter block, once blocks were built.
    #[must_use]
    pub fn enter_block(&self) -> Option<BlockId> {
        self.enter
    }

    /// Blocks ending in RETURN.
    #[must_use]
    pub fn exit_blocks(&self) -> &[BlockId] {
        &self.exits
    }

    /// Registered loops.
    #[must_use]
    pub fn loops(&self) -> &[LoopInfo] {
        &self.loops
    }

    /// Protected regions that were not merged into another region.
    pub fn try_blocks(&self) -> impl Iterator<Item = &TryCatchBlock> {
        self.try_blocks.iter().filter(|t| t.merged_into.is_none())
    }

    /// Returns the protected region with the given id.
    #[must_use]
    pub fn try_block(&self, id: TryBlockId) -> Option<&TryCatchBlock> {
        self.try_blocks.get(id.index())
    }

    /// Handlers that were not removed.
    pub fn handlers(&self) -> impl Iterator<Item = &ExceptionHandler> {
        self.handlers.iter().filter(|h| !h.removed)
    }

    /// Returns the handler with the given id, including removed ones.
    #[must_use]
    pub fn handler(&self, id: HandlerId) -> Option<&ExceptionHandler> {
        self.handlers.get(id.index())
    }

    /// Problems recorded while processing.
    #[must_use]
    pub fn diagnostics(&self) -> &[MethodDiagnostic] {
        &self.diagnostics
    }

    /// Pipeline state.
    #[must_use]
    pub fn state(&self) -> ProcessingState {
        self.state
    }

    /// Records a diagnostic.
    pub fn add_diagnostic(&mut self, diagnostic: MethodDiagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub(crate) fn set_state(&mut self, state: ProcessingState) {
        self.state = state;
    }

    /// Appends an empty block and returns its id.
    pub(crate) fn start_new_block(&mut self, start_offset: Option<u32>) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(Block::new(id, start_offset));
        id
    }

    /// Adds the edge `from -> to` unless it already exists.
    pub(crate) fn connect(&mut self, from: BlockId, to: BlockId) {
        if !self[from].successors.contains(&to) {
            self[from].successors.push(to);
        }
        if !self[to].predecessors.contains(&from) {
            self[to].predecessors.push(from);
        }
    }

    /// Removes the edge `from -> to`.
    pub(crate) fn remove_connection(&mut self, from: BlockId, to: BlockId) {
        self[from].successors.retain(|&s| s != to);
        self[to].predecessors.retain(|&p| p != from);
    }

    /// Redirects the edge `source -> old` to `source -> new`, keeping its position in the
    /// successor list of `source`.
    pub(crate) fn replace_connection(&mut self, source: BlockId, old: BlockId, new: BlockId) {
        if self[source].successors.contains(&new) {
            self[source].successors.retain(|&s| s != old);
        } else {
            for succ in &mut self[source].successors {
                if *succ == old {
                    *succ = new;
                }
            }
        }
        self[old].predecessors.retain(|&p| p != source);
        if !self[new].predecessors.contains(&source) {
            self[new].predecessors.push(source);
        }
    }

    /// Splits the edge `source -> target` with a new synthetic block. The new block takes the
    /// slot of `target` in the successor list of `source`, keeping branch order intact.
    pub(crate) fn insert_block_between(&mut self, source: BlockId, target: BlockId) -> BlockId {
        let offset = self[target].start_offset;
        let block = self.start_new_block(offset);
        self[block].flags |= BlockFlags::SYNTHETIC;

        for succ in &mut self[source].successors {
            if *succ == target {
                *succ = block;
            }
        }
        self[target].predecessors.retain(|&p| p != source);
        self[block].predecessors.push(source);
        self.connect(block, target);
        block
    }

    /// Drops the given blocks and renumbers the survivors densely.
    ///
    /// Every edge into a removed block is dropped. Dominance state is cleared on all blocks
    /// since bit positions no longer match ids.
    pub(crate) fn remove_blocks(&mut self, dead: &[BlockId]) {
        if dead.is_empty() {
            return;
        }
        let mut remap = vec![None; self.blocks.len()];
        let mut next = 0;
        for (index, slot) in remap.iter_mut().enumerate() {
            if !dead.contains(&BlockId(index)) {
                *slot = Some(BlockId(next));
                next += 1;
            }
        }
        let map = |id: BlockId| remap.get(id.index()).copied().flatten();
        let map_all = |ids: &mut Vec<BlockId>| *ids = ids.iter().filter_map(|&b| map(b)).collect();

        let blocks = std::mem::take(&mut self.blocks);
        for mut block in blocks {
            let Some(id) = map(block.id) else {
                continue;
            };
            block.id = id;
            map_all(&mut block.successors);
            map_all(&mut block.predecessors);
            map_all(&mut block.clean_successors);
            block.splitter = block.splitter.and_then(map);
            block.branches = None;
            block.clear_dominance();
            self.blocks.push(block);
        }

        self.enter = self.enter.and_then(map);
        map_all(&mut self.exits);
        self.loops.clear();
        for handler in &mut self.handlers {
            handler.handle_block = handler.handle_block.and_then(map);
            map_all(&mut handler.blocks);
        }
    }

    /// Resets everything the dominance engine computed.
    pub(crate) fn clear_blocks_state(&mut self) {
        for block in &mut self.blocks {
            block.clear_dominance();
        }
    }

    /// Drops the block graph after a fatal error so no half-processed state is exposed.
    pub(crate) fn unload_blocks(&mut self) {
        self.blocks.clear();
        self.enter = None;
        self.exits.clear();
        self.loops.clear();
    }

    /// Number of register operands reading `var` anywhere in the method, including operands of
    /// wrapped instructions and PHI nodes.
    #[must_use]
    pub fn use_count(&self, var: VarId) -> usize {
        let mut count = 0;
        for block in &self.blocks {
            for insn in &block.instructions {
                insn.visit_registers(&mut |r| {
                    if r.var() == var {
                        count += 1;
                    }
                });
            }
        }
        count
    }

    /// Locates the top-level instruction defining `var`.
    #[must_use]
    pub fn find_definition(&self, var: VarId) -> Option<(BlockId, usize)> {
        self.blocks.iter().find_map(|block| {
            block
                .instructions
                .iter()
                .position(|insn| insn.result().is_some_and(|r| r.var() == var))
                .map(|pos| (block.id, pos))
        })
    }

    /// Checks that edges are mirrored and every id is in range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] describing the first broken edge.
    pub fn validate_edges(&self) -> Result<()> {
        let count = self.blocks.len();
        for (index, block) in self.blocks.iter().enumerate() {
            if block.id.index() != index {
                return Err(structural_error!("Block {} stored at index {}", block.id, index));
            }
            for &succ in &block.successors {
                if succ.index() >= count || !self[succ].predecessors.contains(&block.id) {
                    return Err(structural_error!("Edge {} -> {} not mirrored", block.id, succ));
                }
            }
            for &pred in &block.predecessors {
                if pred.index() >= count || !self[pred].successors.contains(&block.id) {
                    return Err(structural_error!("Edge {} -> {} not mirrored", pred, block.id));
                }
            }
        }
        Ok(())
    }

    /// Renders the block graph in Graphviz DOT format.
    ///
    /// The enter block is green and exit blocks red; synthetic blocks are dashed. Exception
    /// edges into handler entries are dotted and back edges bold.
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut dot = String::new();

        dot.push_str("digraph Blocks {\n");
        let _ = writeln!(dot, "    label=\"{}\";", escape_label(&self.name));
        dot.push_str("    labelloc=t;\n");
        dot.push_str("    node [shape=box, fontname=\"Courier\", fontsize=10];\n\n");

        for block in &self.blocks {
            let mut label = block.id.to_string();
            if let Some(offset) = block.start_offset {
                let _ = write!(label, " @{offset:04X}");
            }
            if block.has(BlockFlags::LOOP_START) {
                label.push_str(" (loop)");
            }
            if let Some(handler) = block.handler {
                let _ = write!(label, " (handler {handler})");
            }
            label.push_str("\\l");
            for insn in &block.instructions {
                label.push_str(&escape_label(&insn.to_string()));
                label.push_str("\\l");
            }

            let mut styles = Vec::new();
            let mut fill = None;
            if Some(block.id) == self.enter {
                styles.push("filled");
                fill = Some("lightgreen");
            } else if self.exits.contains(&block.id) {
                styles.push("filled");
                fill = Some("lightcoral");
            }
            if block.has(BlockFlags::SYNTHETIC) {
                styles.push("dashed");
            }
            let mut style = String::new();
            if !styles.is_empty() {
                let _ = write!(style, ", style=\"{}\"", styles.join(","));
            }
            if let Some(color) = fill {
                let _ = write!(style, ", fillcolor={color}");
            }
            let _ = writeln!(dot, "    {} [label=\"{label}\"{style}];", block.id);
        }
        dot.push('\n');

        for block in &self.blocks {
            for &succ in &block.successors {
                let attrs = if self[succ].is_handler_entry() {
                    " [style=dotted]"
                } else if block.loops.iter().any(|l| l.latch == block.id && l.header == succ) {
                    " [style=bold]"
                } else {
                    ""
                };
                let _ = writeln!(dot, "    {} -> {succ}{attrs};", block.id);
            }
        }

        dot.push_str("}\n");
        dot
    }
}

impl Index<BlockId> for Method {
    type Output = Block;

    fn index(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }
}

impl IndexMut<BlockId> for Method {
    fn index_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }
}
