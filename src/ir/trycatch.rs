//! Protected regions and their exception handlers.
//!
//! Both live in per-method arenas addressed by [`TryBlockId`] and [`HandlerId`]. Merging or
//! removing entries never reuses an id; merged regions stay in the arena with a forwarding
//! link and removed handlers are flagged.

use std::fmt;

use crate::ir::{BlockId, RegisterArg};

/// Index of a protected region in its method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TryBlockId(pub(crate) usize);

impl TryBlockId {
    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TryBlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Index of an exception handler in its method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub(crate) usize);

impl HandlerId {
    /// Returns the raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H{}", self.0)
    }
}

/// A protected instruction range and the handlers guarding it.
#[derive(Debug, Clone, PartialEq)]
pub struct TryCatchBlock {
    pub(crate) id: TryBlockId,
    pub(crate) handlers: Vec<HandlerId>,
    pub(crate) merged_into: Option<TryBlockId>,
}

impl TryCatchBlock {
    pub(crate) fn new(id: TryBlockId) -> Self {
        TryCatchBlock {
            id,
            handlers: Vec::new(),
            merged_into: None,
        }
    }

    /// Arena index of this region.
    #[must_use]
    pub fn id(&self) -> TryBlockId {
        self.id
    }

    /// Handlers currently registered for this region.
    #[must_use]
    pub fn handlers(&self) -> &[HandlerId] {
        &self.handlers
    }

    /// The region that absorbed this one, if it was merged away.
    #[must_use]
    pub fn merged_into(&self) -> Option<TryBlockId> {
        self.merged_into
    }
}

/// One `catch` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionHandler {
    pub(crate) id: HandlerId,
    pub(crate) try_block: TryBlockId,
    pub(crate) handle_offset: u32,
    pub(crate) catch_type: Option<String>,
    pub(crate) handle_block: Option<BlockId>,
    pub(crate) blocks: Vec<BlockId>,
    pub(crate) arg: Option<RegisterArg>,
    pub(crate) removed: bool,
}

impl ExceptionHandler {
    pub(crate) fn new(
        id: HandlerId,
        try_block: TryBlockId,
        handle_offset: u32,
        catch_type: Option<String>,
    ) -> Self {
        ExceptionHandler {
            id,
            try_block,
            handle_offset,
            catch_type,
            handle_block: None,
            blocks: Vec::new(),
            arg: None,
            removed: false,
        }
    }

    /// Arena index of this handler.
    #[must_use]
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// The region this handler currently belongs to.
    #[must_use]
    pub fn try_block(&self) -> TryBlockId {
        self.try_block
    }

    /// Offset of the first handler instruction.
    #[must_use]
    pub fn handle_offset(&self) -> u32 {
        self.handle_offset
    }

    /// Declared exception class; `None` for catch-all (`finally`) handlers.
    #[must_use]
    pub fn catch_type(&self) -> Option<&str> {
        self.catch_type.as_deref()
    }

    /// Returns `true` for handlers without a declared type.
    #[must_use]
    pub fn is_catch_all(&self) -> bool {
        self.catch_type.is_none()
    }

    /// Entry block, once bound.
    #[must_use]
    pub fn handle_block(&self) -> Option<BlockId> {
        self.handle_block
    }

    /// Blocks owned by this handler: the entry and every block it dominates.
    #[must_use]
    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    /// The caught exception variable.
    #[must_use]
    pub fn arg(&self) -> Option<&RegisterArg> {
        self.arg.as_ref()
    }

    /// Returns `true` if dead rethrow elimination dropped this handler.
    #[must_use]
    pub fn is_removed(&self) -> bool {
        self.removed
    }
}

impl fmt::Display for ExceptionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} catch({}) @{:#x}",
            self.id,
            self.catch_type.as_deref().unwrap_or("all"),
            self.handle_offset
        )
    }
}
