//! # dexscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the dexscope library. Import this module to get quick access to the essential
//! types for building methods and running the reconstruction pipeline.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dexscope operations
pub use crate::Error;

/// The result type used throughout dexscope
pub use crate::Result;

/// Classification of method-level diagnostics
pub use crate::DiagnosticKind;

// ================================================================================================
// Intermediate Representation
// ================================================================================================

/// Methods, their processing state and recorded diagnostics
pub use crate::ir::{Method, MethodDiagnostic, ProcessingState};

/// Blocks and block identifiers
pub use crate::ir::{Block, BlockFlags, BlockId, IfBranches};

/// Instructions and their kinds
pub use crate::ir::{
    ArithOp, IfCond, InsnAttrs, InsnKind, InsnType, Instruction, InvokeKind, Jump,
};

/// Operands and value identities
pub use crate::ir::{ArgType, Operand, RegisterArg, VarId};

/// Exception regions and handlers
pub use crate::ir::{ExceptionHandler, HandlerId, TryBlockId, TryCatchBlock};

/// Loop descriptors
pub use crate::ir::{Edge, LoopInfo};

/// Decoded method construction
pub use crate::ir::MethodBuilder;

// ================================================================================================
// Pipeline
// ================================================================================================

/// Driver and configuration
pub use crate::pipeline::{MethodProcessor, PipelineConfig, ProcessingSummary};

/// Pass infrastructure
pub use crate::pipeline::{MethodPass, PassContext};

/// Event tracking
pub use crate::pipeline::{Event, EventKind, EventLog};

// ================================================================================================
// Utilities
// ================================================================================================

/// Dense bit set used for dominator and frontier sets
pub use crate::utils::BitSet;
