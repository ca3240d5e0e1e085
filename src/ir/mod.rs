//! Intermediate representation consumed and produced by the pipeline.
//!
//! # Key Components
//!
//! - [`Instruction`] / [`InsnKind`] / [`InsnType`] - decoded operations and their kind tags
//! - [`Operand`] / [`RegisterArg`] / [`VarId`] - literal, register and wrapped operands
//! - [`Block`] / [`BlockId`] / [`BlockFlags`] - basic blocks in a dense arena
//! - [`Method`] - owner of the block arena, loops and exception metadata
//! - [`TryCatchBlock`] / [`ExceptionHandler`] - protected regions and catch clauses
//! - [`LoopInfo`] / [`Edge`] - back-edge loop descriptors
//! - [`MethodBuilder`] - builds decoded methods from a label-based instruction list

mod block;
mod builder;
mod instruction;
mod loops;
mod method;
mod operand;
mod trycatch;
mod types;

pub use block::{Block, BlockFlags, BlockId, IfBranches};
pub use builder::MethodBuilder;
pub use instruction::{
    ArithOp, IfCond, InsnAttrs, InsnKind, InsnType, Instruction, InvokeKind, Jump,
};
pub use loops::{Edge, LoopInfo};
pub use method::{Method, MethodDiagnostic, ProcessingState};
pub use operand::{Operand, RegisterArg, VarId};
pub use trycatch::{ExceptionHandler, HandlerId, TryBlockId, TryCatchBlock};
pub use types::{ArgType, THROWABLE_CLASS};
