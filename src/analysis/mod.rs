//! Control-flow reconstruction algorithms operating on a [`crate::ir::Method`].
//!
//! Each module implements one step of the pipeline and works directly on the method's block
//! arena. The [`crate::pipeline`] passes call them in order:
//!
//! - [`blocks`] - splits the instruction stream into basic blocks and connects them
//! - [`dominance`] - dominator sets, immediate dominators, frontiers and loop detection
//! - [`normalize`] - loop and exit repairs, repeated until the graph is stable
//! - [`exceptions`] - handler binding, rethrow merging and dead rethrow elimination
//! - [`cleanup`] - removal of NOP and GOTO instructions
//! - [`shrink`] - folding of single-use definitions into expression trees
//! - [`paths`] - path queries shared by the passes above
//!
//! # Usage
//!
//! ```rust
//! use dexscope::analysis::{blocks, dominance};
//! use dexscope::ir::{ArgType, BlockId, IfCond, MethodBuilder};
//!
//! let mut b = MethodBuilder::new("abs", ArgType::Void);
//! let r0 = b.reg(0);
//! b.if_zero(IfCond::Ge, r0, "done");
//! b.invoke_static("negate", vec![], None);
//! b.label("done");
//! b.ret(None);
//! let mut method = b.build()?;
//!
//! blocks::build_blocks(&mut method)?;
//! dominance::compute_dominators(&mut method)?;
//! assert_eq!(method[BlockId::new(2)].idom(), Some(BlockId::new(0)));
//! # Ok::<(), dexscope::Error>(())
//! ```

pub mod blocks;
pub mod cleanup;
pub mod dominance;
pub mod exceptions;
pub mod normalize;
pub mod paths;
pub mod shrink;
