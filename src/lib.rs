// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]

//! # dexscope
//!
//! Control-flow reconstruction core for decompiling register-based bytecode.
//!
//! `dexscope` takes the decoded instruction stream of a method (typed instructions with byte
//! offsets, jump attributes and exception-handler descriptors) and turns it into a finalized
//! basic-block graph that a downstream structuring pass can render as source code:
//!
//! - **Block building** - splits the linear stream at control-transfer boundaries, inserts
//!   splitter blocks in front of protected regions and wires jump and handler edges
//! - **Dominance** - iterative dominator sets, immediate dominators, dominance frontiers and
//!   back-edge based loop detection
//! - **Normalization** - repairs loops with several back edges or several exits and merges or
//!   splits return blocks, re-running dominance until a fixed point is reached
//! - **Exception wiring** - binds handlers to their entry blocks, collects the blocks they own,
//!   merges rethrow chains and removes dead rethrow-only handlers
//! - **Expression shrinking** - folds single-use definitions into the expression tree of their
//!   consumer, inside a block and conservatively across blocks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dexscope::prelude::*;
//!
//! let mut builder = MethodBuilder::new("sum", ArgType::Int);
//! let r0 = builder.reg(0);
//! builder.const_int(r0.clone(), 5);
//! builder.ret(Some(Operand::Register(r0)));
//! let mut method = builder.build()?;
//!
//! let processor = MethodProcessor::new(PipelineConfig::default());
//! processor.process(&mut method);
//!
//! for block in method.blocks() {
//!     println!("{block}");
//! }
//! # Ok::<(), dexscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`ir`] - instructions, operands, blocks, try/catch regions and methods
//! - [`analysis`] - the individual graph algorithms
//! - [`pipeline`] - pass trait, configuration, event log and the method driver
//! - [`utils`] - bit sets and DOT helpers
//!
//! ## Error Handling
//!
//! Every fallible operation returns [`Result`]. Structural failures are scoped to a single
//! method: [`pipeline::MethodProcessor`] records them as diagnostics on the method and moves on.

#[macro_use]
pub(crate) mod error;

pub mod analysis;
pub mod ir;
pub mod pipeline;
pub mod prelude;
pub mod utils;

/// `dexscope` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dexscope` Error type
///
/// See [`Error`] for the individual failure modes.
pub use error::{DiagnosticKind, Error};
