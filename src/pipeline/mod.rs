//! Pass infrastructure driving the analysis modules over methods.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      MethodProcessor                          │
//! ├───────────────────────────────────────────────────────────────┤
//! │  PipelineConfig          pass toggles, normalizer ceiling      │
//! │  EventLog                lock-free record of every edit        │
//! │                                                               │
//! │  per method (rayon):                                          │
//! │    BlockMakerPass        blocks → dominance → normalize       │
//! │    ExceptionWiringPass   handlers, rethrow merge, dead rethrow │
//! │    CleanupPass           NOP / GOTO removal                    │
//! │    ShrinkPass            single-use value folding              │
//! │                                                               │
//! │  on error: diagnostic on the method, graph discarded          │
//! └───────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod context;
mod events;
mod pass;
mod processor;

pub use config::{PipelineConfig, DEFAULT_MAX_NORMALIZE_ITERATIONS};
pub use context::PassContext;
pub use events::{Event, EventBuilder, EventKind, EventLog};
pub use pass::{BlockMakerPass, CleanupPass, ExceptionWiringPass, MethodPass, ShrinkPass};
pub use processor::{MethodProcessor, ProcessingSummary};
