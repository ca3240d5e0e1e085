//! Shared helpers used by the analysis passes.
//!
//! - [`BitSet`] - dense bit vector used for dominator and frontier sets
//! - [`escape_label`] - escaping for Graphviz DOT labels

mod bitset;
mod dot;

pub use bitset::{BitSet, BitSetIter};
pub use dot::escape_label;
