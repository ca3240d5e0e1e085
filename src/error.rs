use thiserror::Error;

use crate::ir::BlockId;

macro_rules! structural_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Structural {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Structural {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, covering every failure the reconstruction pipeline can report.
///
/// All variants are scoped to the method being processed. The pipeline driver catches them at
/// the method boundary and records them as [`crate::ir::MethodDiagnostic`] entries, so one
/// corrupt method never aborts the processing of its siblings.
///
/// # Error Categories
///
/// ## Structural inconsistencies
/// - [`Error::MissingBlock`] - a jump or handler references an offset without a block
/// - [`Error::UnreachableBlock`] - a block cannot be reached from the enter block
/// - [`Error::NoImmediateDominator`] - dominator sets do not form a tree
/// - [`Error::Structural`] - any other broken graph or instruction invariant
///
/// ## Termination
/// - [`Error::NonConvergence`] - the normalizer hit its iteration ceiling
///
/// # Examples
///
/// ```rust
/// use dexscope::{DiagnosticKind, Error};
///
/// let err = Error::NonConvergence { iterations: 100 };
/// assert_eq!(err.kind(), DiagnosticKind::NonConvergence);
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A jump attribute or handler descriptor targets an offset at which no block starts.
    #[error("No block starts at offset {offset:#06x}")]
    MissingBlock {
        /// The referenced bytecode offset
        offset: u32,
    },

    /// A block has no path from the enter block.
    ///
    /// Such blocks would make every dominator computation meaningless, so the method is
    /// rejected as soon as one is found.
    #[error("Unreachable block {block} (offset {offset:?})")]
    UnreachableBlock {
        /// The offending block
        block: BlockId,
        /// Start offset of the offending block, if it came from the original stream
        offset: Option<u32>,
    },

    /// The dominator set of a block does not single out one immediate dominator.
    #[error("Can't find immediate dominator for block {block}: {candidates} candidates")]
    NoImmediateDominator {
        /// The block whose immediate dominator is ambiguous
        block: BlockId,
        /// Number of candidates left after filtering
        candidates: usize,
    },

    /// The block graph or an instruction tree violates an internal invariant.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the violated invariant
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Structural - {file}:{line}: {message}")]
    Structural {
        /// The message describing the inconsistency
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The tree normalizer kept finding pathologies after its iteration ceiling.
    #[error("Can't fix method cfg after {iterations} iterations")]
    NonConvergence {
        /// The ceiling that was exceeded
        iterations: usize,
    },
}

/// Classification of method-level diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum DiagnosticKind {
    /// Broken offsets, unreachable blocks or a malformed dominator tree. Fatal to the method.
    StructuralInconsistency,
    /// The normalizer did not reach a fixed point. Fatal to the method.
    NonConvergence,
    /// A recognized pattern that is only partially handled. Processing continues.
    UnsupportedShape,
}

impl Error {
    /// Returns the diagnostic category of this error.
    #[must_use]
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            Error::NonConvergence { .. } => DiagnosticKind::NonConvergence,
            Error::MissingBlock { .. }
            | Error::UnreachableBlock { .. }
            | Error::NoImmediateDominator { .. }
            | Error::Structural { .. } => DiagnosticKind::StructuralInconsistency,
        }
    }

    /// Returns the block this error points at, if any.
    #[must_use]
    pub fn block(&self) -> Option<BlockId> {
        match self {
            Error::UnreachableBlock { block, .. } | Error::NoImmediateDominator { block, .. } => {
                Some(*block)
            }
            _ => None,
        }
    }

    /// Returns the bytecode offset this error points at, if any.
    #[must_use]
    pub fn offset(&self) -> Option<u32> {
        match self {
            Error::MissingBlock { offset } => Some(*offset),
            Error::UnreachableBlock { offset, .. } => *offset,
            _ => None,
        }
    }
}
