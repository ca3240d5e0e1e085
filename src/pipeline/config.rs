//! Configuration for the reconstruction pipeline.

/// Default ceiling for the normalizer's fixed-point loop.
pub const DEFAULT_MAX_NORMALIZE_ITERATIONS: usize = 100;

/// Configuration for [`crate::pipeline::MethodProcessor`].
///
/// Controls which optional passes run and the termination bound of the tree normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Maximum normalization rounds before a method is rejected (default: 100).
    pub max_normalize_iterations: usize,

    /// Duplicate a shared return block per predecessor.
    pub split_returns: bool,

    /// Merge return blocks of void methods.
    pub merge_returns: bool,

    /// Bind handlers, collect handler blocks and merge rethrow chains.
    pub process_exceptions: bool,

    /// Remove catch-all handlers that only rethrow. Requires `process_exceptions`.
    pub remove_dead_rethrows: bool,

    /// Remove NOP and GOTO instructions before shrinking.
    pub cleanup: bool,

    /// Fold single-use definitions into their consumer.
    pub shrink: bool,

    /// Process methods on the rayon thread pool.
    pub parallel: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_normalize_iterations: DEFAULT_MAX_NORMALIZE_ITERATIONS,
            split_returns: true,
            merge_returns: true,
            process_exceptions: true,
            remove_dead_rethrows: true,
            cleanup: true,
            shrink: true,
            parallel: true,
        }
    }
}

impl PipelineConfig {
    /// Creates the default configuration with every pass enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block building, dominance and loop repair only.
    ///
    /// Return merging and splitting, exception wiring, cleanup and shrinking are disabled.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            split_returns: false,
            merge_returns: false,
            process_exceptions: false,
            remove_dead_rethrows: false,
            cleanup: false,
            shrink: false,
            ..Self::default()
        }
    }

    /// Default configuration processing methods on the calling thread.
    #[must_use]
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }
}
