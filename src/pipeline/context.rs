//! Shared state handed to every pass.

use crate::pipeline::{EventKind, EventLog, PipelineConfig};

/// Read-only configuration plus the shared event log.
///
/// One context is shared by all methods of a run, so everything in it is either immutable or
/// safe for concurrent appends.
#[derive(Debug, Clone, Copy)]
pub struct PassContext<'a> {
    /// Pipeline configuration
    pub config: &'a PipelineConfig,
    /// Event sink
    pub events: &'a EventLog,
}

impl<'a> PassContext<'a> {
    /// Creates a context.
    #[must_use]
    pub fn new(config: &'a PipelineConfig, events: &'a EventLog) -> Self {
        Self { config, events }
    }

    /// Records an event of `kind` for `method` at `location`.
    pub(crate) fn event(&self, kind: EventKind, method: &str, location: usize, message: String) {
        let _ = self
            .events
            .record(kind)
            .method(method)
            .location(location)
            .message(message);
    }
}
