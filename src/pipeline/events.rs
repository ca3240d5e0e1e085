//! Structured event log for the reconstruction pipeline.
//!
//! Every structural edit (synthetic block insertion, return merge, handler removal, fold)
//! and every diagnostic is recorded as an [`Event`]. The log is append-only and lock-free
//! (`boxcar::Vec`), so methods processed on different rayon workers share one log without
//! coordination.
//!
//! # Example
//!
//! ```rust
//! use dexscope::pipeline::{EventKind, EventLog};
//!
//! let log = EventLog::new();
//! log.record(EventKind::ReturnSplit)
//!     .method("Foo.bar")
//!     .location(3)
//!     .message("return split into 2 blocks");
//! log.warn("multi-block finally dropped");
//!
//! assert!(log.has(EventKind::ReturnSplit));
//! assert_eq!(log.warnings().count(), 1);
//! ```

use std::{collections::HashMap, fmt};

/// What an [`Event`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Instructions were partitioned into basic blocks
    BlocksBuilt,
    /// A synthetic block was inserted on a loop exit edge
    LoopExitIsolated,
    /// Several back edges were funnelled through a new block
    LoopHeaderSplit,
    /// A loop was registered after normalization
    LoopRegistered,
    /// Two return blocks of a void method were merged
    ReturnMerged,
    /// A shared return block was duplicated per predecessor
    ReturnSplit,
    /// A handler was bound to its entry block
    HandlerBound,
    /// A dead rethrow handler was removed
    HandlerRemoved,
    /// A nested protected region was absorbed by its handler's region
    TryBlocksMerged,
    /// A MONITOR_EXIT was stripped from handler code
    MonitorExitRemoved,
    /// A definition was folded into its only use
    InstructionFolded,
    /// An instruction was deleted
    InstructionRemoved,
    /// A recognized shape was only partially handled
    UnsupportedShape,

    /// A method entered the pipeline
    MethodProcessingStarted,
    /// A method went through every pass
    MethodProcessingCompleted,
    /// A method was abandoned after a fatal error
    MethodFailed,

    /// Informational message
    Info,
    /// Something unexpected that did not stop processing
    Warning,
    /// Something that stopped processing of a method
    Error,
}

impl EventKind {
    /// Short human readable description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::BlocksBuilt => "blocks built",
            Self::LoopExitIsolated => "loop exit isolated",
            Self::LoopHeaderSplit => "loop header split",
            Self::LoopRegistered => "loop registered",
            Self::ReturnMerged => "return merged",
            Self::ReturnSplit => "return split",
            Self::HandlerBound => "handler bound",
            Self::HandlerRemoved => "handler removed",
            Self::TryBlocksMerged => "try blocks merged",
            Self::MonitorExitRemoved => "monitor exit removed",
            Self::InstructionFolded => "instruction folded",
            Self::InstructionRemoved => "instruction removed",
            Self::UnsupportedShape => "unsupported shape",
            Self::MethodProcessingStarted => "method processing started",
            Self::MethodProcessingCompleted => "method processing completed",
            Self::MethodFailed => "method failed",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Returns `true` for kinds that describe an edit of the graph or an instruction.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        matches!(
            self,
            Self::LoopExitIsolated
                | Self::LoopHeaderSplit
                | Self::ReturnMerged
                | Self::ReturnSplit
                | Self::HandlerRemoved
                | Self::TryBlocksMerged
                | Self::MonitorExitRemoved
                | Self::InstructionFolded
                | Self::InstructionRemoved
        )
    }

    /// Returns `true` for free-form diagnostics.
    #[must_use]
    pub fn is_diagnostic(&self) -> bool {
        matches!(
            self,
            Self::Info | Self::Warning | Self::Error | Self::UnsupportedShape | Self::MethodFailed
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// One recorded event.
#[derive(Debug, Clone)]
pub struct Event {
    /// What happened
    pub kind: EventKind,
    /// Name of the method it happened in
    pub method: Option<String>,
    /// Block index or bytecode offset, depending on the kind
    pub location: Option<usize>,
    /// Details
    pub message: String,
    /// Pass that recorded the event
    pub pass: Option<&'static str>,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.kind)?;
        if let Some(method) = &self.method {
            write!(f, " {method}")?;
        }
        if let Some(location) = self.location {
            write!(f, "@{location}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Fluent event construction. The event is pushed to the log when the builder is dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    method: Option<String>,
    location: Option<usize>,
    message: Option<String>,
    pass: Option<&'static str>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            method: None,
            location: None,
            message: None,
            pass: None,
        }
    }

    /// Sets the method name.
    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Sets the location.
    #[must_use]
    pub fn location(mut self, location: usize) -> Self {
        self.location = Some(location);
        self
    }

    /// Sets the message; defaults to the kind's description.
    #[must_use]
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Sets the recording pass.
    #[must_use]
    pub fn pass(mut self, pass: &'static str) -> Self {
        self.pass = Some(pass);
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        self.log.events.push(Event {
            kind: self.kind,
            method: self.method.take(),
            location: self.location.take(),
            message,
            pass: self.pass.take(),
        });
    }
}

/// Append-only, thread-safe collection of [`Event`]s.
#[derive(Debug, Default)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        self.iter().cloned().collect()
    }
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts recording an event of `kind`.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Records an informational message.
    pub fn info(&self, msg: impl Into<String>) {
        let _ = self.record(EventKind::Info).message(msg);
    }

    /// Records a warning.
    pub fn warn(&self, msg: impl Into<String>) {
        let _ = self.record(EventKind::Warning).message(msg);
    }

    /// Records an error.
    pub fn error(&self, msg: impl Into<String>) {
        let _ = self.record(EventKind::Error).message(msg);
    }

    /// Returns `true` if any event of `kind` was recorded.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.iter().any(|e| e.kind == kind)
    }

    /// Number of events of `kind`.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.filter_kind(kind).count()
    }

    /// Iterates all events in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Iterates events of `kind`.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.kind == kind)
    }

    /// Iterates events recorded for the named method.
    pub fn for_method<'a>(&'a self, method: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.iter().filter(move |e| e.method.as_deref() == Some(method))
    }

    /// Iterates warnings and unsupported shapes.
    pub fn warnings(&self) -> impl Iterator<Item = &Event> + '_ {
        self.iter()
            .filter(|e| matches!(e.kind, EventKind::Warning | EventKind::UnsupportedShape))
    }

    /// Iterates errors and method failures.
    pub fn errors(&self) -> impl Iterator<Item = &Event> + '_ {
        self.iter()
            .filter(|e| matches!(e.kind, EventKind::Error | EventKind::MethodFailed))
    }

    /// Counts events per kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for event in self.iter() {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    /// One line summary of the transformations performed.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let mut parts: Vec<String> = self
            .count_by_kind()
            .into_iter()
            .filter(|(kind, _)| kind.is_transformation())
            .map(|(kind, count)| format!("{count} {kind}"))
            .collect();

        if parts.is_empty() {
            return format!("{} events", self.len());
        }

        parts.sort();
        parts.join(", ")
    }
}

impl FromIterator<Event> for EventLog {
    fn from_iter<T: IntoIterator<Item = Event>>(iter: T) -> Self {
        let log = Self::new();
        for event in iter {
            log.events.push(event);
        }
        log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder_records_on_drop() {
        let log = EventLog::new();
        {
            let _builder = log.record(EventKind::HandlerRemoved).method("m").location(2);
            assert!(log.is_empty());
        }
        assert_eq!(log.len(), 1);
        let event = log.iter().next().unwrap();
        assert_eq!(event.message, "handler removed");
        assert_eq!(event.to_string(), "[handler removed] m@2: handler removed");
    }

    #[test]
    fn test_event_log_queries() {
        let log = EventLog::new();
        let _ = log.record(EventKind::InstructionFolded).method("a");
        let _ = log.record(EventKind::InstructionFolded).method("b");
        let _ = log.record(EventKind::ReturnMerged).method("a");
        log.error("boom");

        assert_eq!(log.count_kind(EventKind::InstructionFolded), 2);
        assert_eq!(log.for_method("a").count(), 2);
        assert_eq!(log.errors().count(), 1);
        assert_eq!(log.summary(), "1 return merged, 2 instruction folded");
    }

    #[test]
    fn test_event_log_summary_without_transformations() {
        let log = EventLog::new();
        assert_eq!(log.summary(), "no events");
        log.info("hello");
        assert_eq!(log.summary(), "1 events");
    }

    #[test]
    fn test_event_log_clone() {
        let log = EventLog::new();
        log.warn("w");
        let copy = log.clone();
        assert_eq!(copy.len(), 1);
        assert_eq!(copy.warnings().count(), 1);
    }

    #[test]
    fn test_event_log_concurrent_record() {
        use rayon::prelude::*;

        let log = EventLog::new();
        (0..64).into_par_iter().for_each(|i| {
            let _ = log.record(EventKind::Info).location(i);
        });
        assert_eq!(log.len(), 64);
    }
}
