//! Per-method pipeline driver.

use rayon::prelude::*;

use crate::{
    ir::{Method, MethodDiagnostic, ProcessingState},
    pipeline::{
        BlockMakerPass, CleanupPass, EventKind, EventLog, ExceptionWiringPass, MethodPass,
        PassContext, PipelineConfig, ShrinkPass,
    },
    Result,
};

/// Outcome counts of [`MethodProcessor::process_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessingSummary {
    /// Methods that went through every pass
    pub processed: usize,
    /// Methods without code
    pub skipped: usize,
    /// Methods whose processing failed
    pub failed: usize,
}

impl ProcessingSummary {
    /// Number of methods looked at.
    #[must_use]
    pub fn total(&self) -> usize {
        self.processed + self.skipped + self.failed
    }
}

/// Runs the reconstruction passes over methods.
///
/// Failures stay local to the method they occur in: the error is recorded as a
/// [`MethodDiagnostic`], the method's block graph is discarded and the method is marked
/// [`ProcessingState::Failed`]. Sibling methods are unaffected.
///
/// # Example
///
/// ```rust
/// use dexscope::prelude::*;
///
/// let mut b = MethodBuilder::new("answer", ArgType::Int);
/// let r0 = b.reg(0);
/// b.const_int(r0.clone(), 42);
/// b.ret(Some(r0.into()));
/// let mut methods = vec![b.build()?, Method::without_code("stub", ArgType::Void)];
///
/// let processor = MethodProcessor::new(PipelineConfig::default());
/// let summary = processor.process_all(&mut methods);
/// assert_eq!(summary.processed, 1);
/// assert_eq!(summary.skipped, 1);
/// # Ok::<(), dexscope::Error>(())
/// ```
pub struct MethodProcessor {
    config: PipelineConfig,
    passes: Vec<Box<dyn MethodPass>>,
    events: EventLog,
}

impl MethodProcessor {
    /// Creates a processor running the passes enabled in `config`.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        let mut passes: Vec<Box<dyn MethodPass>> = vec![Box::new(BlockMakerPass)];
        if config.process_exceptions {
            passes.push(Box::new(ExceptionWiringPass));
        }
        if config.cleanup {
            passes.push(Box::new(CleanupPass));
        }
        if config.shrink {
            passes.push(Box::new(ShrinkPass));
        }
        Self {
            config,
            passes,
            events: EventLog::new(),
        }
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Names of the scheduled passes, in execution order.
    pub fn pass_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.passes.iter().map(|p| p.name())
    }

    /// Events recorded so far.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Processes one method. Returns `true` if the method ends up [`ProcessingState::Processed`].
    pub fn process(&self, method: &mut Method) -> bool {
        match method.state() {
            ProcessingState::Processed => return true,
            ProcessingState::Skipped | ProcessingState::Failed => return false,
            ProcessingState::Pending => {}
        }
        if method.is_no_code() {
            method.set_state(ProcessingState::Skipped);
            return false;
        }

        let ctx = PassContext::new(&self.config, &self.events);
        let _ = self
            .events
            .record(EventKind::MethodProcessingStarted)
            .method(method.name());

        match self.run_passes(method, &ctx) {
            Ok(()) => {
                method.set_state(ProcessingState::Processed);
                let _ = self
                    .events
                    .record(EventKind::MethodProcessingCompleted)
                    .method(method.name());
                true
            }
            Err(error) => {
                log::warn!("{}: {}", method.name(), error);
                let diagnostic = MethodDiagnostic::from_error(&error);
                let mut event = self
                    .events
                    .record(EventKind::MethodFailed)
                    .method(method.name())
                    .message(error.to_string());
                if let Some(block) = diagnostic.block {
                    event = event.location(block.index());
                }
                drop(event);

                method.add_diagnostic(diagnostic);
                method.unload_blocks();
                method.set_state(ProcessingState::Failed);
                false
            }
        }
    }

    /// Processes every method, on the rayon pool when [`PipelineConfig::parallel`] is set.
    pub fn process_all(&self, methods: &mut [Method]) -> ProcessingSummary {
        let states: Vec<ProcessingState> = if self.config.parallel {
            methods
                .par_iter_mut()
                .map(|method| {
                    self.process(method);
                    method.state()
                })
                .collect()
        } else {
            methods
                .iter_mut()
                .map(|method| {
                    self.process(method);
                    method.state()
                })
                .collect()
        };

        let mut summary = ProcessingSummary::default();
        for state in states {
            match state {
                ProcessingState::Processed => summary.processed += 1,
                ProcessingState::Skipped => summary.skipped += 1,
                ProcessingState::Failed | ProcessingState::Pending => summary.failed += 1,
            }
        }
        log::debug!(
            "processed {} methods ({} skipped, {} failed)",
            summary.total(),
            summary.skipped,
            summary.failed
        );
        summary
    }

    fn run_passes(&self, method: &mut Method, ctx: &PassContext<'_>) -> Result<()> {
        for pass in &self.passes {
            if !pass.should_run(method, ctx) {
                continue;
            }
            let changed = pass.run(method, ctx)?;
            log::trace!("{}: {} changed={}", method.name(), pass.name(), changed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{ArgType, MethodBuilder},
        DiagnosticKind,
    };

    fn simple(name: &str) -> Method {
        let mut b = MethodBuilder::new(name, ArgType::Void);
        b.invoke_static("work", vec![], None);
        b.ret(None);
        b.build().unwrap()
    }

    fn broken(name: &str) -> Method {
        let mut b = MethodBuilder::new(name, ArgType::Void);
        b.nop();
        b.ret(None);
        b.label("dead");
        b.ret(None);
        b.build().unwrap()
    }

    #[test]
    fn test_pass_list_follows_config() {
        let full = MethodProcessor::new(PipelineConfig::default());
        assert_eq!(
            full.pass_names().collect::<Vec<_>>(),
            vec!["block-maker", "exception-wiring", "cleanup", "shrink"]
        );
        let minimal = MethodProcessor::new(PipelineConfig::minimal());
        assert_eq!(minimal.pass_names().collect::<Vec<_>>(), vec!["block-maker"]);
    }

    #[test]
    fn test_process_marks_state() {
        let processor = MethodProcessor::new(PipelineConfig::sequential());
        let mut method = simple("ok");
        assert!(processor.process(&mut method));
        assert_eq!(method.state(), ProcessingState::Processed);
        assert!(processor.events().has(EventKind::MethodProcessingCompleted));

        let mut stub = Method::without_code("stub", ArgType::Void);
        assert!(!processor.process(&mut stub));
        assert_eq!(stub.state(), ProcessingState::Skipped);
    }

    #[test]
    fn test_failure_is_recorded_on_method() {
        let processor = MethodProcessor::new(PipelineConfig::sequential());
        let mut method = broken("broken");
        assert!(!processor.process(&mut method));

        assert_eq!(method.state(), ProcessingState::Failed);
        assert_eq!(method.block_count(), 0);
        assert_eq!(method.diagnostics().len(), 1);
        assert_eq!(
            method.diagnostics()[0].kind,
            DiagnosticKind::StructuralInconsistency
        );
        assert_eq!(processor.events().count_kind(EventKind::MethodFailed), 1);
    }

    #[test]
    fn test_process_all_isolates_failures() {
        for config in [PipelineConfig::default(), PipelineConfig::sequential()] {
            let processor = MethodProcessor::new(config);
            let mut methods = vec![
                simple("a"),
                broken("b"),
                Method::without_code("c", ArgType::Void),
                simple("d"),
            ];
            let summary = processor.process_all(&mut methods);
            assert_eq!(
                summary,
                ProcessingSummary {
                    processed: 2,
                    skipped: 1,
                    failed: 1
                }
            );
            assert_eq!(methods[1].state(), ProcessingState::Failed);
            assert_eq!(methods[3].state(), ProcessingState::Processed);
        }
    }
}
