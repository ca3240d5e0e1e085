//! The pass trait and the built-in reconstruction passes.

use crate::{
    analysis::{blocks, cleanup, exceptions, normalize, shrink},
    ir::Method,
    pipeline::{EventKind, PassContext},
    Result,
};

/// One step of the per-method pipeline.
///
/// Passes must be thread-safe (Send + Sync) since [`crate::pipeline::MethodProcessor`] runs
/// methods on the rayon pool. A pass receives exclusive access to one method and shared access
/// to the configuration and event log.
pub trait MethodPass: Send + Sync {
    /// Unique name for logging and debugging.
    fn name(&self) -> &'static str;

    /// Should this pass run on a specific method?
    ///
    /// Called before [`MethodPass::run`]. Override to skip methods the pass has nothing to do
    /// for.
    fn should_run(&self, _method: &Method, _ctx: &PassContext<'_>) -> bool {
        true
    }

    /// Runs the pass on a single method.
    ///
    /// Returns `true` if the method changed. Events should be recorded to `ctx.events`.
    ///
    /// # Errors
    ///
    /// Returns an error if the method's block graph is structurally broken.
    fn run(&self, method: &mut Method, ctx: &PassContext<'_>) -> Result<bool>;

    /// Get a description of what this pass does.
    fn description(&self) -> &'static str {
        "No description available"
    }
}

/// Builds blocks, computes dominance and normalizes the graph.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlockMakerPass;

impl MethodPass for BlockMakerPass {
    fn name(&self) -> &'static str {
        "block-maker"
    }

    fn run(&self, method: &mut Method, ctx: &PassContext<'_>) -> Result<bool> {
        blocks::build_blocks(method)?;
        normalize::process_blocks_tree(method, ctx)?;
        blocks::init_if_branches(method);

        let _ = ctx
            .events
            .record(EventKind::BlocksBuilt)
            .method(method.name())
            .pass(self.name())
            .message(format!(
                "{} blocks, {} loops, {} exits",
                method.block_count(),
                method.loops().len(),
                method.exit_blocks().len()
            ));
        Ok(true)
    }

    fn description(&self) -> &'static str {
        "Partitions instructions into blocks and normalizes loops and exits"
    }
}

/// Attaches exception handlers to the finished block graph.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExceptionWiringPass;

impl MethodPass for ExceptionWiringPass {
    fn name(&self) -> &'static str {
        "exception-wiring"
    }

    fn should_run(&self, method: &Method, _ctx: &PassContext<'_>) -> bool {
        method.try_blocks().next().is_some()
    }

    fn run(&self, method: &mut Method, ctx: &PassContext<'_>) -> Result<bool> {
        exceptions::process_exceptions(method, ctx)?;
        Ok(true)
    }

    fn description(&self) -> &'static str {
        "Binds handlers, merges rethrow chains and removes dead rethrows"
    }
}

/// Drops NOP and GOTO instructions.
#[derive(Debug, Default, Clone, Copy)]
pub struct CleanupPass;

impl MethodPass for CleanupPass {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    fn run(&self, method: &mut Method, ctx: &PassContext<'_>) -> Result<bool> {
        Ok(cleanup::remove_redundant(method, ctx))
    }

    fn description(&self) -> &'static str {
        "Removes instructions already encoded by block edges"
    }
}

/// Folds single-use definitions into expression trees.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShrinkPass;

impl MethodPass for ShrinkPass {
    fn name(&self) -> &'static str {
        "shrink"
    }

    fn run(&self, method: &mut Method, ctx: &PassContext<'_>) -> Result<bool> {
        Ok(shrink::shrink_method(method, ctx))
    }

    fn description(&self) -> &'static str {
        "Inlines single-use values into their consumer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{ArgType, MethodBuilder},
        pipeline::{EventLog, PipelineConfig},
    };

    #[test]
    fn test_block_maker_records_event() {
        let mut b = MethodBuilder::new("m", ArgType::Void);
        b.nop();
        b.ret(None);
        let mut method = b.build().unwrap();

        let events = EventLog::new();
        let config = PipelineConfig::default();
        let ctx = PassContext::new(&config, &events);
        assert!(BlockMakerPass.run(&mut method, &ctx).unwrap());
        assert_eq!(method.block_count(), 2);

        let event = events.filter_kind(EventKind::BlocksBuilt).next().unwrap();
        assert_eq!(event.pass, Some("block-maker"));
        assert_eq!(event.message, "2 blocks, 0 loops, 1 exits");
    }

    #[test]
    fn test_exception_wiring_skips_unprotected_methods() {
        let mut b = MethodBuilder::new("m", ArgType::Void);
        b.ret(None);
        let method = b.build().unwrap();

        let events = EventLog::new();
        let config = PipelineConfig::default();
        let ctx = PassContext::new(&config, &events);
        assert!(!ExceptionWiringPass.should_run(&method, &ctx));
        assert!(CleanupPass.should_run(&method, &ctx));
    }
}
