//! Render graph executor

use crate::error::{UlrError, UlrResult};
use crate::render_graph::graph::*;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::time::Instant;

/// Executor for running the compiled render graph
pub struct RenderGraphExecutor {
    /// Frame data produced by the passes of the current frame
    resources: FrameResources,
}

impl RenderGraphExecutor {
    pub fn new() -> Self {
        Self {
            resources: FrameResources::new(),
        }
    }

    /// Execute the render graph.
    ///
    /// Transient images are dropped once the last pass reading them has run;
    /// external resources stay until taken with [`Self::take_output`].
    pub fn execute(
        &mut self,
        graph: &RenderGraph,
        compiled: &CompiledGraph,
        frame: &FrameInputs,
        width: u32,
        height: u32,
    ) -> UlrResult<()> {
        self.resources.clear();
        for resource in graph.resources() {
            self.resources.declare(resource);
        }

        for (step, &pass_id) in compiled.pass_order.iter().enumerate() {
            let pass = graph
                .get_pass(pass_id)
                .ok_or_else(|| UlrError::MissingResource(format!("pass {:?}", pass_id)))?;

            let start = Instant::now();
            {
                let mut ctx = PassExecuteContext {
                    frame,
                    width,
                    height,
                    resources: &mut self.resources,
                };
                pass.execute(&mut ctx)?;
            }
            log::debug!(
                "Pass '{}' took {:.3} ms",
                pass.name(),
                start.elapsed().as_secs_f64() * 1000.0
            );

            for (&id, lifetime) in &compiled.resource_lifetimes {
                if lifetime.last_use == step && !graph.is_external(id) {
                    self.resources.take(id);
                }
            }
        }

        Ok(())
    }

    /// Take an image out of the executor (usually the external frame output)
    pub fn take_output(&mut self, id: ResourceId) -> UlrResult<FrameImage> {
        self.resources
            .take(id)
            .ok_or_else(|| UlrError::MissingResource(format!("output #{}", id.0)))
    }

    /// Whether an image is currently held for the resource
    pub fn holds(&self, id: ResourceId) -> bool {
        self.resources.contains(id)
    }

    /// Drop everything from the last frame
    pub fn cleanup(&mut self) {
        self.resources.clear();
    }
}

impl Default for RenderGraphExecutor {
    fn default() -> Self {
        Self::new()
    }
}
