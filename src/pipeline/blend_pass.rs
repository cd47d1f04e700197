//! ULR blend pass: hands the pre-pass to the configured renderer variant

use super::blend::BlendParams;
use crate::error::UlrResult;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::renderer::{BlendInputs, BlendStrategy};
use glam::Vec4;
use std::any::Any;

/// Per-pixel blend of the selected cameras
pub struct UlrBlendPass {
    positions: ResourceId,
    composite: Option<ResourceId>,
}

impl UlrBlendPass {
    pub fn new(positions: ResourceId) -> Self {
        Self {
            positions,
            composite: None,
        }
    }

    pub fn composite(&self) -> Option<ResourceId> {
        self.composite
    }
}

impl RenderPass for UlrBlendPass {
    fn name(&self) -> &str {
        "ULR Blend"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.positions, ResourceUsage::TextureRead);
        let composite = ctx.create_texture("ulr_composite", FrameFormat::Blend);
        self.composite = Some(composite);
        ctx.write(composite, ResourceUsage::RenderTarget);
    }

    fn execute(&self, ctx: &mut PassExecuteContext) -> UlrResult<()> {
        let Some(composite) = self.composite else {
            return Ok(());
        };
        let frame = ctx.frame;
        let params = BlendParams::from_config(frame.config, frame.bank.convention());
        let output = {
            let positions = ctx.resources.positions(self.positions)?;
            let inputs = BlendInputs {
                registry: frame.registry,
                bank: frame.bank,
                masks: frame.masks,
                positions,
                eye_position: frame.eye.position,
                selection: frame.selection,
                params,
                background: Vec4::from_array(frame.config.background),
            };
            frame.renderer.blend(&inputs)?
        };
        log::debug!(
            "{} blended {} pixels from {} cameras",
            frame.renderer.name(),
            output.count(super::Coverage::Blended),
            frame.selection.len()
        );

        ctx.resources.insert(composite, FrameImage::Blend(output))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
