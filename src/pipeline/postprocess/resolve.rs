//! Final resolve: gamma, background and the external frame output

use crate::error::UlrResult;
use crate::pipeline::{BlendOutput, Coverage};
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use glam::{Vec3, Vec4};
use std::any::Any;

/// Display gamma applied when gamma correction is enabled
pub const GAMMA: f32 = 2.2;

/// Resolve settings taken from the frame config
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolveSettings {
    pub gamma_correction: bool,
    pub show_weights: bool,
    pub background: Vec4,
    /// Whether unblended pixels carry filled colour instead of background
    pub filled: bool,
}

/// Encode linear colour for display
#[inline]
pub fn gamma_encode(color: Vec3) -> Vec3 {
    color.max(Vec3::ZERO).powf(1.0 / GAMMA)
}

/// Produce the final image from a composite
pub fn resolve(input: &BlendOutput, settings: &ResolveSettings) -> BlendOutput {
    let mut output = input.clone();
    for (texel, coverage) in output.color.texels.iter_mut().zip(&input.coverage.texels) {
        *texel = match coverage {
            Coverage::NoGeometry => settings.background,
            Coverage::Unblended if !settings.filled => settings.background,
            _ if settings.gamma_correction && !settings.show_weights => {
                gamma_encode(texel.truncate()).extend(texel.w)
            }
            _ => *texel,
        };
    }
    output.color.name = "frame_output".to_string();
    output
}

/// Resolve pass writing the external frame output
pub struct ResolvePass {
    input: ResourceId,
    output: ResourceId,
    filled: bool,
}

impl ResolvePass {
    pub fn new(input: ResourceId, output: ResourceId, filled: bool) -> Self {
        Self {
            input,
            output,
            filled,
        }
    }
}

impl RenderPass for ResolvePass {
    fn name(&self) -> &str {
        "Resolve"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.input, ResourceUsage::TextureRead);
        ctx.write(self.output, ResourceUsage::RenderTarget);
    }

    fn execute(&self, ctx: &mut PassExecuteContext) -> UlrResult<()> {
        let config = ctx.frame.config;
        let settings = ResolveSettings {
            gamma_correction: config.gamma_correction,
            show_weights: config.show_weights,
            background: Vec4::from_array(config.background),
            filled: self.filled,
        };
        let output = resolve(ctx.resources.blend(self.input)?, &settings);
        ctx.resources.insert(self.output, FrameImage::Blend(output))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::TextureData;

    fn settings() -> ResolveSettings {
        ResolveSettings {
            gamma_correction: true,
            show_weights: false,
            background: Vec4::new(0.2, 0.2, 0.2, 1.0),
            filled: false,
        }
    }

    fn input() -> BlendOutput {
        let mut out = BlendOutput::background(3, 1, Vec4::ZERO);
        out.color.texels = vec![Vec4::splat(0.25), Vec4::splat(0.25), Vec4::splat(0.25)];
        out.coverage = TextureData::from_fn(3, 1, "cov", |x, _| match x {
            0 => Coverage::NoGeometry,
            1 => Coverage::Unblended,
            _ => Coverage::Blended,
        });
        out
    }

    #[test]
    fn test_background_and_gamma() {
        let s = settings();
        let out = resolve(&input(), &s);
        assert_eq!(out.color.get(0, 0), s.background);
        assert_eq!(out.color.get(1, 0), s.background);
        let expected = 0.25f32.powf(1.0 / GAMMA);
        assert!((out.color.get(2, 0).x - expected).abs() < 1e-6);
    }

    #[test]
    fn test_filled_pixels_are_kept() {
        let s = ResolveSettings {
            filled: true,
            gamma_correction: false,
            ..settings()
        };
        let out = resolve(&input(), &s);
        assert_eq!(out.color.get(1, 0), Vec4::splat(0.25));
    }
}
