//! ULR renderer variants
//!
//! - [`SequentialRenderer`]: one pass per selected camera over ping-ponged accumulators
//! - [`SamplerArrayRenderer`]: a fixed array of per-camera samplers, compacted selection
//! - [`StreamingRenderer`]: camera-info records for every camera, selected flags per frame

mod capacity;
mod sampler_array;
mod sequential;
mod streaming;

pub use capacity::{check_capacity, DeviceLimits, CAMERA_RECORD_BYTES};
pub use sampler_array::SamplerArrayRenderer;
pub use sequential::SequentialRenderer;
pub use streaming::StreamingRenderer;

use crate::error::UlrResult;
use crate::pipeline::blend::{finish_pixel, BlendKernel, BlendParams, Resolved};
use crate::pipeline::depth_prepass::is_background;
use crate::pipeline::{BlendOutput, Coverage, PositionBuffer};
use crate::resources::{MaskSet, SourceImage, TextureData};
use crate::scene::{Camera, CameraRegistry, InputCamera};
use crate::selection::SelectionSet;
use crate::{RendererVariant, UlrConfig};
use glam::{Vec3, Vec4};

/// Everything the blend stage of one frame reads
pub struct BlendInputs<'a> {
    pub registry: &'a CameraRegistry,
    pub bank: &'a crate::resources::SourceImageBank,
    pub masks: Option<&'a MaskSet>,
    pub positions: &'a PositionBuffer,
    pub eye_position: Vec3,
    pub selection: &'a SelectionSet,
    pub params: BlendParams,
    pub background: Vec4,
}

impl<'a> BlendInputs<'a> {
    /// Camera, images and mask of a selected id, skipping ids the bank lacks
    pub(crate) fn source(
        &self,
        id: crate::scene::CameraId,
    ) -> Option<(&'a InputCamera, &'a SourceImage, Option<&'a TextureData<f32>>)> {
        let camera = self.registry.get(id)?;
        let image = self.bank.get(id)?;
        let mask = self.masks.and_then(|m| m.get(id));
        Some((camera, image, mask))
    }
}

/// A way of choosing cameras and blending them into a composite
pub trait BlendStrategy {
    fn name(&self) -> &'static str;

    /// Cameras to blend for a novel viewpoint
    fn select(&self, registry: &CameraRegistry, eye: &Camera) -> SelectionSet;

    /// Blend the selected cameras over the pre-pass positions
    fn blend(&self, inputs: &BlendInputs) -> UlrResult<BlendOutput>;

    /// Most cameras a selection may hold, when bounded
    fn capacity(&self) -> Option<usize>;
}

/// The configured renderer variant
#[derive(Debug, Clone)]
pub enum UlrRenderer {
    Sequential(SequentialRenderer),
    SamplerArray(SamplerArrayRenderer),
    Streaming(StreamingRenderer),
}

impl UlrRenderer {
    /// Build the variant named by the config, checking its capacity up front
    pub fn new(config: &UlrConfig, limits: &DeviceLimits, registry: &CameraRegistry) -> UlrResult<Self> {
        let renderer = match config.variant {
            RendererVariant::Sequential => UlrRenderer::Sequential(SequentialRenderer::new(config)),
            RendererVariant::SamplerArray => {
                UlrRenderer::SamplerArray(SamplerArrayRenderer::new(config, limits)?)
            }
            RendererVariant::Streaming => {
                UlrRenderer::Streaming(StreamingRenderer::new(limits, registry)?)
            }
        };
        log::info!(
            "Created {} renderer (capacity: {})",
            renderer.name(),
            renderer
                .capacity()
                .map_or_else(|| "unbounded".to_string(), |c| c.to_string())
        );
        Ok(renderer)
    }

    pub fn variant(&self) -> RendererVariant {
        match self {
            UlrRenderer::Sequential(_) => RendererVariant::Sequential,
            UlrRenderer::SamplerArray(_) => RendererVariant::SamplerArray,
            UlrRenderer::Streaming(_) => RendererVariant::Streaming,
        }
    }
}

impl BlendStrategy for UlrRenderer {
    fn name(&self) -> &'static str {
        match self {
            UlrRenderer::Sequential(r) => r.name(),
            UlrRenderer::SamplerArray(r) => r.name(),
            UlrRenderer::Streaming(r) => r.name(),
        }
    }

    fn select(&self, registry: &CameraRegistry, eye: &Camera) -> SelectionSet {
        match self {
            UlrRenderer::Sequential(r) => r.select(registry, eye),
            UlrRenderer::SamplerArray(r) => r.select(registry, eye),
            UlrRenderer::Streaming(r) => r.select(registry, eye),
        }
    }

    fn blend(&self, inputs: &BlendInputs) -> UlrResult<BlendOutput> {
        match self {
            UlrRenderer::Sequential(r) => r.blend(inputs),
            UlrRenderer::SamplerArray(r) => r.blend(inputs),
            UlrRenderer::Streaming(r) => r.blend(inputs),
        }
    }

    fn capacity(&self) -> Option<usize> {
        match self {
            UlrRenderer::Sequential(r) => r.capacity(),
            UlrRenderer::SamplerArray(r) => r.capacity(),
            UlrRenderer::Streaming(r) => r.capacity(),
        }
    }
}

/// Run `shade` on every geometry pixel of the pre-pass, single pass
pub(crate) fn blend_per_pixel(
    inputs: &BlendInputs,
    mut shade: impl FnMut(&BlendKernel, Vec3) -> Option<Resolved>,
) -> BlendOutput {
    let (width, height) = inputs.positions.dimensions();
    let kernel = BlendKernel::new(inputs.params);
    let mut output = BlendOutput::background(width, height, inputs.background);

    for (i, texel) in inputs.positions.texels.iter().enumerate() {
        if is_background(*texel) {
            continue;
        }
        let resolved = shade(&kernel, texel.truncate());
        let (color, coverage) = finish_pixel(resolved, &inputs.params, inputs.background);
        output.color.texels[i] = color;
        output.coverage.texels[i] = coverage;
    }
    output
}

/// Count of each coverage class, for logging
pub(crate) fn coverage_summary(output: &BlendOutput) -> (usize, usize, usize) {
    (
        output.count(Coverage::Blended),
        output.count(Coverage::Unblended),
        output.count(Coverage::NoGeometry),
    )
}
