//! Sampler-array renderer: a compacted selection bound to fixed sampler slots

use super::{blend_per_pixel, check_capacity, BlendInputs, BlendStrategy, DeviceLimits};
use crate::error::UlrResult;
use crate::pipeline::blend::BlendAccumulator;
use crate::pipeline::BlendOutput;
use crate::scene::{Camera, CameraRegistry};
use crate::selection::{CameraSelector, SelectionPolicy, SelectionSet};
use crate::UlrConfig;

const TEXTURE_UNITS: &str = "max_sampled_textures_per_shader_stage";

/// Blends a bounded selection in one pass.
///
/// Every selected camera occupies one sampler slot (two with masks), so the
/// slot count is fixed when the renderer is built and selections never exceed
/// it.
#[derive(Debug, Clone)]
pub struct SamplerArrayRenderer {
    policy: SelectionPolicy,
    capacity: usize,
}

impl SamplerArrayRenderer {
    pub fn new(config: &UlrConfig, limits: &DeviceLimits) -> UlrResult<Self> {
        let capacity = limits.sampler_array_capacity(config.masks_enabled);
        check_capacity(config.camera_budget(), capacity, TEXTURE_UNITS)?;
        Ok(Self {
            policy: SelectionPolicy::bounded(
                config.bounded_policy,
                config.num_dist_cams,
                config.num_angle_cams,
            ),
            capacity,
        })
    }
}

impl BlendStrategy for SamplerArrayRenderer {
    fn name(&self) -> &'static str {
        "sampler array"
    }

    fn select(&self, registry: &CameraRegistry, eye: &Camera) -> SelectionSet {
        self.policy.select(registry, eye)
    }

    fn blend(&self, inputs: &BlendInputs) -> UlrResult<BlendOutput> {
        check_capacity(inputs.selection.len(), self.capacity, TEXTURE_UNITS)?;

        // Slots are bound in ascending camera id
        let slots: Vec<_> = inputs
            .selection
            .sorted()
            .into_iter()
            .filter_map(|id| inputs.source(id))
            .collect();

        let params = inputs.params;
        Ok(blend_per_pixel(inputs, |kernel, point| {
            let mut acc = BlendAccumulator::new(params.discipline);
            for (camera, image, mask) in &slots {
                if let Some(sample) = kernel.sample(camera, image, *mask, point, inputs.eye_position) {
                    acc.push(sample, &params);
                }
            }
            acc.resolve(&params)
        }))
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.capacity)
    }
}
