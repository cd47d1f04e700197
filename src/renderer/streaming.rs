//! Streaming renderer: every camera resident, per-frame selected flags

use super::{blend_per_pixel, check_capacity, BlendInputs, BlendStrategy, DeviceLimits};
use crate::error::UlrResult;
use crate::pipeline::blend::BlendAccumulator;
use crate::pipeline::BlendOutput;
use crate::scene::{Camera, CameraInfo, CameraRegistry};
use crate::selection::{AllActiveSelector, CameraSelector, SelectionSet};

/// Holds one record and one array layer per registry camera.
///
/// Selection only toggles the `selected` flag of each record; the blend
/// iterates the whole camera array and skips unselected entries per pixel.
#[derive(Debug, Clone)]
pub struct StreamingRenderer {
    selector: AllActiveSelector,
    capacity: usize,
}

impl StreamingRenderer {
    pub fn new(limits: &DeviceLimits, registry: &CameraRegistry) -> UlrResult<Self> {
        let capacity = limits.streaming_capacity();
        let limit = if capacity == limits.max_texture_array_layers as usize {
            "max_texture_array_layers"
        } else {
            "max_uniform_buffer_binding_size"
        };
        check_capacity(registry.len(), capacity, limit)?;
        Ok(Self {
            selector: AllActiveSelector,
            capacity,
        })
    }

    /// Camera-info records for a selection, indexed by camera id
    pub fn camera_infos(registry: &CameraRegistry, selection: &SelectionSet) -> Vec<CameraInfo> {
        let flags = selection.flags(registry.len());
        registry
            .cameras()
            .iter()
            .zip(flags)
            .map(|(camera, selected)| camera.info(selected))
            .collect()
    }
}

impl BlendStrategy for StreamingRenderer {
    fn name(&self) -> &'static str {
        "streaming"
    }

    fn select(&self, registry: &CameraRegistry, eye: &Camera) -> SelectionSet {
        self.selector.select(registry, eye)
    }

    fn blend(&self, inputs: &BlendInputs) -> UlrResult<BlendOutput> {
        check_capacity(inputs.registry.len(), self.capacity, "camera records")?;

        let infos = Self::camera_infos(inputs.registry, inputs.selection);
        let params = inputs.params;
        Ok(blend_per_pixel(inputs, |kernel, point| {
            let mut acc = BlendAccumulator::new(params.discipline);
            for (id, info) in infos.iter().enumerate() {
                if info.selected == 0 {
                    continue;
                }
                let Some((camera, image, mask)) = inputs.source(id as u32) else {
                    continue;
                };
                if let Some(sample) = kernel.sample(camera, image, mask, point, inputs.eye_position) {
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
