//! Device limits and the camera capacity they allow

use crate::error::{UlrError, UlrResult};
use crate::scene::CameraInfo;

/// Bytes of one camera record in the camera-info uniform array
pub const CAMERA_RECORD_BYTES: usize = std::mem::size_of::<CameraInfo>();

/// The device limits that bound how many cameras a renderer can blend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_sampled_textures_per_shader_stage: u32,
    pub max_texture_array_layers: u32,
    pub max_uniform_buffer_binding_size: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self::from(&wgpu::Limits::default())
    }
}

impl From<&wgpu::Limits> for DeviceLimits {
    fn from(limits: &wgpu::Limits) -> Self {
        Self {
            max_sampled_textures_per_shader_stage: limits.max_sampled_textures_per_shader_stage,
            max_texture_array_layers: limits.max_texture_array_layers,
            max_uniform_buffer_binding_size: limits.max_uniform_buffer_binding_size,
        }
    }
}

impl DeviceLimits {
    /// Cameras a sampler-array shader can bind: one texture unit each, two with masks
    pub fn sampler_array_capacity(&self, masks_enabled: bool) -> usize {
        let per_camera = if masks_enabled { 2 } else { 1 };
        self.max_sampled_textures_per_shader_stage as usize / per_camera
    }

    /// Cameras the streaming renderer can hold: one array layer and one record each
    pub fn streaming_capacity(&self) -> usize {
        let by_records = self.max_uniform_buffer_binding_size as usize / CAMERA_RECORD_BYTES;
        (self.max_texture_array_layers as usize).min(by_records)
    }
}

/// Fail when `requested` cameras do not fit `capacity`
pub fn check_capacity(requested: usize, capacity: usize, limit: &'static str) -> UlrResult<()> {
    if requested > capacity {
        return Err(UlrError::CapacityExceeded {
            requested,
            capacity,
            limit,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_array_capacity_halves_with_masks() {
        let limits = DeviceLimits {
            max_sampled_textures_per_shader_stage: 16,
            max_texture_array_layers: 256,
            max_uniform_buffer_binding_size: 16384,
        };
        assert_eq!(limits.sampler_array_capacity(false), 16);
        assert_eq!(limits.sampler_array_capacity(true), 8);
    }

    #[test]
    fn test_streaming_capacity_takes_smaller_limit() {
        let limits = DeviceLimits {
            max_sampled_textures_per_shader_stage: 16,
            max_texture_array_layers: 256,
            max_uniform_buffer_binding_size: 16384,
        };
        // 16384 / 96 = 170 records
        assert_eq!(limits.streaming_capacity(), 170);

        let layers_bound = DeviceLimits {
            max_texture_array_layers: 64,
            ..limits
        };
        assert_eq!(layers_bound.streaming_capacity(), 64);
    }

    #[test]
    fn test_default_limits_fit_default_budget() {
        let limits = DeviceLimits::default();
        assert!(limits.sampler_array_capacity(false) >= 8);
        assert!(check_capacity(9, 8, "test").is_err());
        assert!(check_capacity(8, 8, "test").is_ok());
    }
}
