//! Uniform records shared between the host and the WGSL shaders

use crate::pipeline::blend::BlendParams;
use crate::pipeline::postprocess::{ResolveSettings, Stencil};
use crate::pipeline::BlendDiscipline;
use crate::resources::DepthConvention;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

// Bits of `BlendUniforms::counts.y`
pub const FLAG_OCCLUSION: u32 = 1 << 0;
pub const FLAG_MASKS: u32 = 1 << 1;
pub const FLAG_BINARY_MASK: u32 = 1 << 2;
pub const FLAG_INVERT_MASK: u32 = 1 << 3;
pub const FLAG_DISCARD_BLACK: u32 = 1 << 4;
pub const FLAG_WTA: u32 = 1 << 5;
pub const FLAG_FLIP_RGB: u32 = 1 << 6;
pub const FLAG_SHOW_WEIGHTS: u32 = 1 << 7;

pub const DISCIPLINE_TOP_K: u32 = 0;
pub const DISCIPLINE_FULL: u32 = 1;

pub const DEPTH_WORLD_DISTANCE: u32 = 0;
pub const DEPTH_PROJECTIVE_Z: u32 = 1;

/// Pre-pass uniform
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PrepassUniforms {
    pub view_proj: Mat4,
}

/// Blend pass uniform (64 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BlendUniforms {
    pub eye_pos: Vec4,
    pub background: Vec4,
    /// x: epsilon_occlusion, y: mask_threshold, z: max_blend_penalty
    pub params: Vec4,
    /// x: camera count, y: flags, z: discipline, w: depth convention
    pub counts: [u32; 4],
}

impl BlendUniforms {
    pub fn new(
        params: &BlendParams,
        eye_position: Vec3,
        background: Vec4,
        camera_count: u32,
        masks_bound: bool,
    ) -> Self {
        let mut flags = 0;
        let mut set = |enabled: bool, flag: u32| {
            if enabled {
                flags |= flag;
            }
        };
        set(params.occlusion_enabled, FLAG_OCCLUSION);
        set(params.masks_enabled && masks_bound, FLAG_MASKS);
        set(params.masks_are_binary, FLAG_BINARY_MASK);
        set(params.invert_masks, FLAG_INVERT_MASK);
        set(params.discard_black_pixels, FLAG_DISCARD_BLACK);
        set(params.winner_takes_all, FLAG_WTA);
        set(params.flip_rgbs, FLAG_FLIP_RGB);
        set(params.show_weights, FLAG_SHOW_WEIGHTS);

        let discipline = match params.discipline {
            BlendDiscipline::BoundedTopK => DISCIPLINE_TOP_K,
            BlendDiscipline::FullAccumulate => DISCIPLINE_FULL,
        };
        let convention = match params.convention {
            DepthConvention::WorldDistance => DEPTH_WORLD_DISTANCE,
            DepthConvention::ProjectiveZ => DEPTH_PROJECTIVE_Z,
        };

        Self {
            eye_pos: eye_position.extend(1.0),
            background,
            params: Vec4::new(
                params.epsilon_occlusion,
                params.mask_threshold,
                params.max_blend_penalty,
                0.0,
            ),
            counts: [camera_count, flags, discipline, convention],
        }
    }

    pub fn flags(&self) -> u32 {
        self.counts[1]
    }
}

/// Resolve pass uniform
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ResolveUniforms {
    pub background: Vec4,
    /// x: gamma correction, y: show weights, z: filled
    pub flags: [u32; 4],
}

impl From<&ResolveSettings> for ResolveUniforms {
    fn from(settings: &ResolveSettings) -> Self {
        Self {
            background: settings.background,
            flags: [
                settings.gamma_correction as u32,
                settings.show_weights as u32,
                settings.filled as u32,
                0,
            ],
        }
    }
}

/// Per-dispatch uniform of the Poisson compute kernels
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PoissonUniforms {
    /// x: xh, y: centre, z: edge, w: corner
    pub stencil: Vec4,
    /// xy: output size, zw: input size
    pub sizes: [u32; 4],
}

impl PoissonUniforms {
    pub fn sizes(output: (u32, u32), input: (u32, u32)) -> Self {
        Self {
            stencil: Vec4::ZERO,
            sizes: [output.0, output.1, input.0, input.1],
        }
    }

    pub fn relax(size: (u32, u32), stencil: &Stencil, iteration: usize) -> Self {
        Self {
            stencil: Vec4::new(stencil.xh(iteration), stencil.center, stencil.edge, stencil.corner),
            sizes: [size.0, size.1, size.0, size.1],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UlrConfig;

    #[test]
    fn test_uniform_sizes() {
        assert_eq!(std::mem::size_of::<PrepassUniforms>(), 64);
        assert_eq!(std::mem::size_of::<BlendUniforms>(), 64);
        assert_eq!(std::mem::size_of::<ResolveUniforms>(), 32);
        assert_eq!(std::mem::size_of::<PoissonUniforms>(), 32);
    }

    #[test]
    fn test_blend_flags_follow_config() {
        let config = UlrConfig {
            masks_enabled: true,
            winner_takes_all: true,
            ..Default::default()
        };
        let params = BlendParams::from_config(&config, DepthConvention::ProjectiveZ);
        let uniforms = BlendUniforms::new(&params, Vec3::ZERO, Vec4::ZERO, 3, false);
        let flags = uniforms.flags();
        assert_ne!(flags & FLAG_OCCLUSION, 0);
        assert_ne!(flags & FLAG_WTA, 0);
        assert_ne!(flags & FLAG_DISCARD_BLACK, 0);
        // No masks were uploaded
        assert_eq!(flags & FLAG_MASKS, 0);
        assert_eq!(uniforms.counts[0], 3);
        assert_eq!(uniforms.counts[3], DEPTH_PROJECTIVE_Z);
    }
}
