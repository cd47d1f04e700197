//! ULR Engine - Unstructured Lumigraph Rendering for novel-view synthesis
//!
//! Given a set of calibrated source photographs, a rough proxy mesh and a novel
//! viewpoint, the engine selects the source cameras that best explain the new
//! view, reprojects a per-pixel world-position pre-pass into each of them,
//! rejects occluded or masked samples, and blends the survivors with continuous
//! view-dependent weights.
//!
//! Two execution paths share one data model:
//! - **CPU**: a deterministic reference of the whole pipeline, driven by a render
//!   graph (pre-pass, blend, Poisson seam filling, resolve)
//! - **wgpu**: a headless GPU implementation of the streaming renderer
//!
//! # Features
//! - Three interchangeable renderer variants (sequential, sampler array, streaming)
//! - Distance/angle, combined-score and all-active camera selection
//! - Bounded top-4 and full accumulate-and-normalize blending
//! - Multigrid Poisson seam filler

pub mod backend;
pub mod error;
pub mod pipeline;
pub mod render_graph;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod selection;
pub mod view;

pub use backend::wgpu_backend::{GpuContext, WgpuUlrRenderer};
pub use error::{UlrError, UlrResult};
pub use pipeline::{BlendDiscipline, BlendOutput, Coverage, RenderOutput};
pub use renderer::{BlendStrategy, DeviceLimits, UlrRenderer};
pub use resources::{DepthConvention, MaskSet, ProxyMesh, SourceImage, SourceImageBank, TextureData};
pub use scene::{Camera, CameraId, CameraRegistry, InputCamera, Projection};
pub use selection::{BoundedPolicy, RenderMode, SelectionObserver, SelectionSet, UsedCameraFlags};
pub use view::UlrView;

/// Renderer variant selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RendererVariant {
    /// One accumulation pass per selected camera, ping-ponging top-K buffers
    Sequential,
    /// Fixed-capacity array of per-camera samplers, compacted selection
    SamplerArray,
    /// Camera-info uniform array plus texture arrays, per-camera selected flags
    #[default]
    Streaming,
}

/// Configuration for a ULR view
#[derive(Debug, Clone)]
pub struct UlrConfig {
    /// Renderer variant
    pub variant: RendererVariant,
    /// Cameras kept by distance (bounded policies)
    pub num_dist_cams: usize,
    /// Cameras kept by angle (bounded policies)
    pub num_angle_cams: usize,
    /// Selection policy of the budgeted variants (sequential and sampler-array)
    pub bounded_policy: BoundedPolicy,
    /// Restriction applied after selection
    pub render_mode: RenderMode,
    /// Per-pixel accumulation discipline
    pub discipline: BlendDiscipline,
    /// Penalty at which full-accumulate weights reach zero
    pub max_blend_penalty: f32,
    pub occlusion_enabled: bool,
    /// Relative (world distance) or absolute (projective z) depth tolerance
    pub epsilon_occlusion: f32,
    pub masks_enabled: bool,
    pub masks_are_binary: bool,
    pub invert_masks: bool,
    /// Rejection threshold for continuous masks
    pub mask_threshold: f32,
    pub discard_black_pixels: bool,
    pub winner_takes_all: bool,
    /// Flip source images vertically on lookup
    pub flip_rgbs: bool,
    /// Output leading blend weights instead of colour
    pub show_weights: bool,
    pub poisson_blend_enabled: bool,
    pub poisson_levels: usize,
    pub poisson_iterations: usize,
    pub backface_culling: bool,
    pub gamma_correction: bool,
    /// Colour emitted where nothing is blended
    pub background: [f32; 4],
    /// Near plane used by the position pre-pass
    pub prepass_near: f32,
}

impl Default for UlrConfig {
    fn default() -> Self {
        Self {
            variant: RendererVariant::Streaming,
            num_dist_cams: 4,
            num_angle_cams: 4,
            bounded_policy: BoundedPolicy::DistanceAngle,
            render_mode: RenderMode::Standard,
            discipline: BlendDiscipline::BoundedTopK,
            max_blend_penalty: std::f32::consts::FRAC_PI_2,
            occlusion_enabled: true,
            epsilon_occlusion: 0.01,
            masks_enabled: false,
            masks_are_binary: true,
            invert_masks: false,
            mask_threshold: 0.5,
            discard_black_pixels: true,
            winner_takes_all: false,
            flip_rgbs: false,
            show_weights: false,
            poisson_blend_enabled: false,
            poisson_levels: 5,
            poisson_iterations: 2,
            backface_culling: true,
            gamma_correction: false,
            background: [0.0, 0.0, 0.0, 1.0],
            prepass_near: 0.001,
        }
    }
}

impl UlrConfig {
    /// Total camera budget of the bounded selection policies
    pub fn camera_budget(&self) -> usize {
        self.num_dist_cams + self.num_angle_cams
    }

    /// Reject option combinations that cannot produce a meaningful image
    pub fn validate(&self) -> UlrResult<()> {
        if !(self.epsilon_occlusion >= 0.0) {
            return Err(UlrError::InvalidConfig(format!(
                "epsilon_occlusion must be non-negative, got {}",
                self.epsilon_occlusion
            )));
        }
        if !(self.max_blend_penalty > 0.0) {
            return Err(UlrError::InvalidConfig(format!(
                "max_blend_penalty must be positive, got {}",
                self.max_blend_penalty
            )));
        }
        if !(0.0..=1.0).contains(&self.mask_threshold) {
            return Err(UlrError::InvalidConfig(format!(
                "mask_threshold must lie in [0, 1], got {}",
                self.mask_threshold
            )));
        }
        if !(self.prepass_near > 0.0) {
            return Err(UlrError::InvalidConfig(format!(
                "prepass_near must be positive, got {}",
                self.prepass_near
            )));
        }
        if self.poisson_blend_enabled && (self.poisson_levels == 0 || self.poisson_iterations == 0) {
            return Err(UlrError::InvalidConfig(
                "poisson blending needs at least one level and one iteration".into(),
            ));
        }
        if let RenderMode::EveryNth(0) = self.render_mode {
            return Err(UlrError::InvalidConfig("EveryNth step must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = UlrConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.camera_budget(), 8);
        assert_eq!(config.variant, RendererVariant::Streaming);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = UlrConfig {
            epsilon_occlusion: -1.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(UlrError::InvalidConfig(_))));

        let config = UlrConfig {
            render_mode: RenderMode::EveryNth(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = UlrConfig {
            poisson_blend_enabled: true,
            poisson_levels: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
