//! ULR frame pipeline
//!
//! A frame is a small render graph:
//! 1. Depth pre-pass - world positions of the proxy seen from the novel view
//! 2. Blend pass - per-pixel multi-camera blending by the configured renderer
//! 3. Poisson pass (optional) - fills unblended holes and seams
//! 4. Resolve pass - gamma and final output

pub mod blend;
pub mod blend_pass;
pub mod depth_prepass;
pub mod postprocess;

pub use blend_pass::UlrBlendPass;
pub use depth_prepass::{DepthPrepass, Rasterizer};

use crate::error::{UlrError, UlrResult};
use crate::render_graph::{PassType, RenderGraph, ResourceId};
use crate::resources::TextureData;
use crate::selection::SelectionSet;
use crate::UlrConfig;
use glam::Vec4;
use postprocess::{PoissonConfig, PoissonPass, ResolvePass};

/// Per-pixel world position (xyz) and NDC depth (w) of the novel view
pub type PositionBuffer = TextureData<Vec4>;

/// Per-pixel accumulation discipline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendDiscipline {
    /// Keep the four lowest-penalty samples; the fourth sets the taper threshold
    #[default]
    BoundedTopK,
    /// Sum every valid sample, tapered at `max_blend_penalty`, then normalize
    FullAccumulate,
}

/// What happened at a composite pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum Coverage {
    /// The pre-pass found no proxy geometry
    #[default]
    NoGeometry,
    /// Geometry, but no camera contributed
    Unblended,
    /// At least one camera contributed
    Blended,
}

impl Coverage {
    /// Alpha encoding used by the GPU blend target
    pub fn alpha(self) -> f32 {
        match self {
            Coverage::NoGeometry => 0.0,
            Coverage::Unblended => 0.5,
            Coverage::Blended => 1.0,
        }
    }

    pub fn from_alpha(alpha: f32) -> Self {
        if alpha > 0.75 {
            Coverage::Blended
        } else if alpha > 0.25 {
            Coverage::Unblended
        } else {
            Coverage::NoGeometry
        }
    }

    pub fn has_geometry(self) -> bool {
        self != Coverage::NoGeometry
    }
}

/// Composite image of the blend pass
#[derive(Debug, Clone, PartialEq)]
pub struct BlendOutput {
    pub color: TextureData<Vec4>,
    pub coverage: TextureData<Coverage>,
}

impl BlendOutput {
    /// Every pixel set to `background` with no geometry
    pub fn background(width: u32, height: u32, background: Vec4) -> Self {
        Self {
            color: TextureData::new(width, height, background, "composite"),
            coverage: TextureData::new(width, height, Coverage::NoGeometry, "coverage"),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.color.dimensions()
    }

    /// Number of pixels with the given coverage
    pub fn count(&self, coverage: Coverage) -> usize {
        self.coverage.texels.iter().filter(|&&c| c == coverage).count()
    }
}

/// Result of rendering one novel view
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub image: TextureData<Vec4>,
    pub selection: SelectionSet,
    pub coverage: TextureData<Coverage>,
}

/// Resources created by the ULR frame graph
#[derive(Debug, Clone, Copy)]
pub struct UlrFrameResources {
    pub positions: ResourceId,
    pub composite: ResourceId,
    pub filled: Option<ResourceId>,
    pub output: ResourceId,
}

/// Build the ULR frame graph.
///
/// Passes size their images from the execute context, so one graph serves
/// every output resolution.
pub fn build_ulr_graph(config: &UlrConfig) -> UlrResult<(RenderGraph, UlrFrameResources)> {
    let mut graph = RenderGraph::new();

    // Final image handed back to the caller
    let output = graph.register_external("frame_output");

    let prepass_id = graph.add_pass(DepthPrepass::new(), PassType::Graphics);
    let positions = graph
        .get_pass_as::<DepthPrepass>(prepass_id)
        .and_then(DepthPrepass::positions)
        .ok_or_else(|| UlrError::MissingResource("prepass_positions".into()))?;

    let blend_id = graph.add_pass(UlrBlendPass::new(positions), PassType::Graphics);
    let composite = graph
        .get_pass_as::<UlrBlendPass>(blend_id)
        .and_then(UlrBlendPass::composite)
        .ok_or_else(|| UlrError::MissingResource("ulr_composite".into()))?;

    let filled = if config.poisson_blend_enabled {
        let poisson = PoissonPass::new(composite, PoissonConfig::from_config(config));
        let poisson_id = graph.add_pass(poisson, PassType::Compute);
        let filled = graph
            .get_pass_as::<PoissonPass>(poisson_id)
            .and_then(PoissonPass::filled)
            .ok_or_else(|| UlrError::MissingResource("poisson_filled".into()))?;
        Some(filled)
    } else {
        None
    };

    let resolve = ResolvePass::new(filled.unwrap_or(composite), output, filled.is_some());
    graph.add_pass(resolve, PassType::Graphics);

    Ok((
        graph,
        UlrFrameResources {
            positions,
            composite,
            filled,
            output,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_orders_passes() {
        let config = UlrConfig {
            poisson_blend_enabled: true,
            ..Default::default()
        };
        let (graph, resources) = build_ulr_graph(&config).unwrap();
        let compiled = graph.compile().unwrap();
        let names: Vec<&str> = compiled
            .pass_order
            .iter()
            .filter_map(|&id| graph.get_pass_node(id))
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(names, vec!["Depth Prepass", "ULR Blend", "Poisson Fill", "Resolve"]);
        assert!(resources.filled.is_some());
        assert!(graph.is_external(resources.output));
    }

    #[test]
    fn test_graph_without_poisson() {
        let (graph, resources) = build_ulr_graph(&UlrConfig::default()).unwrap();
        assert_eq!(graph.pass_nodes().len(), 3);
        assert!(resources.filled.is_none());
    }

    #[test]
    fn test_coverage_alpha_roundtrip() {
        for c in [Coverage::NoGeometry, Coverage::Unblended, Coverage::Blended] {
            assert_eq!(Coverage::from_alpha(c.alpha()), c);
        }
    }
}
