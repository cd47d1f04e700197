//! ULR view orchestrator

use crate::error::{UlrError, UlrResult};
use crate::pipeline::blend::{BlendKernel, BlendParams};
use crate::pipeline::depth_prepass::{is_background, Rasterizer};
use crate::pipeline::{build_ulr_graph, BlendOutput, RenderOutput, UlrFrameResources};
use crate::render_graph::{CompiledGraph, FrameImage, FrameInputs, RenderGraph, RenderGraphExecutor};
use crate::renderer::{coverage_summary, BlendStrategy, DeviceLimits, UlrRenderer};
use crate::resources::{MaskSet, ProxyMesh, SourceImageBank};
use crate::scene::{Camera, CameraId, CameraRegistry};
use crate::selection::{RenderMode, SelectionObserver, SelectionSet};
use crate::UlrConfig;
use glam::Vec4;
use std::sync::Arc;
use std::time::Instant;

/// Renders novel views of one dataset.
///
/// Owns the camera registry, proxy, source images and the frame graph. Every
/// [`UlrView::render`] call selects cameras from scratch, then runs the
/// pre-pass, blend, optional Poisson fill and resolve passes.
pub struct UlrView {
    config: UlrConfig,
    registry: CameraRegistry,
    mesh: ProxyMesh,
    bank: SourceImageBank,
    masks: Option<MaskSet>,
    renderer: UlrRenderer,
    render_graph: RenderGraph,
    compiled: CompiledGraph,
    frame_resources: UlrFrameResources,
    graph_executor: RenderGraphExecutor,
    observers: Vec<Arc<dyn SelectionObserver>>,
    last_selection: SelectionSet,
    width: u32,
    height: u32,
}

impl UlrView {
    /// Create a view, validating every input before the first frame
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: UlrConfig,
        registry: CameraRegistry,
        mesh: ProxyMesh,
        bank: SourceImageBank,
        masks: Option<MaskSet>,
        limits: DeviceLimits,
        width: u32,
        height: u32,
    ) -> UlrResult<Self> {
        config.validate()?;
        mesh.validate()?;
        if width == 0 || height == 0 {
            return Err(UlrError::InvalidConfig(format!(
                "output resolution must be non-zero, got {}x{}",
                width, height
            )));
        }
        if bank.len() != registry.len() {
            return Err(UlrError::InvalidConfig(format!(
                "{} source images for {} cameras",
                bank.len(),
                registry.len()
            )));
        }
        if let Some(masks) = &masks {
            masks.validate(&registry)?;
        } else if config.masks_enabled {
            log::warn!("Masks enabled but no masks given; every camera is treated as unmasked");
        }

        let renderer = UlrRenderer::new(&config, &limits, &registry)?;
        let (render_graph, frame_resources) = build_ulr_graph(&config)?;
        let compiled = render_graph.compile()?;

        log::info!(
            "ULR view: {} cameras, {} proxy triangles, {}x{} output",
            registry.len(),
            mesh.triangle_count(),
            width,
            height
        );

        Ok(Self {
            config,
            registry,
            mesh,
            bank,
            masks,
            renderer,
            render_graph,
            compiled,
            frame_resources,
            graph_executor: RenderGraphExecutor::new(),
            observers: Vec::new(),
            last_selection: SelectionSet::empty(),
            width,
            height,
        })
    }

    /// Select cameras for `eye` the way the next render would
    pub fn select(&self, eye: &Camera) -> SelectionSet {
        let selection = self.renderer.select(&self.registry, eye);
        self.config.render_mode.apply(selection, &self.registry)
    }

    /// Render the novel view seen by `eye`
    pub fn render(&mut self, eye: &Camera) -> UlrResult<RenderOutput> {
        let start = Instant::now();
        let selection = self.select(eye);
        log::debug!("Selected {} cameras: {:?}", selection.len(), selection.ids());
        for observer in &self.observers {
            observer.on_selection(&selection);
        }
        self.last_selection = selection.clone();

        if selection.is_empty() {
            log::warn!("No camera selected for this viewpoint, rendering background");
            let background = BlendOutput::background(
                self.width,
                self.height,
                Vec4::from_array(self.config.background),
            );
            return Ok(RenderOutput {
                image: background.color,
                selection,
                coverage: background.coverage,
            });
        }

        let frame = FrameInputs {
            config: &self.config,
            registry: &self.registry,
            mesh: &self.mesh,
            bank: &self.bank,
            masks: self.masks.as_ref(),
            renderer: &self.renderer,
            eye,
            selection: &selection,
        };
        self.graph_executor.execute(
            &self.render_graph,
            &self.compiled,
            &frame,
            self.width,
            self.height,
        )?;

        let output = match self.graph_executor.take_output(self.frame_resources.output)? {
            FrameImage::Blend(output) => output,
            _ => return Err(UlrError::MissingResource("frame_output".into())),
        };
        let (blended, unblended, empty) = coverage_summary(&output);
        log::debug!(
            "Frame took {:.3} ms ({} blended, {} unblended, {} empty pixels)",
            start.elapsed().as_secs_f64() * 1000.0,
            blended,
            unblended,
            empty
        );

        Ok(RenderOutput {
            image: output.color,
            selection,
            coverage: output.coverage,
        })
    }

    /// Normalized `(camera, weight)` pairs blended at pixel `(x, y)` for `eye`
    pub fn pixel_contributions(&self, eye: &Camera, x: u32, y: u32) -> UlrResult<Vec<(CameraId, f32)>> {
        if x >= self.width || y >= self.height {
            return Err(UlrError::InvalidConfig(format!(
                "pixel ({}, {}) outside {}x{} output",
                x, y, self.width, self.height
            )));
        }
        let projection = eye.projection.with_near(self.config.prepass_near);
        let raster = Rasterizer::new(self.width, self.height)
            .with_backface_culling(self.config.backface_culling)
            .rasterize(&self.mesh, projection.matrix() * eye.view_matrix());
        let texel = raster.positions.get(x, y);
        if is_background(texel) {
            return Ok(Vec::new());
        }

        let kernel = BlendKernel::new(BlendParams::from_config(&self.config, self.bank.convention()));
        let point = texel.truncate();
        let samples: Vec<_> = self
            .select(eye)
            .sorted()
            .into_iter()
            .filter_map(|id| {
                let camera = self.registry.get(id)?;
                let image = self.bank.get(id)?;
                let mask = self.masks.as_ref().and_then(|m| m.get(id));
                kernel.sample(camera, image, mask, point, eye.position)
            })
            .collect();
        Ok(kernel.contributions(&samples))
    }

    /// Toggle a source camera for subsequent renders
    pub fn set_camera_active(&mut self, id: CameraId, active: bool) -> UlrResult<()> {
        self.registry.set_active(id, active)
    }

    pub fn set_render_mode(&mut self, mode: RenderMode) -> UlrResult<()> {
        if let RenderMode::EveryNth(0) = mode {
            return Err(UlrError::InvalidConfig("EveryNth step must be at least 1".into()));
        }
        if let RenderMode::OneCamera(id) | RenderMode::LeaveOneOut(id) = mode {
            self.registry.get(id).ok_or(UlrError::UnknownCamera(id))?;
        }
        self.config.render_mode = mode;
        Ok(())
    }

    /// Change the output resolution
    pub fn resize(&mut self, width: u32, height: u32) -> UlrResult<()> {
        if width == 0 || height == 0 {
            return Err(UlrError::InvalidConfig(format!(
                "output resolution must be non-zero, got {}x{}",
                width, height
            )));
        }
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }
        self.graph_executor.cleanup();
        self.width = width;
        self.height = height;
        log::debug!("ULR view resized to {}x{}", width, height);
        Ok(())
    }

    pub fn add_observer(&mut self, observer: Arc<dyn SelectionObserver>) {
        self.observers.push(observer);
    }

    pub fn config(&self) -> &UlrConfig {
        &self.config
    }

    pub fn registry(&self) -> &CameraRegistry {
        &self.registry
    }

    pub fn renderer(&self) -> &UlrRenderer {
        &self.renderer
    }

    pub fn last_selection(&self) -> &SelectionSet {
        &self.last_selection
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
