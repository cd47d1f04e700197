//! Per-camera source images: colour plus depth

use super::{ProxyMesh, TextureData};
use crate::error::{UlrError, UlrResult};
use crate::pipeline::depth_prepass::Rasterizer;
use crate::scene::{CameraId, CameraRegistry, InputCamera};
use glam::Vec3;

/// How source depth maps encode depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepthConvention {
    /// Euclidean distance from the camera centre
    #[default]
    WorldDistance,
    /// NDC depth in `[0, 1]`
    ProjectiveZ,
}

impl DepthConvention {
    /// Depth of `point` as seen from `camera`, in this convention
    #[inline]
    pub fn measure(&self, camera: &InputCamera, point: Vec3, ndc_z: f32) -> f32 {
        match self {
            DepthConvention::WorldDistance => (point - camera.position()).length(),
            DepthConvention::ProjectiveZ => ndc_z,
        }
    }

    /// Value stored where the proxy does not cover the image
    pub fn empty_value(&self) -> f32 {
        match self {
            DepthConvention::WorldDistance => f32::MAX,
            DepthConvention::ProjectiveZ => 1.0,
        }
    }
}

/// Colour and depth of one source camera, at its native resolution
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub camera: CameraId,
    pub color: TextureData<Vec3>,
    pub depth: TextureData<f32>,
}

impl SourceImage {
    pub fn new(camera: CameraId, color: TextureData<Vec3>, depth: TextureData<f32>) -> Self {
        Self {
            camera,
            color,
            depth,
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.color.dimensions()
    }
}

/// Read-only bank of source images, indexed by camera id
#[derive(Debug, Clone)]
pub struct SourceImageBank {
    images: Vec<SourceImage>,
    convention: DepthConvention,
}

impl SourceImageBank {
    /// Build a bank whose slot `i` holds camera `i`'s images
    pub fn new(
        registry: &CameraRegistry,
        images: Vec<SourceImage>,
        convention: DepthConvention,
    ) -> UlrResult<Self> {
        if images.len() != registry.len() {
            return Err(UlrError::InvalidConfig(format!(
                "{} source images for {} cameras",
                images.len(),
                registry.len()
            )));
        }

        for (slot, (image, camera)) in images.iter().zip(registry.cameras()).enumerate() {
            let invalid = |reason: String| UlrError::InvalidSourceImage {
                camera: camera.id(),
                reason,
            };
            if image.camera as usize != slot {
                return Err(invalid(format!(
                    "slot {} holds the image of camera {}",
                    slot, image.camera
                )));
            }
            if image.color.dimensions() != camera.resolution() {
                return Err(invalid(format!(
                    "colour is {:?}, camera resolution is {:?}",
                    image.color.dimensions(),
                    camera.resolution()
                )));
            }
            if image.depth.dimensions() != image.color.dimensions() {
                return Err(invalid(format!(
                    "depth is {:?}, colour is {:?}",
                    image.depth.dimensions(),
                    image.color.dimensions()
                )));
            }
        }

        Ok(Self { images, convention })
    }

    /// Build a bank by rendering depth maps of the proxy from every camera.
    ///
    /// Colours come from `colors`, one per camera in id order.
    pub fn with_proxy_depth(
        registry: &CameraRegistry,
        mesh: &ProxyMesh,
        colors: Vec<TextureData<Vec3>>,
        convention: DepthConvention,
        backface_culling: bool,
    ) -> UlrResult<Self> {
        mesh.validate()?;
        let images = registry
            .cameras()
            .iter()
            .zip(colors)
            .map(|(camera, color)| {
                let depth = render_depth_map(mesh, camera, convention, backface_culling);
                SourceImage::new(camera.id(), color, depth)
            })
            .collect();
        Self::new(registry, images, convention)
    }

    /// Render the proxy from every camera and shade it with a world-space albedo.
    ///
    /// Produces multi-view consistent colour and depth, handy for synthetic
    /// datasets. Pixels not covered by the proxy take `background`.
    pub fn render_from_proxy(
        registry: &CameraRegistry,
        mesh: &ProxyMesh,
        convention: DepthConvention,
        backface_culling: bool,
        background: Vec3,
        albedo: impl Fn(Vec3) -> Vec3,
    ) -> UlrResult<Self> {
        mesh.validate()?;
        let images = registry
            .cameras()
            .iter()
            .map(|camera| {
                let (width, height) = camera.resolution();
                let raster = Rasterizer::new(width, height)
                    .with_backface_culling(backface_culling)
                    .rasterize(mesh, camera.view_projection_matrix());
                let color = raster.positions.map(&format!("color_{}", camera.id()), |p| {
                    if p.w >= 1.0 {
                        background
                    } else {
                        albedo(p.truncate())
                    }
                });
                let depth = depth_from_positions(&raster.positions, camera, convention);
                SourceImage::new(camera.id(), color, depth)
            })
            .collect();
        Self::new(registry, images, convention)
    }

    pub fn convention(&self) -> DepthConvention {
        self.convention
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn get(&self, camera: CameraId) -> Option<&SourceImage> {
        self.images.get(camera as usize)
    }

    pub fn images(&self) -> &[SourceImage] {
        &self.images
    }

    /// Common resolution of every image, `None` when they differ
    pub fn uniform_resolution(&self) -> Option<(u32, u32)> {
        let first = self.images.first()?.resolution();
        self.images
            .iter()
            .all(|image| image.resolution() == first)
            .then_some(first)
    }
}

/// Render a depth map of `mesh` seen from `camera`
pub fn render_depth_map(
    mesh: &ProxyMesh,
    camera: &InputCamera,
    convention: DepthConvention,
    backface_culling: bool,
) -> TextureData<f32> {
    let (width, height) = camera.resolution();
    let raster = Rasterizer::new(width, height)
        .with_backface_culling(backface_culling)
        .rasterize(mesh, camera.view_projection_matrix());
    depth_from_positions(&raster.positions, camera, convention)
}

fn depth_from_positions(
    positions: &TextureData<glam::Vec4>,
    camera: &InputCamera,
    convention: DepthConvention,
) -> TextureData<f32> {
    positions.map(&format!("depth_{}", camera.id()), |p| {
        if p.w >= 1.0 {
            convention.empty_value()
        } else {
            convention.measure(camera, p.truncate(), p.w)
        }
    })
}
