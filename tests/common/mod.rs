//! Shared fixtures for the integration tests.
//!
//! Every dataset is synthetic: source photographs are rendered from the proxy
//! with a world-space albedo, so all cameras agree on the colour of a surface
//! point and blends can be checked against known values.

#![allow(dead_code)]

use glam::{Vec3, Vec4};
use ulr_engine::resources::TextureData;
use ulr_engine::scene::OrbitRig;
use ulr_engine::{
    Camera, CameraRegistry, DepthConvention, GpuContext, ProxyMesh, SourceImageBank, UlrConfig,
    UlrView,
};

/// Source camera resolution
pub const SOURCE_SIZE: u32 = 48;

/// Renderer variants exercised by the CPU tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Sequential,
    SamplerArray,
    Streaming,
}

impl From<Variant> for ulr_engine::RendererVariant {
    fn from(variant: Variant) -> Self {
        match variant {
            Variant::Sequential => ulr_engine::RendererVariant::Sequential,
            Variant::SamplerArray => ulr_engine::RendererVariant::SamplerArray,
            Variant::Streaming => ulr_engine::RendererVariant::Streaming,
        }
    }
}

/// A calibrated dataset ready to be handed to a view
#[derive(Clone)]
pub struct Dataset {
    pub rig: OrbitRig,
    pub registry: CameraRegistry,
    pub mesh: ProxyMesh,
    pub bank: SourceImageBank,
}

impl Dataset {
    pub fn view(&self, config: UlrConfig, width: u32, height: u32) -> UlrView {
        UlrView::new(
            config,
            self.registry.clone(),
            self.mesh.clone(),
            self.bank.clone(),
            None,
            Default::default(),
            width,
            height,
        )
        .expect("Failed to create view")
    }

    /// Azimuth of source camera `index`
    pub fn azimuth(&self, index: usize, count: usize, half_arc: f32) -> f32 {
        if count > 1 {
            -half_arc + 2.0 * half_arc * index as f32 / (count - 1) as f32
        } else {
            0.0
        }
    }
}

/// Never black, so no sample is discarded as a missing pixel
pub fn albedo(p: Vec3) -> Vec3 {
    let cell = (p * 3.0).floor();
    let parity = (cell.x + cell.y + cell.z).rem_euclid(2.0);
    Vec3::new(0.8, 0.3, 0.2).lerp(Vec3::new(0.2, 0.5, 0.9), parity)
}

/// A 2x2 wall at z = 0 facing +Z
pub fn wall() -> ProxyMesh {
    ProxyMesh::quad(Vec3::ZERO, Vec3::X, Vec3::Y)
}

/// The wall with a small plate floating in front of it
pub fn wall_with_occluder() -> ProxyMesh {
    let mut mesh = wall();
    mesh.merge(&ProxyMesh::quad(
        Vec3::new(0.2, 0.1, 0.8),
        Vec3::X * 0.25,
        Vec3::Y * 0.25,
    ));
    mesh
}

/// Route library logs through the test harness
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// `count` cameras on an arc of `±half_arc` around the origin, looking at `mesh`
pub fn dataset(mesh: ProxyMesh, count: usize, half_arc: f32) -> Dataset {
    init_logging();
    let rig = OrbitRig::new(Vec3::ZERO, 4.0);
    let registry = CameraRegistry::new(rig.input_cameras(count, half_arc, SOURCE_SIZE, SOURCE_SIZE))
        .expect("Failed to build registry");
    let bank = SourceImageBank::render_from_proxy(
        &registry,
        &mesh,
        DepthConvention::WorldDistance,
        true,
        Vec3::ZERO,
        albedo,
    )
    .expect("Failed to render source images");
    Dataset {
        rig,
        registry,
        mesh,
        bank,
    }
}

/// Cameras with one flat colour each, depth rendered from the proxy
pub fn solid_dataset(mesh: ProxyMesh, colors: &[Vec3], half_arc: f32) -> Dataset {
    init_logging();
    let rig = OrbitRig::new(Vec3::ZERO, 4.0);
    let registry = CameraRegistry::new(rig.input_cameras(colors.len(), half_arc, SOURCE_SIZE, SOURCE_SIZE))
        .expect("Failed to build registry");
    let images = colors
        .iter()
        .map(|&c| TextureData::solid_color(SOURCE_SIZE, SOURCE_SIZE, c, "solid"))
        .collect();
    let bank = SourceImageBank::with_proxy_depth(
        &registry,
        &mesh,
        images,
        DepthConvention::WorldDistance,
        true,
    )
    .expect("Failed to build bank");
    Dataset {
        rig,
        registry,
        mesh,
        bank,
    }
}

/// Novel viewpoint on the dataset rig
pub fn eye(rig: &OrbitRig, azimuth: f32, width: u32, height: u32) -> Camera {
    rig.camera(azimuth, width, height)
}

/// Largest per-channel difference over the pixels `keep` accepts
pub fn max_difference(
    a: &TextureData<Vec4>,
    b: &TextureData<Vec4>,
    keep: impl Fn(usize) -> bool,
) -> f32 {
    a.texels
        .iter()
        .zip(&b.texels)
        .enumerate()
        .filter(|(i, _)| keep(*i))
        .map(|(_, (x, y))| (*x - *y).abs().max_element())
        .fold(0.0, f32::max)
}

/// A headless GPU, or `None` on machines without an adapter
pub fn gpu_context() -> Option<GpuContext> {
    GpuContext::new().ok()
}
