//! # Offline ULR Demo
//!
//! Builds a synthetic dataset (a cube on a ground plate, seen by an arc of
//! source cameras), renders novel views with the chosen renderer and writes
//! them as PNG files.
//!
//! ```bash
//! cargo run --example offline -- --variant streaming --frames 8 --output ulr
//! cargo run --example offline -- --variant gpu --poisson
//! ```

use clap::{Parser, ValueEnum};
use glam::Vec3;
use std::path::PathBuf;
use ulr_engine::{
    BlendDiscipline, CameraRegistry, DepthConvention, DeviceLimits, GpuContext, ProxyMesh,
    RendererVariant, SourceImageBank, UlrConfig, UlrView, WgpuUlrRenderer,
};
use ulr_engine::backend::HeadlessBackend;
use ulr_engine::scene::OrbitRig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum CliVariant {
    Sequential,
    #[value(name = "sampler-array")]
    SamplerArray,
    #[default]
    Streaming,
    /// Streaming renderer on a wgpu device
    Gpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum CliDiscipline {
    #[default]
    #[value(name = "top-k")]
    TopK,
    Full,
}

/// Render novel views of a synthetic ULR dataset
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    #[arg(long, value_enum, default_value_t)]
    variant: CliVariant,
    #[arg(long, value_enum, default_value_t)]
    discipline: CliDiscipline,
    /// Number of source cameras
    #[arg(long, default_value_t = 12)]
    cameras: usize,
    /// Source image resolution (square)
    #[arg(long, default_value_t = 128)]
    source_size: u32,
    #[arg(long, default_value_t = 320)]
    width: u32,
    #[arg(long, default_value_t = 240)]
    height: u32,
    /// Novel views rendered along the camera arc
    #[arg(long, default_value_t = 1)]
    frames: usize,
    /// Fill unblended seams with the Poisson solver
    #[arg(long)]
    poisson: bool,
    /// Output leading blend weights instead of colour
    #[arg(long)]
    show_weights: bool,
    #[arg(long)]
    gamma: bool,
    /// Output file prefix
    #[arg(long, default_value = "ulr")]
    output: PathBuf,
}

const ARC_DEGREES: f32 = 60.0;

fn checker_albedo(p: Vec3) -> Vec3 {
    let cell = (p * 4.0).floor();
    let parity = (cell.x + cell.y + cell.z).rem_euclid(2.0);
    let base = Vec3::new(0.85, 0.35, 0.2).lerp(Vec3::new(0.2, 0.55, 0.9), parity);
    base * (0.75 + 0.25 * (p.y + 0.5).clamp(0.0, 1.0))
}

fn scene() -> ProxyMesh {
    let mut mesh = ProxyMesh::cube(Vec3::new(0.0, 0.25, 0.0), 0.5);
    mesh.merge(&ProxyMesh::quad(
        Vec3::ZERO,
        Vec3::new(1.5, 0.0, 0.0),
        Vec3::new(0.0, 0.0, -1.5),
    ));
    mesh.name = "cube_on_plate".into();
    mesh
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let rig = OrbitRig::new(Vec3::new(0.0, 0.2, 0.0), 3.0).with_elevation(25.0);
    let half_arc = (ARC_DEGREES * 0.5).to_radians();
    let registry = CameraRegistry::new(rig.input_cameras(
        args.cameras,
        half_arc,
        args.source_size,
        args.source_size,
    ))?;
    let mesh = scene();
    let bank = SourceImageBank::render_from_proxy(
        &registry,
        &mesh,
        DepthConvention::WorldDistance,
        true,
        Vec3::ZERO,
        checker_albedo,
    )?;
    log::info!(
        "Synthetic dataset: {} cameras, {} triangles",
        registry.len(),
        mesh.triangle_count()
    );

    let config = UlrConfig {
        variant: match args.variant {
            CliVariant::Sequential => RendererVariant::Sequential,
            CliVariant::SamplerArray => RendererVariant::SamplerArray,
            CliVariant::Streaming | CliVariant::Gpu => RendererVariant::Streaming,
        },
        discipline: match args.discipline {
            CliDiscipline::TopK => BlendDiscipline::BoundedTopK,
            CliDiscipline::Full => BlendDiscipline::FullAccumulate,
        },
        poisson_blend_enabled: args.poisson,
        show_weights: args.show_weights,
        gamma_correction: args.gamma,
        ..Default::default()
    };

    // Novel views sweep the inner part of the arc, between source cameras
    let azimuths: Vec<f32> = (0..args.frames)
        .map(|i| {
            let t = if args.frames > 1 {
                i as f32 / (args.frames - 1) as f32
            } else {
                0.5
            };
            (-0.8 + 1.6 * t) * half_arc
        })
        .collect();
    let eye_rig = OrbitRig::new(rig.target, 2.6).with_elevation(20.0);

    if args.variant == CliVariant::Gpu {
        let context = GpuContext::new()?;
        log::info!("Rendering on {}", context.adapter_name());
        let mut renderer = WgpuUlrRenderer::new(
            context,
            &config,
            &registry,
            &mesh,
            &bank,
            None,
            args.width,
            args.height,
        )?;
        for (frame, azimuth) in azimuths.iter().enumerate() {
            let eye = eye_rig.camera(*azimuth, args.width, args.height);
            let output = renderer.render_frame(&registry, &eye)?;
            save(&args, frame, &output.image)?;
        }
        return Ok(());
    }

    let mut view = UlrView::new(
        config,
        registry,
        mesh,
        bank,
        None,
        DeviceLimits::default(),
        args.width,
        args.height,
    )?;
    for (frame, azimuth) in azimuths.iter().enumerate() {
        let eye = eye_rig.camera(*azimuth, args.width, args.height);
        let output = view.render(&eye)?;
        log::info!("Frame {}: cameras {:?}", frame, output.selection.sorted());
        save(&args, frame, &output.image)?;
    }
    Ok(())
}

fn save(
    args: &Args,
    frame: usize,
    image: &ulr_engine::TextureData<glam::Vec4>,
) -> Result<(), Box<dyn std::error::Error>> {
    let path = PathBuf::from(format!("{}_{:03}.png", args.output.display(), frame));
    image.save(&path)?;
    log::info!("Wrote {}", path.display());
    Ok(())
}
