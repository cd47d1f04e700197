//! Headless wgpu implementation of the streaming ULR renderer
//!
//! Every source camera is resident: colours, depths and masks live in texture
//! arrays indexed by camera id, and the camera-info uniform array carries the
//! per-frame `selected` flags. A frame is a position pre-pass, a fullscreen
//! blend pass, an optional compute Poisson fill and a resolve pass.

mod poisson;
pub mod shaders;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::error::{UlrError, UlrResult};
use crate::pipeline::blend::BlendParams;
use crate::pipeline::depth_prepass::BACKGROUND_POSITION;
use crate::pipeline::postprocess::{PoissonConfig, ResolveSettings};
use crate::pipeline::{BlendOutput, Coverage, RenderOutput};
use crate::renderer::{BlendStrategy, DeviceLimits, StreamingRenderer};
use crate::resources::{MaskSet, ProxyMesh, SourceImageBank, TextureData};
use crate::scene::{Camera, CameraInfo, CameraRegistry};
use crate::selection::SelectionSet;
use crate::UlrConfig;
use glam::Vec4;
use poisson::GpuPoisson;
use shaders::{blend_shader, check_stage_interface, resolve_shader, validate_wgsl, PREPASS_SHADER};
use std::time::Instant;
use wgpu::util::DeviceExt;

const POSITION_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Headless device and queue
pub struct GpuContext {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl GpuContext {
    pub fn new() -> BackendResult<Self> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> BackendResult<Self> {
        // WGPU_BACKEND overrides the backend choice
        let backends = wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::all());
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("ULR Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }
}

impl HeadlessBackend for GpuContext {
    fn adapter_name(&self) -> String {
        self.adapter.get_info().name
    }

    fn device_limits(&self) -> DeviceLimits {
        DeviceLimits::from(&self.device.limits())
    }

    fn device(&self) -> &wgpu::Device {
        &self.device
    }

    fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }
}

/// A texture with its default view
pub(crate) struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: (u32, u32),
}

impl GpuTexture {
    fn new(
        device: &wgpu::Device,
        label: &str,
        size: (u32, u32),
        layers: u32,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
        view_dimension: wgpu::TextureViewDimension,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: size.0,
                height: size.1,
                depth_or_array_layers: layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(label),
            dimension: Some(view_dimension),
            ..Default::default()
        });
        Self {
            texture,
            view,
            size,
        }
    }

    /// Rgba32Float texture written by compute kernels
    pub(crate) fn storage(device: &wgpu::Device, label: &str, size: (u32, u32)) -> Self {
        Self::new(
            device,
            label,
            size,
            1,
            wgpu::TextureFormat::Rgba32Float,
            wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            wgpu::TextureViewDimension::D2,
        )
    }

    fn render_target(
        device: &wgpu::Device,
        label: &str,
        size: (u32, u32),
        format: wgpu::TextureFormat,
    ) -> Self {
        Self::new(
            device,
            label,
            size,
            1,
            format,
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            wgpu::TextureViewDimension::D2,
        )
    }

    fn depth_target(device: &wgpu::Device, label: &str, size: (u32, u32)) -> Self {
        Self::new(
            device,
            label,
            size,
            1,
            DEPTH_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT,
            wgpu::TextureViewDimension::D2,
        )
    }

    /// One layer per camera, always viewed as an array
    fn layers(
        device: &wgpu::Device,
        label: &str,
        size: (u32, u32),
        layers: u32,
        format: wgpu::TextureFormat,
    ) -> Self {
        Self::new(
            device,
            label,
            size,
            layers,
            format,
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            wgpu::TextureViewDimension::D2Array,
        )
    }

    fn write_layer(&self, queue: &wgpu::Queue, layer: u32, data: &[u8], bytes_per_texel: u32) {
        let (width, height) = self.size;
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: layer,
                },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * bytes_per_texel),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }
}

/// Size-dependent targets and the bind groups that read them
struct FrameTargets {
    positions: GpuTexture,
    depth: GpuTexture,
    composite: GpuTexture,
    output: GpuTexture,
    blend_bind_group: wgpu::BindGroup,
    resolve_bind_group: wgpu::BindGroup,
}

/// Static per-dataset GPU state
struct SceneBuffers {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    colors: GpuTexture,
    depths: GpuTexture,
    masks: GpuTexture,
    masks_bound: bool,
    sampler: wgpu::Sampler,
}

/// Streaming ULR on a wgpu device
pub struct WgpuUlrRenderer {
    context: GpuContext,
    config: UlrConfig,
    params: BlendParams,
    streaming: StreamingRenderer,
    camera_count: usize,
    width: u32,
    height: u32,

    scene: SceneBuffers,
    prepass_uniforms: wgpu::Buffer,
    blend_uniforms: wgpu::Buffer,
    camera_buffer: wgpu::Buffer,
    resolve_uniforms: wgpu::Buffer,

    prepass_pipeline: wgpu::RenderPipeline,
    prepass_bind_group: wgpu::BindGroup,
    blend_pipeline: wgpu::RenderPipeline,
    blend_layout: wgpu::BindGroupLayout,
    resolve_pipeline: wgpu::RenderPipeline,
    resolve_layout: wgpu::BindGroupLayout,

    poisson: Option<GpuPoisson>,
    targets: FrameTargets,
}

impl WgpuUlrRenderer {
    /// Upload a dataset and build every pipeline
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context: GpuContext,
        config: &UlrConfig,
        registry: &CameraRegistry,
        mesh: &ProxyMesh,
        bank: &SourceImageBank,
        masks: Option<&MaskSet>,
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
        if let Some(masks) = masks {
            masks.validate(registry)?;
        }
        let streaming = StreamingRenderer::new(&context.device_limits(), registry)?;

        let scene = SceneBuffers::upload(&context, config, mesh, bank, masks)?;
        let device = &context.device;
        let camera_count = registry.len();

        let prepass_uniforms = uniform_buffer(device, "Prepass Uniforms", std::mem::size_of::<PrepassUniforms>());
        let blend_uniforms = uniform_buffer(device, "Blend Uniforms", std::mem::size_of::<BlendUniforms>());
        let resolve_uniforms = uniform_buffer(device, "Resolve Uniforms", std::mem::size_of::<ResolveUniforms>());
        let camera_buffer = uniform_buffer(
            device,
            "Camera Infos",
            camera_count.max(1) * std::mem::size_of::<CameraInfo>(),
        );

        let (prepass_pipeline, prepass_bind_group) =
            create_prepass_pipeline(device, config.backface_culling, &prepass_uniforms)?;
        let (blend_pipeline, blend_layout) = create_blend_pipeline(device, camera_count)?;
        let (resolve_pipeline, resolve_layout) = create_resolve_pipeline(device)?;

        let poisson = if config.poisson_blend_enabled {
            Some(GpuPoisson::new(device, PoissonConfig::from_config(config), width, height)?)
        } else {
            None
        };

        let targets = FrameTargets::new(
            device,
            (width, height),
            &scene,
            &blend_layout,
            &blend_uniforms,
            &camera_buffer,
            &resolve_layout,
            &resolve_uniforms,
            poisson.as_ref(),
        );

        log::info!(
            "wgpu ULR renderer: {} cameras, {} proxy triangles, {}x{} output on {}",
            camera_count,
            mesh.triangle_count(),
            width,
            height,
            context.adapter_name()
        );

        Ok(Self {
            params: BlendParams::from_config(config, bank.convention()),
            config: config.clone(),
            context,
            streaming,
            camera_count,
            width,
            height,
            scene,
            prepass_uniforms,
            blend_uniforms,
            camera_buffer,
            resolve_uniforms,
            prepass_pipeline,
            prepass_bind_group,
            blend_pipeline,
            blend_layout,
            resolve_pipeline,
            resolve_layout,
            poisson,
            targets,
        })
    }

    /// All active cameras, restricted by the configured render mode
    pub fn select(&self, registry: &CameraRegistry, eye: &Camera) -> SelectionSet {
        let selection = self.streaming.select(registry, eye);
        self.config.render_mode.apply(selection, registry)
    }

    /// Record and submit one frame; read it with [`WgpuUlrRenderer::read_output`]
    pub fn render(
        &mut self,
        registry: &CameraRegistry,
        selection: &SelectionSet,
        eye: &Camera,
    ) -> UlrResult<()> {
        if registry.len() != self.camera_count {
            return Err(UlrError::InvalidConfig(format!(
                "renderer was built for {} cameras, registry holds {}",
                self.camera_count,
                registry.len()
            )));
        }

        let queue = &self.context.queue;
        let infos = StreamingRenderer::camera_infos(registry, selection);
        queue.write_buffer(&self.camera_buffer, 0, bytemuck::cast_slice(&infos));

        let projection = eye.projection.with_near(self.config.prepass_near);
        let prepass = PrepassUniforms {
            view_proj: projection.matrix() * eye.view_matrix(),
        };
        queue.write_buffer(&self.prepass_uniforms, 0, bytemuck::bytes_of(&prepass));

        let background = Vec4::from_array(self.config.background);
        let blend = BlendUniforms::new(
            &self.params,
            eye.position,
            background,
            infos.len() as u32,
            self.scene.masks_bound,
        );
        queue.write_buffer(&self.blend_uniforms, 0, bytemuck::bytes_of(&blend));

        let settings = ResolveSettings {
            gamma_correction: self.config.gamma_correction,
            show_weights: self.config.show_weights,
            background,
            filled: self.poisson.is_some(),
        };
        queue.write_buffer(
            &self.resolve_uniforms,
            0,
            bytemuck::bytes_of(&ResolveUniforms::from(&settings)),
        );

        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("ULR Frame"),
            });
        self.encode_prepass(&mut encoder);
        self.encode_fullscreen(
            &mut encoder,
            "ULR Blend",
            &self.blend_pipeline,
            &self.targets.blend_bind_group,
            &self.targets.composite,
            background.truncate().extend(0.0),
        );
        if let Some(poisson) = &self.poisson {
            poisson.encode(&self.context.device, &mut encoder, &self.targets.composite);
        }
        self.encode_fullscreen(
            &mut encoder,
            "Resolve",
            &self.resolve_pipeline,
            &self.targets.resolve_bind_group,
            &self.targets.output,
            background,
        );
        queue.submit(Some(encoder.finish()));
        Ok(())
    }

    /// Select, render and read back one frame
    pub fn render_frame(&mut self, registry: &CameraRegistry, eye: &Camera) -> UlrResult<RenderOutput> {
        let start = Instant::now();
        let selection = self.select(registry, eye);
        if selection.is_empty() {
            log::warn!("No camera selected for this viewpoint, rendering background");
            let background =
                BlendOutput::background(self.width, self.height, Vec4::from_array(self.config.background));
            return Ok(RenderOutput {
                image: background.color,
                selection,
                coverage: background.coverage,
            });
        }

        self.render(registry, &selection, eye)?;
        let output = self.read_output()?;
        log::debug!(
            "GPU frame took {:.3} ms ({} cameras selected)",
            start.elapsed().as_secs_f64() * 1000.0,
            selection.len()
        );
        Ok(RenderOutput {
            image: output.color,
            selection,
            coverage: output.coverage,
        })
    }

    /// Read back the resolved image of the last frame with its coverage
    pub fn read_output(&self) -> UlrResult<BlendOutput> {
        let color = self.read_texture(&self.targets.output, "frame_output")?;
        let composite = self.read_texture(&self.targets.composite, "ulr_composite")?;
        let coverage = composite.map("coverage", |texel| Coverage::from_alpha(texel.w));
        Ok(BlendOutput { color, coverage })
    }

    /// Change the output resolution, recreating size-dependent targets
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
        let device = &self.context.device;
        if let Some(poisson) = &mut self.poisson {
            poisson.resize(device, width, height);
        }
        self.targets = FrameTargets::new(
            device,
            (width, height),
            &self.scene,
            &self.blend_layout,
            &self.blend_uniforms,
            &self.camera_buffer,
            &self.resolve_layout,
            &self.resolve_uniforms,
            self.poisson.as_ref(),
        );
        self.width = width;
        self.height = height;
        log::debug!("wgpu ULR renderer resized to {}x{}", width, height);
        Ok(())
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn encode_prepass(&self, encoder: &mut wgpu::CommandEncoder) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Depth Prepass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.targets.positions.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(to_color(BACKGROUND_POSITION)),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.targets.depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.prepass_pipeline);
        pass.set_bind_group(0, &self.prepass_bind_group, &[]);
        pass.set_vertex_buffer(0, self.scene.vertex_buffer.slice(..));
        pass.set_index_buffer(self.scene.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..self.scene.index_count, 0, 0..1);
    }

    fn encode_fullscreen(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
        pipeline: &wgpu::RenderPipeline,
        bind_group: &wgpu::BindGroup,
        target: &GpuTexture,
        clear: Vec4,
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(to_color(clear)),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.draw(0..3, 0..1);
    }

    fn read_texture(&self, texture: &GpuTexture, name: &str) -> BackendResult<TextureData<Vec4>> {
        const TEXEL_BYTES: u32 = 16;
        let device = &self.context.device;
        let (width, height) = texture.size;
        let unpadded = width * TEXEL_BYTES;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: (padded * height) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback"),
        });
        encoder.copy_texture_to_buffer(
            texture.texture.as_image_copy(),
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.context.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?;

        let texels = {
            let data = slice.get_mapped_range();
            data.chunks(padded as usize)
                .flat_map(|row| {
                    bytemuck::cast_slice::<u8, f32>(&row[..unpadded as usize])
                        .chunks_exact(4)
                        .map(Vec4::from_slice)
                        .collect::<Vec<_>>()
                })
                .collect()
        };
        buffer.unmap();

        Ok(TextureData {
            width,
            height,
            texels,
            name: name.to_string(),
        })
    }
}

impl SceneBuffers {
    fn upload(
        context: &GpuContext,
        config: &UlrConfig,
        mesh: &ProxyMesh,
        bank: &SourceImageBank,
        masks: Option<&MaskSet>,
    ) -> BackendResult<Self> {
        let device = &context.device;
        let queue = &context.queue;
        let size = bank.uniform_resolution().ok_or_else(|| {
            BackendError::Unsupported("source images must share one resolution".into())
        })?;
        let layers = bank.len().max(1) as u32;

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Vertices", mesh.name)),
            contents: mesh.position_bytes(),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Indices", mesh.name)),
            contents: mesh.index_bytes(),
            usage: wgpu::BufferUsages::INDEX,
        });

        let colors = GpuTexture::layers(device, "Source Colors", size, layers, wgpu::TextureFormat::Rgba8Unorm);
        let depths = GpuTexture::layers(device, "Source Depths", size, layers, wgpu::TextureFormat::R32Float);
        let mask_layers = GpuTexture::layers(device, "Source Masks", size, layers, wgpu::TextureFormat::R8Unorm);

        // Missing masks read as "keep" after the optional inversion
        let keep = if config.invert_masks { 0u8 } else { 255u8 };
        let blank_mask = vec![keep; (size.0 * size.1) as usize];
        for (layer, image) in bank.images().iter().enumerate() {
            let layer = layer as u32;
            colors.write_layer(queue, layer, &image.color.to_rgba8(), 4);
            depths.write_layer(queue, layer, bytemuck::cast_slice(&image.depth.texels), 4);

            match masks.and_then(|m| m.get(image.camera)) {
                Some(mask) if mask.dimensions() == size => {
                    let bytes: Vec<u8> = mask
                        .texels
                        .iter()
                        .map(|m| (m.clamp(0.0, 1.0) * 255.0 + 0.5) as u8)
                        .collect();
                    mask_layers.write_layer(queue, layer, &bytes, 1);
                }
                Some(mask) => {
                    return Err(BackendError::Unsupported(format!(
                        "mask of camera {} is {:?}, source images are {:?}",
                        image.camera,
                        mask.dimensions(),
                        size
                    )));
                }
                None => mask_layers.write_layer(queue, layer, &blank_mask, 1),
            }
        }

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Source Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        log::debug!(
            "Uploaded {} source layers of {}x{}",
            layers,
            size.0,
            size.1
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
            colors,
            depths,
            masks: mask_layers,
            masks_bound: masks.is_some(),
            sampler,
        })
    }
}

impl FrameTargets {
    #[allow(clippy::too_many_arguments)]
    fn new(
        device: &wgpu::Device,
        size: (u32, u32),
        scene: &SceneBuffers,
        blend_layout: &wgpu::BindGroupLayout,
        blend_uniforms: &wgpu::Buffer,
        camera_buffer: &wgpu::Buffer,
        resolve_layout: &wgpu::BindGroupLayout,
        resolve_uniforms: &wgpu::Buffer,
        poisson: Option<&GpuPoisson>,
    ) -> Self {
        let positions = GpuTexture::render_target(device, "Prepass Positions", size, POSITION_FORMAT);
        let depth = GpuTexture::depth_target(device, "Prepass Depth", size);
        let composite = GpuTexture::render_target(device, "ULR Composite", size, POSITION_FORMAT);
        let output = GpuTexture::render_target(device, "Frame Output", size, POSITION_FORMAT);

        let blend_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Blend Bind Group"),
            layout: blend_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: blend_uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: camera_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&positions.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&scene.colors.view),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(&scene.depths.view),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: wgpu::BindingResource::TextureView(&scene.masks.view),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: wgpu::BindingResource::Sampler(&scene.sampler),
                },
            ],
        });

        let resolve_input = poisson.map(|p| p.filled()).unwrap_or(&composite);
        let resolve_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Resolve Bind Group"),
            layout: resolve_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: resolve_uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&resolve_input.view),
                },
            ],
        });

        Self {
            positions,
            depth,
            composite,
            output,
            blend_bind_group,
            resolve_bind_group,
        }
    }
}

fn to_color(v: Vec4) -> wgpu::Color {
    wgpu::Color {
        r: v.x as f64,
        g: v.y as f64,
        b: v.z as f64,
        a: v.w as f64,
    }
}

fn uniform_buffer(device: &wgpu::Device, label: &str, size: usize) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn texture_entry(
    binding: u32,
    view_dimension: wgpu::TextureViewDimension,
    filterable: bool,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable },
            view_dimension,
            multisampled: false,
        },
        count: None,
    }
}

/// Run `create` inside a validation error scope
fn checked<T>(device: &wgpu::Device, label: &str, create: impl FnOnce() -> T) -> BackendResult<T> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = create();
    match pollster::block_on(device.pop_error_scope()) {
        Some(error) => Err(BackendError::PipelineCreationFailed(format!("{}: {}", label, error))),
        None => Ok(value),
    }
}

fn shader_module(device: &wgpu::Device, label: &str, source: &str) -> BackendResult<wgpu::ShaderModule> {
    let module = validate_wgsl(label, source)?;
    check_stage_interface(label, &module)?;
    Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    }))
}

fn fullscreen_target() -> [Option<wgpu::ColorTargetState>; 1] {
    [Some(wgpu::ColorTargetState {
        format: POSITION_FORMAT,
        blend: None,
        write_mask: wgpu::ColorWrites::ALL,
    })]
}

fn create_prepass_pipeline(
    device: &wgpu::Device,
    backface_culling: bool,
    uniforms: &wgpu::Buffer,
) -> BackendResult<(wgpu::RenderPipeline, wgpu::BindGroup)> {
    let shader = shader_module(device, "Prepass Shader", PREPASS_SHADER)?;
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Prepass Bind Group Layout"),
        entries: &[uniform_entry(0, wgpu::ShaderStages::VERTEX)],
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Prepass Bind Group"),
        layout: &layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: uniforms.as_entire_binding(),
        }],
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Prepass Pipeline Layout"),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });

    let pipeline = checked(device, "Depth Prepass", || {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Depth Prepass Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<[f32; 3]>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x3],
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &fullscreen_target(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: backface_culling.then_some(wgpu::Face::Back),
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        })
    })?;
    Ok((pipeline, bind_group))
}

fn create_fullscreen_pipeline(
    device: &wgpu::Device,
    label: &str,
    shader: &wgpu::ShaderModule,
    layout: &wgpu::BindGroupLayout,
) -> BackendResult<wgpu::RenderPipeline> {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });
    checked(device, label, || {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: shader,
                entry_point: "vs_main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: shader,
                entry_point: "fs_main",
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &fullscreen_target(),
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        })
    })
}

fn create_blend_pipeline(
    device: &wgpu::Device,
    camera_count: usize,
) -> BackendResult<(wgpu::RenderPipeline, wgpu::BindGroupLayout)> {
    let shader = shader_module(device, "Blend Shader", &blend_shader(camera_count))?;
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Blend Bind Group Layout"),
        entries: &[
            uniform_entry(0, wgpu::ShaderStages::FRAGMENT),
            uniform_entry(1, wgpu::ShaderStages::FRAGMENT),
            texture_entry(2, wgpu::TextureViewDimension::D2, false),
            texture_entry(3, wgpu::TextureViewDimension::D2Array, true),
            texture_entry(4, wgpu::TextureViewDimension::D2Array, false),
            texture_entry(5, wgpu::TextureViewDimension::D2Array, true),
            wgpu::BindGroupLayoutEntry {
                binding: 6,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
    });
    let pipeline = create_fullscreen_pipeline(device, "ULR Blend Pipeline", &shader, &layout)?;
    Ok((pipeline, layout))
}

fn create_resolve_pipeline(
    device: &wgpu::Device,
) -> BackendResult<(wgpu::RenderPipeline, wgpu::BindGroupLayout)> {
    let shader = shader_module(device, "Resolve Shader", &resolve_shader())?;
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Resolve Bind Group Layout"),
        entries: &[
            uniform_entry(0, wgpu::ShaderStages::FRAGMENT),
            texture_entry(1, wgpu::TextureViewDimension::D2, false),
        ],
    });
    let pipeline = create_fullscreen_pipeline(device, "Resolve Pipeline", &shader, &layout)?;
    Ok((pipeline, layout))
}
