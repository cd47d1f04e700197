//! Compute-shader multigrid Poisson fill

use super::shaders::{validate_wgsl, POISSON_ENTRY_POINTS, POISSON_SHADER};
use super::GpuTexture;
use crate::backend::traits::BackendResult;
use crate::backend::types::PoissonUniforms;
use crate::pipeline::postprocess::{level_sizes, PoissonConfig, Stencil};
use wgpu::util::DeviceExt;

const WORKGROUP_SIZE: u32 = 8;

const INIT: usize = 0;
const RESTRICT: usize = 1;
const SEED: usize = 2;
const RELAX: usize = 3;
const UPSAMPLE: usize = 4;
const COMPOSE: usize = 5;

/// Textures of one pyramid level
struct LevelTargets {
    size: (u32, u32),
    guidance: GpuTexture,
    constraint: GpuTexture,
    solution: [GpuTexture; 2],
}

impl LevelTargets {
    fn new(device: &wgpu::Device, index: usize, size: (u32, u32)) -> Self {
        let target = |name: &str| {
            GpuTexture::storage(device, &format!("Poisson L{} {}", index, name), size)
        };
        Self {
            size,
            guidance: target("guidance"),
            constraint: target("constraint"),
            solution: [target("solution A"), target("solution B")],
        }
    }
}

/// One kernel dispatch: pipeline index, bind group and grid size
struct Dispatch {
    kernel: usize,
    bind_group: wgpu::BindGroup,
    size: (u32, u32),
}

pub(crate) struct GpuPoisson {
    config: PoissonConfig,
    layout: wgpu::BindGroupLayout,
    pipelines: Vec<wgpu::ComputePipeline>,
    levels: Vec<LevelTargets>,
    filled: GpuTexture,
    unused_input: GpuTexture,
    unused_output: GpuTexture,
}

impl GpuPoisson {
    pub fn new(
        device: &wgpu::Device,
        config: PoissonConfig,
        width: u32,
        height: u32,
    ) -> BackendResult<Self> {
        validate_wgsl("poisson", POISSON_SHADER)?;
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Poisson Shader"),
            source: wgpu::ShaderSource::Wgsl(POISSON_SHADER.into()),
        });

        let sampled = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let storage = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: wgpu::TextureFormat::Rgba32Float,
                view_dimension: wgpu::TextureViewDimension::D2,
            },
            count: None,
        };
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Poisson Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                sampled(1),
                sampled(2),
                sampled(3),
                storage(4),
                storage(5),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Poisson Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipelines = POISSON_ENTRY_POINTS
            .iter()
            .map(|entry_point| {
                device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(entry_point),
                    layout: Some(&pipeline_layout),
                    module: &shader,
                    entry_point,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                })
            })
            .collect();

        let mut poisson = Self {
            config,
            layout,
            pipelines,
            levels: Vec::new(),
            filled: GpuTexture::storage(device, "Poisson Filled", (width, height)),
            unused_input: GpuTexture::storage(device, "Poisson Unused Input", (1, 1)),
            unused_output: GpuTexture::storage(device, "Poisson Unused Output", (1, 1)),
        };
        poisson.resize(device, width, height);
        Ok(poisson)
    }

    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        self.levels = level_sizes(width, height, &self.config)
            .into_iter()
            .enumerate()
            .map(|(index, size)| LevelTargets::new(device, index, size))
            .collect();
        self.filled = GpuTexture::storage(device, "Poisson Filled", (width, height));
        log::debug!("Poisson pyramid: {} levels", self.levels.len());
    }

    /// The filled composite written by [`GpuPoisson::encode`]
    pub fn filled(&self) -> &GpuTexture {
        &self.filled
    }

    /// Record the whole solve, reading `composite`
    pub fn encode(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        composite: &GpuTexture,
    ) {
        let dispatches = self.plan(device, composite);

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Poisson Fill"),
            timestamp_writes: None,
        });
        for dispatch in &dispatches {
            pass.set_pipeline(&self.pipelines[dispatch.kernel]);
            pass.set_bind_group(0, &dispatch.bind_group, &[]);
            pass.dispatch_workgroups(
                dispatch.size.0.div_ceil(WORKGROUP_SIZE),
                dispatch.size.1.div_ceil(WORKGROUP_SIZE),
                1,
            );
        }
    }

    /// Bind groups of every dispatch, in execution order
    fn plan(&self, device: &wgpu::Device, composite: &GpuTexture) -> Vec<Dispatch> {
        let mut dispatches = Vec::new();
        let Some(finest) = self.levels.first() else {
            return dispatches;
        };

        let mut push = |kernel: usize,
                        uniforms: PoissonUniforms,
                        inputs: [Option<&GpuTexture>; 3],
                        outputs: [Option<&GpuTexture>; 2]| {
            let size = (uniforms.sizes[0], uniforms.sizes[1]);
            let bind_group = self.bind_group(device, &uniforms, inputs, outputs);
            dispatches.push(Dispatch {
                kernel,
                bind_group,
                size,
            });
        };

        push(
            INIT,
            PoissonUniforms::sizes(finest.size, finest.size),
            [Some(composite), None, None],
            [Some(&finest.guidance), Some(&finest.constraint)],
        );
        for pair in self.levels.windows(2) {
            let (fine, coarse) = (&pair[0], &pair[1]);
            push(
                RESTRICT,
                PoissonUniforms::sizes(coarse.size, fine.size),
                [Some(&fine.guidance), Some(&fine.constraint), None],
                [Some(&coarse.guidance), Some(&coarse.constraint)],
            );
        }

        // Coarse to fine; `current` indexes the level's live solution buffer
        let mut previous: Option<(&GpuTexture, (u32, u32))> = None;
        for (index, level) in self.levels.iter().enumerate().rev() {
            match previous {
                Some((coarse, coarse_size)) => push(
                    UPSAMPLE,
                    PoissonUniforms::sizes(level.size, coarse_size),
                    [Some(coarse), None, None],
                    [Some(&level.solution[0]), None],
                ),
                None => push(
                    SEED,
                    PoissonUniforms::sizes(level.size, level.size),
                    [Some(&level.constraint), None, None],
                    [Some(&level.solution[0]), None],
                ),
            }

            let stencil = Stencil::for_scale((1u32 << index) as f32);
            let mut current = 0;
            for iteration in 0..self.config.iterations {
                push(
                    RELAX,
                    PoissonUniforms::relax(level.size, &stencil, iteration),
                    [
                        Some(&level.solution[current]),
                        Some(&level.guidance),
                        Some(&level.constraint),
                    ],
                    [Some(&level.solution[1 - current]), None],
                );
                current = 1 - current;
            }
            previous = Some((&level.solution[current], level.size));
        }

        if let Some((solution, size)) = previous {
            push(
                COMPOSE,
                PoissonUniforms::sizes(size, size),
                [Some(composite), Some(solution), None],
                [Some(&self.filled), None],
            );
        }
        dispatches
    }

    fn bind_group(
        &self,
        device: &wgpu::Device,
        uniforms: &PoissonUniforms,
        inputs: [Option<&GpuTexture>; 3],
        outputs: [Option<&GpuTexture>; 2],
    ) -> wgpu::BindGroup {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Poisson Uniforms"),
            contents: bytemuck::bytes_of(uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let input = |i: usize| &inputs[i].unwrap_or(&self.unused_input).view;
        let output = |i: usize| &outputs[i].unwrap_or(&self.unused_output).view;

        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Poisson Bind Group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(input(0)),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(input(1)),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(input(2)),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(output(0)),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: wgpu::BindingResource::TextureView(output(1)),
                },
            ],
        })
    }
}
