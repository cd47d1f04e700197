//! Multigrid screened-Poisson seam filler

use crate::error::UlrResult;
use crate::pipeline::{BlendOutput, Coverage};
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::resources::TextureData;
use crate::UlrConfig;
use glam::Vec3;
use std::any::Any;

/// Resolution ratio between consecutive pyramid levels
pub const POISSON_SCALE: u32 = 2;

/// Fixed solver configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoissonConfig {
    pub levels: usize,
    pub iterations: usize,
}

impl Default for PoissonConfig {
    fn default() -> Self {
        Self {
            levels: 5,
            iterations: 2,
        }
    }
}

impl PoissonConfig {
    pub fn from_config(config: &UlrConfig) -> Self {
        Self {
            levels: config.poisson_levels,
            iterations: config.poisson_iterations,
        }
    }
}

/// Relaxation stencil for a level of relative scale `h`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stencil {
    pub xh0: f32,
    pub xh1: f32,
    pub center: f32,
    pub edge: f32,
    pub corner: f32,
}

impl Stencil {
    pub fn for_scale(h: f32) -> Self {
        let h2 = h * h;
        Self {
            xh0: -2.1532 + 1.5070 / h + 0.5882 / h2,
            xh1: 0.1138 + 0.9529 / h + 1.5065 / h2,
            center: (-8.0 * h2 - 4.0) / (3.0 * h2),
            edge: (h2 + 2.0) / (3.0 * h2),
            corner: (h2 - 1.0) / (3.0 * h2),
        }
    }

    /// Over-relaxation weight of iteration `i`
    pub fn xh(&self, iteration: usize) -> f32 {
        if iteration % 2 == 0 {
            self.xh0
        } else {
            self.xh1
        }
    }
}

/// One pyramid level: guidance `b`, constraint `v` and its weight `w`
struct Level {
    b: TextureData<Vec3>,
    v: TextureData<Vec3>,
    w: TextureData<f32>,
}

impl Level {
    fn finest(input: &BlendOutput) -> Self {
        let (width, height) = input.dimensions();
        let blended = |x: i32, y: i32| input.coverage.get_clamped(x, y) == Coverage::Blended;
        let rgb = |x: i32, y: i32| input.color.get_clamped(x, y).truncate();

        let b = TextureData::from_fn(width, height, "poisson_b", |x, y| {
            let (x, y) = (x as i32, y as i32);
            if !blended(x, y) {
                return Vec3::ZERO;
            }
            let centre = rgb(x, y);
            [(1, 0), (-1, 0), (0, 1), (0, -1)]
                .iter()
                .filter(|(dx, dy)| blended(x + dx, y + dy))
                .map(|(dx, dy)| rgb(x + dx, y + dy) - centre)
                .fold(Vec3::ZERO, |acc, d| acc + d)
        });
        let v = TextureData::from_fn(width, height, "poisson_v", |x, y| {
            if blended(x as i32, y as i32) {
                rgb(x as i32, y as i32)
            } else {
                Vec3::ZERO
            }
        });
        let w = input.coverage.map("poisson_w", |c| {
            if c == Coverage::Blended {
                1.0
            } else {
                0.0
            }
        });
        Self { b, v, w }
    }

    fn restrict(&self) -> Self {
        let (fine_w, fine_h) = self.b.dimensions();
        let width = fine_w.div_ceil(POISSON_SCALE);
        let height = fine_h.div_ceil(POISSON_SCALE);

        let mut b = TextureData::new(width, height, Vec3::ZERO, "poisson_b");
        let mut v = TextureData::new(width, height, Vec3::ZERO, "poisson_v");
        let mut w = TextureData::new(width, height, 0.0, "poisson_w");

        for y in 0..height {
            for x in 0..width {
                let mut b_sum = Vec3::ZERO;
                let mut v_sum = Vec3::ZERO;
                let mut w_sum = 0.0;
                let mut children = 0;
                for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                    let (cx, cy) = (x * POISSON_SCALE + dx, y * POISSON_SCALE + dy);
                    if cx >= fine_w || cy >= fine_h {
                        continue;
                    }
                    let cw = self.w.get(cx, cy);
                    b_sum += self.b.get(cx, cy);
                    v_sum += self.v.get(cx, cy) * cw;
                    w_sum += cw;
                    children += 1;
                }
                b.set(x, y, b_sum);
                if w_sum > 0.0 {
                    v.set(x, y, v_sum / w_sum);
                }
                if children > 0 {
                    w.set(x, y, w_sum / children as f32);
                }
            }
        }
        Self { b, v, w }
    }

    /// Weighted Jacobi relaxation followed by screening toward `v`
    fn relax(&self, x: &TextureData<Vec3>, stencil: &Stencil, iteration: usize) -> TextureData<Vec3> {
        let xh = stencil.xh(iteration);
        let (width, height) = x.dimensions();
        TextureData::from_fn(width, height, "poisson_x", |px, py| {
            let (i, j) = (px as i32, py as i32);
            let edges = x.get_clamped(i + 1, j)
                + x.get_clamped(i - 1, j)
                + x.get_clamped(i, j + 1)
                + x.get_clamped(i, j - 1);
            let corners = x.get_clamped(i + 1, j + 1)
                + x.get_clamped(i - 1, j + 1)
                + x.get_clamped(i + 1, j - 1)
                + x.get_clamped(i - 1, j - 1);
            let current = x.get(px, py);
            let solved = (self.b.get(px, py) - edges * stencil.edge - corners * stencil.corner
                - current * xh)
                / (stencil.center - xh);
            let w = self.w.get(px, py);
            self.v.get(px, py) * w + solved * (1.0 - w)
        })
    }
}

/// Pyramid level sizes, finest first
pub fn level_sizes(width: u32, height: u32, config: &PoissonConfig) -> Vec<(u32, u32)> {
    let mut sizes = vec![(width, height)];
    while sizes.len() < config.levels {
        let Some(&(w, h)) = sizes.last() else { break };
        if w <= 1 && h <= 1 {
            break;
        }
        sizes.push((w.div_ceil(POISSON_SCALE), h.div_ceil(POISSON_SCALE)));
    }
    sizes
}

fn upsample(coarse: &TextureData<Vec3>, width: u32, height: u32) -> TextureData<Vec3> {
    let mut fine = TextureData::new(width, height, Vec3::ZERO, "poisson_x");
    for y in 0..height {
        for x in 0..width {
            let uv = fine.pixel_center_uv(x, y);
            fine.set(x, y, coarse.sample_bilinear(uv));
        }
    }
    fine
}

/// Fill the `Unblended` pixels of a composite by a multigrid Poisson solve.
///
/// `Blended` and `NoGeometry` pixels are returned untouched.
pub fn fill(input: &BlendOutput, config: &PoissonConfig) -> BlendOutput {
    let (width, height) = input.dimensions();
    if width == 0 || height == 0 || config.levels == 0 {
        return input.clone();
    }

    let mut levels = vec![Level::finest(input)];
    for _ in 1..level_sizes(width, height, config).len() {
        let Some(last) = levels.last() else { break };
        let next = last.restrict();
        levels.push(next);
    }

    let mut solution: Option<TextureData<Vec3>> = None;
    for (index, level) in levels.iter().enumerate().rev() {
        let (w, h) = level.b.dimensions();
        let mut x = match &solution {
            Some(coarse) => upsample(coarse, w, h),
            None => level.v.clone(),
        };
        let stencil = Stencil::for_scale((1u32 << index) as f32);
        for iteration in 0..config.iterations {
            x = level.relax(&x, &stencil, iteration);
        }
        solution = Some(x);
    }

    let mut output = input.clone();
    if let Some(x) = solution {
        for (i, coverage) in input.coverage.texels.iter().enumerate() {
            if *coverage == Coverage::Unblended {
                output.color.texels[i] = x.texels[i].extend(1.0);
            }
        }
    }
    output
}

/// Poisson seam-filling pass over the blend composite
pub struct PoissonPass {
    input: ResourceId,
    filled: Option<ResourceId>,
    config: PoissonConfig,
}

impl PoissonPass {
    pub fn new(input: ResourceId, config: PoissonConfig) -> Self {
        Self {
            input,
            filled: None,
            config,
        }
    }

    pub fn filled(&self) -> Option<ResourceId> {
        self.filled
    }
}

impl RenderPass for PoissonPass {
    fn name(&self) -> &str {
        "Poisson Fill"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.input, ResourceUsage::StorageRead);
        let filled = ctx.create_texture("poisson_filled", FrameFormat::Blend);
        self.filled = Some(filled);
        ctx.write(filled, ResourceUsage::StorageWrite);
    }

    fn execute(&self, ctx: &mut PassExecuteContext) -> UlrResult<()> {
        let Some(filled) = self.filled else {
            return Ok(());
        };
        let output = fill(ctx.resources.blend(self.input)?, &self.config);
        ctx.resources.insert(filled, FrameImage::Blend(output))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
