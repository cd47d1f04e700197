//! Position pre-pass: rasterizes the proxy mesh from the novel viewpoint

use super::PositionBuffer;
use crate::error::UlrResult;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::resources::{ProxyMesh, TextureData};
use glam::{Mat4, Vec2, Vec3, Vec4};
use std::any::Any;

/// Pre-pass value of pixels not covered by the proxy
pub const BACKGROUND_POSITION: Vec4 = Vec4::new(0.0, 0.0, 0.0, 1.0);

/// Whether a pre-pass texel is the "no geometry" sentinel
#[inline]
pub fn is_background(texel: Vec4) -> bool {
    texel.w >= 1.0
}

/// Output of [`Rasterizer::rasterize`]
#[derive(Debug, Clone)]
pub struct RasterOutput {
    /// World position in xyz, NDC depth in w
    pub positions: PositionBuffer,
    /// Number of pixels covered by the mesh
    pub covered: usize,
}

#[derive(Debug, Clone, Copy)]
struct ClipVertex {
    clip: Vec4,
    world: Vec3,
}

impl ClipVertex {
    fn lerp(self, other: ClipVertex, t: f32) -> ClipVertex {
        ClipVertex {
            clip: self.clip.lerp(other.clip, t),
            world: self.world.lerp(other.world, t),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ScreenVertex {
    screen: Vec2,
    ndc_z: f32,
    inv_w: f32,
    world_over_w: Vec3,
}

/// Scanline-free triangle rasterizer writing world positions.
///
/// Follows the wgpu conventions: clip z in `[0, w]`, counter-clockwise front
/// faces, depth test `Less`, pixel centres at half-integer coordinates.
#[derive(Debug, Clone)]
pub struct Rasterizer {
    width: u32,
    height: u32,
    backface_culling: bool,
}

impl Rasterizer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            backface_culling: true,
        }
    }

    pub fn with_backface_culling(mut self, enabled: bool) -> Self {
        self.backface_culling = enabled;
        self
    }

    /// Rasterize every triangle of `mesh` through `view_proj`
    pub fn rasterize(&self, mesh: &ProxyMesh, view_proj: Mat4) -> RasterOutput {
        let mut positions =
            TextureData::new(self.width, self.height, BACKGROUND_POSITION, "prepass_positions");
        let mut covered = 0;

        for triangle in mesh.triangles() {
            let vertices = triangle.map(|world| ClipVertex {
                clip: view_proj * world.extend(1.0),
                world,
            });
            let polygon = clip_near(&vertices);
            if polygon.len() < 3 {
                continue;
            }
            let screen: Vec<ScreenVertex> = polygon.iter().map(|v| self.to_screen(v)).collect();
            for i in 1..screen.len() - 1 {
                covered += self.fill(&mut positions, [screen[0], screen[i], screen[i + 1]]);
            }
        }

        RasterOutput { positions, covered }
    }

    fn to_screen(&self, v: &ClipVertex) -> ScreenVertex {
        let inv_w = 1.0 / v.clip.w;
        let ndc = v.clip.truncate() * inv_w;
        ScreenVertex {
            screen: Vec2::new(
                (ndc.x * 0.5 + 0.5) * self.width as f32,
                (0.5 - ndc.y * 0.5) * self.height as f32,
            ),
            ndc_z: ndc.z,
            inv_w,
            world_over_w: v.world * inv_w,
        }
    }

    /// Fill one triangle, returning the number of pixels that passed the depth test
    fn fill(&self, target: &mut PositionBuffer, tri: [ScreenVertex; 3]) -> usize {
        let [a, b, c] = tri;
        // Screen y points down, so counter-clockwise NDC triangles have negative area here
        let area = edge(a.screen, b.screen, c.screen);
        if area == 0.0 || !area.is_finite() {
            return 0;
        }
        if self.backface_culling && area > 0.0 {
            return 0;
        }

        let min = a.screen.min(b.screen).min(c.screen);
        let max = a.screen.max(b.screen).max(c.screen);
        let x0 = (min.x - 0.5).ceil().max(0.0) as u32;
        let y0 = (min.y - 0.5).ceil().max(0.0) as u32;
        let x1 = ((max.x - 0.5).floor() as i64).min(self.width as i64 - 1);
        let y1 = ((max.y - 0.5).floor() as i64).min(self.height as i64 - 1);
        if x1 < x0 as i64 || y1 < y0 as i64 {
            return 0;
        }

        let mut written = 0;
        for y in y0..=y1 as u32 {
            for x in x0..=x1 as u32 {
                let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let l0 = edge(b.screen, c.screen, p) / area;
                let l1 = edge(c.screen, a.screen, p) / area;
                let l2 = edge(a.screen, b.screen, p) / area;
                if l0 < 0.0 || l1 < 0.0 || l2 < 0.0 {
                    continue;
                }

                let z = l0 * a.ndc_z + l1 * b.ndc_z + l2 * c.ndc_z;
                if !(0.0..=1.0).contains(&z) || z >= target.get(x, y).w {
                    continue;
                }

                let inv_w = l0 * a.inv_w + l1 * b.inv_w + l2 * c.inv_w;
                let world =
                    (a.world_over_w * l0 + b.world_over_w * l1 + c.world_over_w * l2) / inv_w;
                target.set(x, y, world.extend(z));
                written += 1;
            }
        }
        written
    }
}

#[inline]
fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Sutherland-Hodgman clip against the near plane `z >= 0`
fn clip_near(vertices: &[ClipVertex; 3]) -> Vec<ClipVertex> {
    let mut out = Vec::with_capacity(4);
    for i in 0..3 {
        let current = vertices[i];
        let next = vertices[(i + 1) % 3];
        let dc = current.clip.z;
        let dn = next.clip.z;
        if dc >= 0.0 {
            out.push(current);
        }
        if (dc >= 0.0) != (dn >= 0.0) {
            let t = dc / (dc - dn);
            out.push(current.lerp(next, t));
        }
    }
    out
}

/// Position pre-pass for the novel viewpoint
pub struct DepthPrepass {
    positions: Option<ResourceId>,
}

impl DepthPrepass {
    pub fn new() -> Self {
        Self { positions: None }
    }

    pub fn positions(&self) -> Option<ResourceId> {
        self.positions
    }
}

impl Default for DepthPrepass {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderPass for DepthPrepass {
    fn name(&self) -> &str {
        "Depth Prepass"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        let positions = ctx.create_texture("prepass_positions", FrameFormat::Position);
        self.positions = Some(positions);
        ctx.write(positions, ResourceUsage::RenderTarget);
    }

    fn execute(&self, ctx: &mut PassExecuteContext) -> UlrResult<()> {
        let Some(id) = self.positions else {
            return Ok(());
        };
        let frame = ctx.frame;
        let projection = frame.eye.projection.with_near(frame.config.prepass_near);
        let view_proj = projection.matrix() * frame.eye.view_matrix();

        let raster = Rasterizer::new(ctx.width, ctx.height)
            .with_backface_culling(frame.config.backface_culling)
            .rasterize(frame.mesh, view_proj);
        log::debug!(
            "Pre-pass covered {} of {} pixels",
            raster.covered,
            ctx.width * ctx.height
        );

        ctx.resources.insert(id, FrameImage::Positions(raster.positions))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Camera, Projection};

    fn front_camera() -> Camera {
        Camera::new(Vec3::new(0.0, 0.0, 4.0), Vec3::ZERO)
            .with_projection(Projection::perspective(45.0, 1.0, 0.1, 100.0))
    }

    #[test]
    fn test_quad_positions_lie_on_plane() {
        let mesh = ProxyMesh::quad(Vec3::ZERO, Vec3::X, Vec3::Y);
        let raster = Rasterizer::new(32, 32).rasterize(&mesh, front_camera().view_projection_matrix());
        assert!(raster.covered > 0);

        let centre = raster.positions.get(16, 16);
        assert!(!is_background(centre));
        assert!(centre.z.abs() < 1e-4);
        assert!(centre.x.abs() < 0.1 && centre.y.abs() < 0.1);

        // Corners fall outside the unit quad at this distance
        assert!(is_background(raster.positions.get(0, 0)));
    }

    #[test]
    fn test_top_row_is_world_up() {
        let mesh = ProxyMesh::quad(Vec3::ZERO, Vec3::X * 4.0, Vec3::Y * 4.0);
        let raster = Rasterizer::new(16, 16).rasterize(&mesh, front_camera().view_projection_matrix());
        assert!(raster.positions.get(8, 1).y > 0.0);
        assert!(raster.positions.get(8, 14).y < 0.0);
        assert!(raster.positions.get(1, 8).x < 0.0);
    }

    #[test]
    fn test_backface_culling() {
        // Facing away from the camera
        let mesh = ProxyMesh::quad(Vec3::ZERO, -Vec3::X, Vec3::Y);
        let vp = front_camera().view_projection_matrix();
        let culled = Rasterizer::new(16, 16).rasterize(&mesh, vp);
        assert_eq!(culled.covered, 0);

        let kept = Rasterizer::new(16, 16)
            .with_backface_culling(false)
            .rasterize(&mesh, vp);
        assert!(kept.covered > 0);
    }

    #[test]
    fn test_nearest_surface_wins() {
        let mut mesh = ProxyMesh::quad(Vec3::ZERO, Vec3::X * 2.0, Vec3::Y * 2.0);
        mesh.merge(&ProxyMesh::quad(Vec3::new(0.0, 0.0, 1.0), Vec3::X * 0.5, Vec3::Y * 0.5));
        let raster = Rasterizer::new(32, 32).rasterize(&mesh, front_camera().view_projection_matrix());
        assert!((raster.positions.get(16, 16).z - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_near_plane_clipping_keeps_visible_part() {
        // Floor running from behind the camera to far in front of it
        let mesh = ProxyMesh::quad(
            Vec3::new(0.0, -1.0, 0.0),
            Vec3::X * 4.0,
            Vec3::new(0.0, 0.0, -10.0),
        );
        let camera = front_camera();
        let raster = Rasterizer::new(32, 32).rasterize(&mesh, camera.view_projection_matrix());
        assert!(raster.covered > 0);
        for texel in raster.positions.texels.iter().filter(|t| !is_background(**t)) {
            assert!((texel.y + 1.0).abs() < 1e-3);
            assert!(texel.z < camera.position.z);
        }
    }
}
