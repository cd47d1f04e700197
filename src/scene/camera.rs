//! Camera system

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4Swizzles};

/// Stable camera identifier, equal to the camera's slot in the registry
pub type CameraId = u32;

/// Perspective projection of a pinhole camera
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            fov_y: std::f32::consts::FRAC_PI_4, // 45 degrees
            aspect: 4.0 / 3.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Projection {
    pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    pub fn near(&self) -> f32 {
        self.near
    }

    pub fn far(&self) -> f32 {
        self.far
    }

    pub fn fov_y(&self) -> f32 {
        self.fov_y
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    /// Same projection with a different near plane
    pub fn with_near(mut self, near: f32) -> Self {
        self.near = near;
        self
    }
}

/// Novel-viewpoint camera
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub projection: Projection,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            projection: Projection::default(),
        }
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            up: Vec3::Y,
            projection: Projection::default(),
        }
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// Get the view matrix
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Get the projection matrix
    pub fn projection_matrix(&self) -> Mat4 {
        self.projection.matrix()
    }

    /// Get combined view-projection matrix
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Get the forward direction
    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize()
    }
}

/// A calibrated source camera.
///
/// The view-projection matrix is fixed at construction; only the active flag
/// changes afterwards (through the registry).
#[derive(Debug, Clone)]
pub struct InputCamera {
    id: CameraId,
    pub(crate) active: bool,
    width: u32,
    height: u32,
    position: Vec3,
    direction: Vec3,
    up: Vec3,
    fov_y: f32,
    near: f32,
    far: f32,
    view_proj: Mat4,
}

impl InputCamera {
    /// Build a source camera from a pose and its image resolution.
    ///
    /// The projection's aspect ratio is overridden by `width / height`.
    pub fn new(id: CameraId, pose: &Camera, width: u32, height: u32) -> Self {
        let mut projection = pose.projection;
        projection.set_aspect(width as f32 / height.max(1) as f32);
        let view_proj = projection.matrix() * pose.view_matrix();

        Self {
            id,
            active: true,
            width,
            height,
            position: pose.position,
            direction: pose.forward(),
            up: pose.up,
            fov_y: projection.fov_y(),
            near: projection.near(),
            far: projection.far(),
            view_proj,
        }
    }

    /// Build a source camera from calibration matrices
    pub fn from_matrices(
        id: CameraId,
        view: Mat4,
        projection: Projection,
        width: u32,
        height: u32,
    ) -> Self {
        let camera_to_world = view.inverse();
        let position = camera_to_world.w_axis.xyz();
        let direction = (-camera_to_world.z_axis.xyz()).normalize();
        let up = camera_to_world.y_axis.xyz().normalize();

        Self {
            id,
            active: true,
            width,
            height,
            position,
            direction,
            up,
            fov_y: projection.fov_y(),
            near: projection.near(),
            far: projection.far(),
            view_proj: projection.matrix() * view,
        }
    }

    pub fn id(&self) -> CameraId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Normalized viewing direction
    pub fn direction(&self) -> Vec3 {
        self.direction
    }

    pub fn up(&self) -> Vec3 {
        self.up
    }

    pub fn fov_y(&self) -> f32 {
        self.fov_y
    }

    pub fn near(&self) -> f32 {
        self.near
    }

    pub fn far(&self) -> f32 {
        self.far
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.view_proj
    }

    /// Project a world point into this camera.
    ///
    /// Returns the image-plane UV (v = 0 on the top row) and the NDC depth, or
    /// `None` when the point lies behind the camera. The UV is not clamped.
    pub fn project(&self, point: Vec3) -> Option<(Vec2, f32)> {
        let clip = self.view_proj * point.extend(1.0);
        if clip.w <= f32::EPSILON {
            return None;
        }
        let ndc = clip.xyz() / clip.w;
        let uv = Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
        Some((uv, ndc.z))
    }

    /// GPU record for the camera-info uniform array
    pub fn info(&self, selected: bool) -> CameraInfo {
        CameraInfo {
            view_proj: self.view_proj,
            position: self.position.to_array(),
            selected: selected as i32,
            direction: self.direction.to_array(),
            _pad: 0.0,
        }
    }
}

/// Per-camera uniform record (96 bytes, std140 compatible)
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraInfo {
    pub view_proj: Mat4,
    pub position: [f32; 3],
    pub selected: i32,
    pub direction: [f32; 3],
    pub _pad: f32,
}
