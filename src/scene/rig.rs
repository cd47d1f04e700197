//! Orbit rigs for laying out source cameras and novel viewpoints

use super::{Camera, CameraId, InputCamera, Projection};
use glam::Vec3;

/// Cameras placed on an arc around a target point.
///
/// Azimuth 0 looks at the target from +Z; positive azimuth moves towards +X.
#[derive(Debug, Clone)]
pub struct OrbitRig {
    /// Target point every camera looks at
    pub target: Vec3,
    /// Distance from target
    pub distance: f32,
    /// Elevation angle in radians
    pub elevation: f32,
    /// Vertical field of view in degrees
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for OrbitRig {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            distance: 4.0,
            elevation: 0.0,
            fov_y_degrees: 45.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl OrbitRig {
    pub fn new(target: Vec3, distance: f32) -> Self {
        Self {
            target,
            distance,
            ..Default::default()
        }
    }

    pub fn with_elevation(mut self, elevation_degrees: f32) -> Self {
        self.elevation = elevation_degrees.to_radians();
        self
    }

    pub fn with_fov(mut self, fov_y_degrees: f32) -> Self {
        self.fov_y_degrees = fov_y_degrees;
        self
    }

    /// Camera position for an azimuth in radians
    pub fn position(&self, azimuth: f32) -> Vec3 {
        let x = self.distance * self.elevation.cos() * azimuth.sin();
        let y = self.distance * self.elevation.sin();
        let z = self.distance * self.elevation.cos() * azimuth.cos();
        self.target + Vec3::new(x, y, z)
    }

    /// Novel-viewpoint camera at the given azimuth
    pub fn camera(&self, azimuth: f32, width: u32, height: u32) -> Camera {
        Camera::new(self.position(azimuth), self.target).with_projection(Projection::perspective(
            self.fov_y_degrees,
            width as f32 / height.max(1) as f32,
            self.near,
            self.far,
        ))
    }

    /// `count` source cameras spread evenly over `[-half_arc, half_arc]`
    pub fn input_cameras(
        &self,
        count: usize,
        half_arc: f32,
        width: u32,
        height: u32,
    ) -> Vec<InputCamera> {
        (0..count)
            .map(|i| {
                let t = if count > 1 {
                    i as f32 / (count - 1) as f32
                } else {
                    0.5
                };
                let azimuth = -half_arc + 2.0 * half_arc * t;
                InputCamera::new(i as CameraId, &self.camera(azimuth, width, height), width, height)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_keep_distance() {
        let rig = OrbitRig::new(Vec3::new(1.0, 0.0, 0.0), 3.0).with_elevation(20.0);
        for azimuth in [-1.0f32, 0.0, 0.5] {
            let p = rig.position(azimuth);
            assert!(((p - rig.target).length() - 3.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_input_cameras_are_dense_and_symmetric() {
        let rig = OrbitRig::default();
        let cameras = rig.input_cameras(5, 0.6, 32, 24);
        assert_eq!(cameras.len(), 5);
        for (i, camera) in cameras.iter().enumerate() {
            assert_eq!(camera.id() as usize, i);
        }
        assert!((cameras[0].position().x + cameras[4].position().x).abs() < 1e-5);
        assert!(cameras[2].position().x.abs() < 1e-5);
    }
}
