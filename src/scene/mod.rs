//! Scene management: source cameras and novel viewpoints

mod camera;
mod rig;

pub use camera::*;
pub use rig::*;

use crate::error::{UlrError, UlrResult};

/// The fixed set of source cameras of a dataset.
///
/// Camera `i` always has id `i`; only the active flags change after
/// construction.
#[derive(Debug, Clone, Default)]
pub struct CameraRegistry {
    cameras: Vec<InputCamera>,
}

impl CameraRegistry {
    pub fn new(cameras: Vec<InputCamera>) -> UlrResult<Self> {
        for (index, camera) in cameras.iter().enumerate() {
            if camera.id() as usize != index {
                return Err(UlrError::NonDenseCameraIds {
                    index,
                    found: camera.id(),
                });
            }
        }
        Ok(Self { cameras })
    }

    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    pub fn get(&self, id: CameraId) -> Option<&InputCamera> {
        self.cameras.get(id as usize)
    }

    pub fn cameras(&self) -> &[InputCamera] {
        &self.cameras
    }

    /// Iterate over active cameras in id order
    pub fn active(&self) -> impl Iterator<Item = &InputCamera> {
        self.cameras.iter().filter(|c| c.active)
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    pub fn is_active(&self, id: CameraId) -> bool {
        self.get(id).map_or(false, |c| c.active)
    }

    /// Toggle a camera in or out of every subsequent selection
    pub fn set_active(&mut self, id: CameraId, active: bool) -> UlrResult<()> {
        let camera = self
            .cameras
            .get_mut(id as usize)
            .ok_or(UlrError::UnknownCamera(id))?;
        if camera.active != active {
            log::debug!("Camera {} {}", id, if active { "activated" } else { "deactivated" });
        }
        camera.active = active;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn registry(count: usize) -> CameraRegistry {
        let rig = OrbitRig::new(Vec3::ZERO, 4.0);
        CameraRegistry::new(rig.input_cameras(count, 0.5, 16, 16)).unwrap()
    }

    #[test]
    fn test_rejects_non_dense_ids() {
        let pose = Camera::default();
        let cameras = vec![InputCamera::new(0, &pose, 8, 8), InputCamera::new(2, &pose, 8, 8)];
        assert!(matches!(
            CameraRegistry::new(cameras),
            Err(UlrError::NonDenseCameraIds { index: 1, found: 2 })
        ));
    }

    #[test]
    fn test_set_active_toggles_membership() {
        let mut registry = registry(4);
        assert_eq!(registry.active_count(), 4);
        registry.set_active(2, false).unwrap();
        assert_eq!(registry.active_count(), 3);
        assert!(!registry.is_active(2));
        assert!(registry.active().all(|c| c.id() != 2));
        registry.set_active(2, true).unwrap();
        assert!(registry.is_active(2));
    }

    #[test]
    fn test_set_active_unknown_camera() {
        let mut registry = registry(2);
        assert!(matches!(registry.set_active(7, false), Err(UlrError::UnknownCamera(7))));
    }
}
