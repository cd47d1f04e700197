//! Per-camera validity masks

use super::TextureData;
use crate::error::{UlrError, UlrResult};
use crate::scene::{CameraId, CameraRegistry};
use std::path::Path;

/// Optional mask per source camera, loaded once at setup.
///
/// Values are in `[0, 1]`; cameras without a mask are treated as fully valid.
#[derive(Debug, Clone, Default)]
pub struct MaskSet {
    masks: Vec<Option<TextureData<f32>>>,
}

impl MaskSet {
    /// Empty set sized for the registry
    pub fn new(registry: &CameraRegistry) -> Self {
        Self {
            masks: vec![None; registry.len()],
        }
    }

    /// Attach a mask to a camera; it must match the camera resolution
    pub fn set(
        &mut self,
        registry: &CameraRegistry,
        camera: CameraId,
        mask: TextureData<f32>,
    ) -> UlrResult<()> {
        let input = registry.get(camera).ok_or(UlrError::UnknownCamera(camera))?;
        if mask.dimensions() != input.resolution() {
            return Err(UlrError::InvalidMask {
                camera,
                reason: format!(
                    "mask is {:?}, camera resolution is {:?}",
                    mask.dimensions(),
                    input.resolution()
                ),
            });
        }
        if mask.texels.iter().any(|v| !v.is_finite()) {
            return Err(UlrError::InvalidMask {
                camera,
                reason: "mask contains non-finite values".into(),
            });
        }
        if self.masks.len() < registry.len() {
            self.masks.resize(registry.len(), None);
        }
        self.masks[camera as usize] = Some(mask);
        Ok(())
    }

    /// Load a mask image (luma) for a camera
    pub fn load<P: AsRef<Path>>(
        &mut self,
        registry: &CameraRegistry,
        camera: CameraId,
        path: P,
    ) -> UlrResult<()> {
        let mask = TextureData::luma_from_file(path)?;
        self.set(registry, camera, mask)
    }

    pub fn get(&self, camera: CameraId) -> Option<&TextureData<f32>> {
        self.masks.get(camera as usize).and_then(Option::as_ref)
    }

    /// Number of cameras that carry a mask
    pub fn len(&self) -> usize {
        self.masks.iter().filter(|m| m.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ensure every attached mask still matches its camera
    pub fn validate(&self, registry: &CameraRegistry) -> UlrResult<()> {
        for (index, mask) in self.masks.iter().enumerate() {
            let Some(mask) = mask else { continue };
            let camera = index as CameraId;
            let input = registry.get(camera).ok_or(UlrError::UnknownCamera(camera))?;
            if mask.dimensions() != input.resolution() {
                return Err(UlrError::InvalidMask {
                    camera,
                    reason: "resolution no longer matches the camera".into(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::OrbitRig;
    use glam::Vec3;

    #[test]
    fn test_set_and_get() {
        let rig = OrbitRig::new(Vec3::ZERO, 3.0);
        let registry = CameraRegistry::new(rig.input_cameras(2, 0.3, 8, 4)).unwrap();
        let mut masks = MaskSet::new(&registry);
        assert!(masks.is_empty());

        masks.set(&registry, 1, TextureData::new(8, 4, 0.0, "m")).unwrap();
        assert_eq!(masks.len(), 1);
        assert!(masks.get(0).is_none());
        assert!(masks.get(1).is_some());
        assert!(masks.validate(&registry).is_ok());
    }

    #[test]
    fn test_rejects_bad_masks() {
        let rig = OrbitRig::new(Vec3::ZERO, 3.0);
        let registry = CameraRegistry::new(rig.input_cameras(2, 0.3, 8, 4)).unwrap();
        let mut masks = MaskSet::new(&registry);
        assert!(matches!(
            masks.set(&registry, 0, TextureData::new(4, 4, 1.0, "m")),
            Err(UlrError::InvalidMask { camera: 0, .. })
        ));
        assert!(matches!(
            masks.set(&registry, 9, TextureData::new(8, 4, 1.0, "m")),
            Err(UlrError::UnknownCamera(9))
        ));
    }
}
