//! Combined alignment/distance score selection

use super::{CameraSelector, SelectionSet};
use crate::scene::{Camera, CameraId, CameraRegistry};

/// Cosine below which a camera counts as back-facing
const MIN_ALIGNMENT: f32 = 0.001;

/// Ranks front-facing cameras by `dot(cam.dir, eye.dir) / distance`.
///
/// Back-facing cameras (more than 90 degrees from the eye direction) are only
/// used to backfill when too few front-facing ones exist.
#[derive(Debug, Clone)]
pub struct CombinedScoreSelector {
    pub total: usize,
}

impl CombinedScoreSelector {
    pub fn new(total: usize) -> Self {
        Self { total }
    }
}

impl CameraSelector for CombinedScoreSelector {
    fn name(&self) -> &'static str {
        "combined score"
    }

    fn select(&self, registry: &CameraRegistry, eye: &Camera) -> SelectionSet {
        if self.total == 0 {
            return SelectionSet::empty();
        }

        let eye_dir = eye.forward();
        let mut scored: Vec<(f32, CameraId)> = registry
            .active()
            .filter_map(|c| {
                let alignment = c.direction().dot(eye_dir);
                if alignment <= MIN_ALIGNMENT {
                    return None;
                }
                let distance = (c.position() - eye.position).length().max(f32::EPSILON);
                Some((alignment / distance, c.id()))
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut ids: Vec<CameraId> = scored.iter().take(self.total).map(|&(_, id)| id).collect();

        if ids.len() < self.total {
            let mut unused: Vec<(f32, CameraId)> = registry
                .active()
                .filter(|c| !ids.contains(&c.id()))
                .map(|c| ((c.position() - eye.position).length(), c.id()))
                .collect();
            unused.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            ids.extend(unused.iter().take(self.total - ids.len()).map(|&(_, id)| id));
        }

        SelectionSet::from_ids(ids)
    }

    fn budget(&self) -> Option<usize> {
        Some(self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{InputCamera, OrbitRig};
    use glam::Vec3;

    #[test]
    fn test_prefers_aligned_close_cameras() {
        let rig = OrbitRig::new(Vec3::ZERO, 4.0);
        let registry = CameraRegistry::new(rig.input_cameras(7, 1.2, 16, 16)).unwrap();
        let eye = rig.camera(0.0, 16, 16);
        let selection = CombinedScoreSelector::new(3).select(&registry, &eye);
        assert_eq!(selection.ids()[0], 3);
        assert_eq!(selection.sorted(), vec![2, 3, 4]);
    }

    #[test]
    fn test_back_facing_cameras_only_backfill() {
        let front = Camera::new(Vec3::new(0.0, 0.0, 4.0), Vec3::ZERO);
        let back = Camera::new(Vec3::new(0.0, 0.0, -4.0), Vec3::ZERO);
        let registry = CameraRegistry::new(vec![
            InputCamera::new(0, &back, 8, 8),
            InputCamera::new(1, &front, 8, 8),
        ])
        .unwrap();
        let eye = Camera::new(Vec3::new(0.5, 0.0, 4.0), Vec3::ZERO);

        assert_eq!(CombinedScoreSelector::new(1).select(&registry, &eye).ids(), &[1]);
        // Budget of two is filled with the back-facing camera
        assert_eq!(CombinedScoreSelector::new(2).select(&registry, &eye).ids(), &[1, 0]);
    }
}
