//! Distance + angle top-K selection

use super::{angle_between, CameraSelector, SelectionSet};
use crate::scene::{Camera, CameraId, CameraRegistry};

/// Keeps the `num_dist` cameras closest to the eye and the `num_angle`
/// cameras whose viewing direction is closest to the eye's, then backfills
/// by distance up to the total budget.
#[derive(Debug, Clone)]
pub struct DistanceAngleSelector {
    pub num_dist: usize,
    pub num_angle: usize,
}

impl DistanceAngleSelector {
    pub fn new(num_dist: usize, num_angle: usize) -> Self {
        Self {
            num_dist,
            num_angle,
        }
    }

    fn total(&self) -> usize {
        self.num_dist + self.num_angle
    }
}

/// Sort `(key, id)` pairs ascending, ties broken by id
fn sort_ranked(ranked: &mut [(f32, CameraId)]) {
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
}

impl CameraSelector for DistanceAngleSelector {
    fn name(&self) -> &'static str {
        "distance+angle"
    }

    fn select(&self, registry: &CameraRegistry, eye: &Camera) -> SelectionSet {
        let total = self.total();
        let active_count = registry.active_count();
        if active_count == 0 || total == 0 {
            return SelectionSet::empty();
        }

        let eye_dir = eye.forward();
        let mut by_distance: Vec<(f32, CameraId)> = registry
            .active()
            .map(|c| ((c.position() - eye.position).length(), c.id()))
            .collect();
        let mut by_angle: Vec<(f32, CameraId)> = registry
            .active()
            .map(|c| (angle_between(c.direction(), eye_dir), c.id()))
            .collect();
        sort_ranked(&mut by_distance);
        sort_ranked(&mut by_angle);

        let num_dist = if active_count < total / 2 {
            log::warn!(
                "Only {} active cameras for a budget of {}, relaxing distance selection",
                active_count,
                total
            );
            active_count
        } else {
            self.num_dist
        };

        let mut ids: Vec<CameraId> = by_distance
            .iter()
            .take(num_dist)
            .chain(by_angle.iter().take(self.num_angle))
            .map(|&(_, id)| id)
            .collect();
        ids.sort_unstable();
        ids.dedup();

        // Backfill with the next-closest cameras
        let mut selection: Vec<CameraId> = by_distance
            .iter()
            .map(|&(_, id)| id)
            .filter(|id| ids.binary_search(id).is_ok())
            .collect();
        for &(_, id) in &by_distance {
            if selection.len() >= total {
                break;
            }
            if !selection.contains(&id) {
                selection.push(id);
            }
        }
        selection.truncate(total);

        SelectionSet::from_ids(selection)
    }

    fn budget(&self) -> Option<usize> {
        Some(self.total())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::OrbitRig;
    use glam::Vec3;

    fn setup(count: usize) -> (CameraRegistry, Camera) {
        let rig = OrbitRig::new(Vec3::ZERO, 4.0);
        let registry = CameraRegistry::new(rig.input_cameras(count, 1.2, 16, 16)).unwrap();
        (registry, rig.camera(0.05, 16, 16))
    }

    #[test]
    fn test_picks_nearest_cameras() {
        let (registry, eye) = setup(9);
        let selection = DistanceAngleSelector::new(2, 0).select(&registry, &eye);
        // Cameras 4 (azimuth 0) and 5 (azimuth 0.3) straddle the eye
        assert_eq!(selection.sorted(), vec![4, 5]);
    }

    #[test]
    fn test_respects_budget() {
        let (registry, eye) = setup(12);
        for (d, a) in [(1, 1), (3, 2), (0, 4), (6, 6), (10, 10)] {
            let selection = DistanceAngleSelector::new(d, a).select(&registry, &eye);
            assert!(selection.len() <= d + a);
            assert!(selection.iter().all(|id| registry.is_active(id)));
        }
    }

    #[test]
    fn test_backfills_to_budget() {
        let (registry, eye) = setup(10);
        // Distance and angle picks overlap on a symmetric rig
        let selection = DistanceAngleSelector::new(3, 3).select(&registry, &eye);
        assert_eq!(selection.len(), 6);
    }

    #[test]
    fn test_relaxes_when_few_cameras_are_active() {
        let (mut registry, eye) = setup(6);
        for id in 0..4 {
            registry.set_active(id, false).unwrap();
        }
        let selection = DistanceAngleSelector::new(1, 5).select(&registry, &eye);
        assert_eq!(selection.sorted(), vec![4, 5]);
    }

    #[test]
    fn test_zero_active_gives_empty_set() {
        let (mut registry, eye) = setup(3);
        for id in 0..3 {
            registry.set_active(id, false).unwrap();
        }
        assert!(DistanceAngleSelector::new(2, 2).select(&registry, &eye).is_empty());
    }
}
