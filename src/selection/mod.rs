//! Camera selection
//!
//! A selector turns the registry plus a novel viewpoint into an ordered,
//! duplicate-free [`SelectionSet`] of active camera ids. The set is recomputed
//! from scratch on every request.

mod all_active;
mod combined_score;
mod distance_angle;
mod observer;

pub use all_active::AllActiveSelector;
pub use combined_score::CombinedScoreSelector;
pub use distance_angle::DistanceAngleSelector;
pub use observer::{SelectionObserver, UsedCameraFlags};

use crate::scene::{Camera, CameraId, CameraRegistry};
use std::collections::HashSet;

/// Ordered set of camera ids chosen for one novel viewpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    ids: Vec<CameraId>,
}

impl SelectionSet {
    /// Build a set keeping the first occurrence of every id
    pub fn from_ids(ids: impl IntoIterator<Item = CameraId>) -> Self {
        let mut seen = HashSet::new();
        Self {
            ids: ids.into_iter().filter(|id| seen.insert(*id)).collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> &[CameraId] {
        &self.ids
    }

    pub fn iter(&self) -> impl Iterator<Item = CameraId> + '_ {
        self.ids.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: CameraId) -> bool {
        self.ids.contains(&id)
    }

    /// Per-camera selected flags for a registry of `count` cameras
    pub fn flags(&self, count: usize) -> Vec<bool> {
        let mut flags = vec![false; count];
        for id in self.iter() {
            if let Some(flag) = flags.get_mut(id as usize) {
                *flag = true;
            }
        }
        flags
    }

    /// Ids in ascending order, for order-independent comparison
    pub fn sorted(&self) -> Vec<CameraId> {
        let mut ids = self.ids.clone();
        ids.sort_unstable();
        ids
    }
}

/// Chooses the cameras that take part in blending for a viewpoint
pub trait CameraSelector {
    /// Short policy name for logging
    fn name(&self) -> &'static str;

    /// Select cameras for `eye`; only active cameras may be returned
    fn select(&self, registry: &CameraRegistry, eye: &Camera) -> SelectionSet;

    /// Upper bound on the selection size, if the policy has one
    fn budget(&self) -> Option<usize>;
}

/// Selection policy for the budgeted (sequential and sampler-array) renderers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundedPolicy {
    /// Union of the closest-by-distance and closest-by-angle cameras
    #[default]
    DistanceAngle,
    /// Front-facing cameras ranked by alignment over distance
    CombinedScore,
}

/// Selection policies as one tagged type
#[derive(Debug, Clone)]
pub enum SelectionPolicy {
    DistanceAngle(DistanceAngleSelector),
    CombinedScore(CombinedScoreSelector),
    AllActive(AllActiveSelector),
}

impl SelectionPolicy {
    /// Bounded policy with the given distance and angle budgets
    pub fn bounded(policy: BoundedPolicy, num_dist: usize, num_angle: usize) -> Self {
        match policy {
            BoundedPolicy::DistanceAngle => {
                SelectionPolicy::DistanceAngle(DistanceAngleSelector::new(num_dist, num_angle))
            }
            BoundedPolicy::CombinedScore => {
                SelectionPolicy::CombinedScore(CombinedScoreSelector::new(num_dist + num_angle))
            }
        }
    }
}

impl CameraSelector for SelectionPolicy {
    fn name(&self) -> &'static str {
        match self {
            SelectionPolicy::DistanceAngle(s) => s.name(),
            SelectionPolicy::CombinedScore(s) => s.name(),
            SelectionPolicy::AllActive(s) => s.name(),
        }
    }

    fn select(&self, registry: &CameraRegistry, eye: &Camera) -> SelectionSet {
        match self {
            SelectionPolicy::DistanceAngle(s) => s.select(registry, eye),
            SelectionPolicy::CombinedScore(s) => s.select(registry, eye),
            SelectionPolicy::AllActive(s) => s.select(registry, eye),
        }
    }

    fn budget(&self) -> Option<usize> {
        match self {
            SelectionPolicy::DistanceAngle(s) => s.budget(),
            SelectionPolicy::CombinedScore(s) => s.budget(),
            SelectionPolicy::AllActive(s) => s.budget(),
        }
    }
}

/// Restriction applied on top of a policy's selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    #[default]
    Standard,
    /// Render from a single camera
    OneCamera(CameraId),
    /// Drop one camera, e.g. to compare against its photograph
    LeaveOneOut(CameraId),
    /// Keep cameras whose id is a multiple of the step
    EveryNth(usize),
}

impl RenderMode {
    pub fn apply(&self, selection: SelectionSet, registry: &CameraRegistry) -> SelectionSet {
        match *self {
            RenderMode::Standard => selection,
            RenderMode::OneCamera(id) => {
                if registry.is_active(id) {
                    SelectionSet::from_ids([id])
                } else {
                    SelectionSet::empty()
                }
            }
            RenderMode::LeaveOneOut(id) => {
                SelectionSet::from_ids(selection.iter().filter(|&c| c != id))
            }
            RenderMode::EveryNth(step) => {
                let step = step.max(1);
                SelectionSet::from_ids(selection.iter().filter(|&c| c as usize % step == 0))
            }
        }
    }
}

/// Angle in radians between two directions
#[inline]
pub(crate) fn angle_between(a: glam::Vec3, b: glam::Vec3) -> f32 {
    a.normalize_or_zero()
        .dot(b.normalize_or_zero())
        .clamp(-1.0, 1.0)
        .acos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::OrbitRig;
    use glam::Vec3;

    fn registry(count: usize) -> CameraRegistry {
        let rig = OrbitRig::new(Vec3::ZERO, 4.0);
        CameraRegistry::new(rig.input_cameras(count, 1.0, 16, 16)).unwrap()
    }

    #[test]
    fn test_selection_set_removes_duplicates() {
        let set = SelectionSet::from_ids([3, 1, 3, 2, 1]);
        assert_eq!(set.ids(), &[3, 1, 2]);
        assert_eq!(set.sorted(), vec![1, 2, 3]);
        assert_eq!(set.flags(5), vec![false, true, true, true, false]);
    }

    #[test]
    fn test_render_modes() {
        let mut registry = registry(6);
        let all = SelectionSet::from_ids(0..6);

        assert_eq!(RenderMode::Standard.apply(all.clone(), &registry), all);
        assert_eq!(RenderMode::OneCamera(4).apply(all.clone(), &registry).ids(), &[4]);
        assert_eq!(
            RenderMode::LeaveOneOut(2).apply(all.clone(), &registry).ids(),
            &[0, 1, 3, 4, 5]
        );
        assert_eq!(RenderMode::EveryNth(2).apply(all.clone(), &registry).ids(), &[0, 2, 4]);

        registry.set_active(4, false).unwrap();
        assert!(RenderMode::OneCamera(4).apply(all, &registry).is_empty());
    }

    #[test]
    fn test_angle_between() {
        assert!((angle_between(Vec3::X, Vec3::Y) - std::f32::consts::FRAC_PI_2).abs() < 1e-6);
        assert!(angle_between(Vec3::X, Vec3::X * 3.0).abs() < 1e-3);
    }
}
