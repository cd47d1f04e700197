//! Consumers of selection results (debug overlays, statistics)

use super::SelectionSet;
use crate::scene::CameraId;
use parking_lot::RwLock;

/// Receives every selection the view computes
pub trait SelectionObserver: Send + Sync {
    fn on_selection(&self, selection: &SelectionSet);
}

/// Which cameras took part in the latest selection.
///
/// Shared with overlays through `Arc`; reads never block the render thread for
/// long.
#[derive(Debug, Default)]
pub struct UsedCameraFlags {
    flags: RwLock<Vec<bool>>,
}

impl UsedCameraFlags {
    pub fn new(camera_count: usize) -> Self {
        Self {
            flags: RwLock::new(vec![false; camera_count]),
        }
    }

    pub fn is_used(&self, id: CameraId) -> bool {
        self.flags.read().get(id as usize).copied().unwrap_or(false)
    }

    pub fn used_ids(&self) -> Vec<CameraId> {
        self.flags
            .read()
            .iter()
            .enumerate()
            .filter(|(_, &used)| used)
            .map(|(id, _)| id as CameraId)
            .collect()
    }
}

impl SelectionObserver for UsedCameraFlags {
    fn on_selection(&self, selection: &SelectionSet) {
        let mut flags = self.flags.write();
        flags.iter_mut().for_each(|f| *f = false);
        for id in selection.iter() {
            let index = id as usize;
            if index >= flags.len() {
                flags.resize(index + 1, false);
            }
            flags[index] = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_follow_latest_selection() {
        let flags = UsedCameraFlags::new(4);
        flags.on_selection(&SelectionSet::from_ids([1, 3]));
        assert_eq!(flags.used_ids(), vec![1, 3]);
        flags.on_selection(&SelectionSet::from_ids([0]));
        assert_eq!(flags.used_ids(), vec![0]);
        assert!(!flags.is_used(3));
        assert!(!flags.is_used(42));
    }
}
