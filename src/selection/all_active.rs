//! All-active selection for the streaming renderer

use super::{CameraSelector, SelectionSet};
use crate::scene::{Camera, CameraRegistry};

/// Selects every active camera; the blend pass skips the rest per pixel
#[derive(Debug, Clone, Default)]
pub struct AllActiveSelector;

impl CameraSelector for AllActiveSelector {
    fn name(&self) -> &'static str {
        "all active"
    }

    fn select(&self, registry: &CameraRegistry, _eye: &Camera) -> SelectionSet {
        SelectionSet::from_ids(registry.active().map(|c| c.id()))
    }

    fn budget(&self) -> Option<usize> {
        None
    }
}
