//! Error types for the ULR core

use crate::backend::traits::BackendError;
use crate::render_graph::FrameFormat;
use crate::scene::CameraId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by setup and rendering.
///
/// Per-pixel reprojection misses, empty selections and zero-weight pixels are
/// recovered locally and never show up here.
#[derive(Error, Debug)]
pub enum UlrError {
    #[error("{requested} cameras exceed the renderer capacity of {capacity} ({limit})")]
    CapacityExceeded {
        requested: usize,
        capacity: usize,
        limit: &'static str,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Unknown camera id {0}")]
    UnknownCamera(CameraId),
    #[error("Camera ids must be dense: slot {index} holds camera {found}")]
    NonDenseCameraIds { index: usize, found: CameraId },
    #[error("Invalid proxy mesh '{name}': {reason}")]
    InvalidMesh { name: String, reason: String },
    #[error("Invalid source image for camera {camera}: {reason}")]
    InvalidSourceImage { camera: CameraId, reason: String },
    #[error("Invalid mask for camera {camera}: {reason}")]
    InvalidMask { camera: CameraId, reason: String },
    #[error("Render graph contains a cycle between passes: {0}")]
    GraphCycle(String),
    #[error("Render graph resource '{0}' is missing")]
    MissingResource(String),
    #[error("Render graph resource '{name}' is declared as {declared:?} but received {found:?}")]
    ResourceFormatMismatch {
        name: String,
        declared: FrameFormat,
        found: FrameFormat,
    },
    #[error("Failed to load image {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("Failed to write image {path}: {source}")]
    ImageWrite {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type UlrResult<T> = Result<T, UlrError>;
