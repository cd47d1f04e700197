//! Core backend abstraction traits

use crate::renderer::DeviceLimits;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Failed to create shader: {0}")]
    ShaderCreationFailed(String),
    #[error("Failed to read back GPU data: {0}")]
    ReadbackFailed(String),
    #[error("Unsupported input: {0}")]
    Unsupported(String),
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// A headless device the GPU renderer can run on
pub trait HeadlessBackend {
    /// Human-readable adapter name for logs
    fn adapter_name(&self) -> String;

    /// Limits that bound the camera capacity
    fn device_limits(&self) -> DeviceLimits;

    fn device(&self) -> &wgpu::Device;

    fn queue(&self) -> &wgpu::Queue;
}
