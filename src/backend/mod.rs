//! GPU backend
//!
//! Shared error type, uniform records and the headless wgpu renderer.

pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use traits::*;
pub use types::*;
