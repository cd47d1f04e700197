//! Resource management: proxy geometry, source images and masks

mod mask;
mod mesh;
mod source;
mod texture;

pub use mask::*;
pub use mesh::*;
pub use source::*;
pub use texture::*;
