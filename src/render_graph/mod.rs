//! Frame graph
//!
//! A ULR frame is a short chain of passes (pre-pass, blend, optional Poisson
//! fill, resolve) exchanging whole-frame images. The graph orders the passes
//! from their declared reads and writes, and the executor frees each image
//! after its last reader.

pub mod executor;
pub mod graph;
pub mod pass;
pub mod resource;

pub use executor::*;
pub use graph::*;
pub use pass::*;
pub use resource::*;
