pub mod extraction;
pub mod rasterize;

pub use extraction::*;
pub use rasterize::*;
