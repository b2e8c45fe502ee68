use grasp_common::Point2D;
use image::GrayImage;

use crate::{
    error::Result,
    types::{BinaryMask, ComplexShape},
};

/// Trait for polygon fill algorithms
pub trait Rasterizer: Send + Sync {
    /// Set every pixel of `mask` whose centre lies inside `ring`.
    ///
    /// Pixels already set stay set, so calling this once per ring yields the
    /// union of all rings.
    fn fill_ring(&self, mask: &mut GrayImage, ring: &[Point2D]);
}

/// Trait for contour extraction algorithms
pub trait ContourExtractor: Send + Sync {
    /// Trace the outlines of a binary mask, holes attached to their parents
    fn extract_shapes(&self, mask: &BinaryMask) -> Result<Vec<ComplexShape>>;
}
