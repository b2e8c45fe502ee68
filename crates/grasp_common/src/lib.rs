//! # GraspMind Common - Shared Geometry and Coordinate Scaling
//!
//! Shared pixel-space types used by every GraspMind crate, plus the
//! coordinate scaler that maps between the caller's original image and the
//! preprocessed image sent to remote models.
//!
//! ## Example
//!
//! ```rust
//! use grasp_common::{Point2D, ScaleTransform, to_original, to_preprocessed};
//!
//! // A 2000x1000 photo shrunk to fit 1000 pixels
//! let transform = ScaleTransform::new((2000, 1000), (1000, 500)).unwrap();
//!
//! let p = to_preprocessed(Point2D::new(400.0, 300.0), &transform);
//! assert_eq!(p, Point2D::new(200.0, 150.0));
//! assert_eq!(to_original(p, &transform), Point2D::new(400.0, 300.0));
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for geometry operations
pub type Result<T> = std::result::Result<T, GeometryError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Invalid image dimensions {width}x{height}: both must be non-zero")]
    InvalidDimension { width: u32, height: u32 },

    #[error("Invalid bounding box [{x1}, {y1}, {x2}, {y2}]: {reason}")]
    InvalidBoundingBox {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        reason: &'static str,
    },
}

/// 2D point in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    /// Create a new point
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Calculate distance to another point
    pub fn distance_to(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl From<[f64; 2]> for Point2D {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point2D> for [f64; 2] {
    fn from(point: Point2D) -> Self {
        [point.x, point.y]
    }
}

/// Axis-aligned box `[x1, y1, x2, y2]` with `(x1, y1)` the top-left corner.
///
/// Serialized as a bare four-element array, the `bbox_2d` shape vision
/// models emit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    /// Create a box, rejecting inverted or non-finite corners
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Result<Self> {
        let bbox = Self { x1, y1, x2, y2 };
        bbox.validate()?;
        Ok(bbox)
    }

    /// Check that the corners are finite and ordered
    pub fn validate(&self) -> Result<()> {
        let Self { x1, y1, x2, y2 } = *self;
        let invalid = |reason| GeometryError::InvalidBoundingBox { x1, y1, x2, y2, reason };

        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            return Err(invalid("coordinates must be finite"));
        }
        if x2 <= x1 || y2 <= y1 {
            return Err(invalid("x2/y2 must be greater than x1/y1"));
        }
        Ok(())
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Check if a point is inside this box (edges inclusive)
    pub fn contains(&self, point: Point2D) -> bool {
        point.x >= self.x1 && point.x <= self.x2 && point.y >= self.y1 && point.y <= self.y2
    }

    /// The four corners in clockwise order starting at the top-left
    pub fn corners(&self) -> [Point2D; 4] {
        [
            Point2D::new(self.x1, self.y1),
            Point2D::new(self.x2, self.y1),
            Point2D::new(self.x2, self.y2),
            Point2D::new(self.x1, self.y2),
        ]
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [f64; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(bbox: BoundingBox) -> Self {
        [bbox.x1, bbox.y1, bbox.x2, bbox.y2]
    }
}

impl JsonSchema for BoundingBox {
    fn schema_name() -> String {
        "BoundingBox".to_string()
    }

    fn json_schema(generator: &mut schemars::r#gen::SchemaGenerator) -> schemars::schema::Schema {
        <[f64; 4]>::json_schema(generator)
    }
}

/// Mapping between original-image space and preprocessed-image space.
///
/// Created once per run by the image preprocessor and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleTransform {
    /// preprocessed_width / original_width
    pub scale_x: f64,
    /// preprocessed_height / original_height
    pub scale_y: f64,
    pub original_width: u32,
    pub original_height: u32,
    pub preprocessed_width: u32,
    pub preprocessed_height: u32,
}

impl ScaleTransform {
    /// Build a transform from `(width, height)` pairs of both spaces
    pub fn new(original: (u32, u32), preprocessed: (u32, u32)) -> Result<Self> {
        for (width, height) in [original, preprocessed] {
            if width == 0 || height == 0 {
                return Err(GeometryError::InvalidDimension { width, height });
            }
        }

        Ok(Self {
            scale_x: preprocessed.0 as f64 / original.0 as f64,
            scale_y: preprocessed.1 as f64 / original.1 as f64,
            original_width: original.0,
            original_height: original.1,
            preprocessed_width: preprocessed.0,
            preprocessed_height: preprocessed.1,
        })
    }

    /// Transform for an image that needed no resizing
    pub fn identity(width: u32, height: u32) -> Result<Self> {
        Self::new((width, height), (width, height))
    }

    pub fn is_identity(&self) -> bool {
        self.original_width == self.preprocessed_width
            && self.original_height == self.preprocessed_height
    }

    /// Clamp a point onto the preprocessed image extent
    pub fn clamp_preprocessed(&self, point: Point2D) -> Point2D {
        clamp_point(point, self.preprocessed_width, self.preprocessed_height)
    }

    /// Clamp a point onto the original image extent
    pub fn clamp_original(&self, point: Point2D) -> Point2D {
        clamp_point(point, self.original_width, self.original_height)
    }

    /// Map a point from original to preprocessed space
    pub fn to_preprocessed(&self, point: Point2D) -> Point2D {
        let point = self.clamp_original(point);
        self.clamp_preprocessed(Point2D::new(point.x * self.scale_x, point.y * self.scale_y))
    }

    /// Map a point from preprocessed to original space
    pub fn to_original(&self, point: Point2D) -> Point2D {
        let point = self.clamp_preprocessed(point);
        self.clamp_original(Point2D::new(point.x / self.scale_x, point.y / self.scale_y))
    }

    /// Map every vertex of a polygon ring from preprocessed to original space
    pub fn polygon_to_original(&self, ring: &[Point2D]) -> Vec<Point2D> {
        ring.iter().map(|&p| self.to_original(p)).collect()
    }

    /// Map a box from preprocessed to original space
    pub fn bbox_to_original(&self, bbox: &BoundingBox) -> BoundingBox {
        let top_left = self.to_original(Point2D::new(bbox.x1, bbox.y1));
        let bottom_right = self.to_original(Point2D::new(bbox.x2, bbox.y2));
        BoundingBox::from([top_left.x, top_left.y, bottom_right.x, bottom_right.y])
    }

    /// Map a box from original to preprocessed space
    pub fn bbox_to_preprocessed(&self, bbox: &BoundingBox) -> BoundingBox {
        let top_left = self.to_preprocessed(Point2D::new(bbox.x1, bbox.y1));
        let bottom_right = self.to_preprocessed(Point2D::new(bbox.x2, bbox.y2));
        BoundingBox::from([top_left.x, top_left.y, bottom_right.x, bottom_right.y])
    }
}

/// Map a point from original to preprocessed space, clamping out-of-bounds input
pub fn to_preprocessed(point: Point2D, transform: &ScaleTransform) -> Point2D {
    transform.to_preprocessed(point)
}

/// Map a point from preprocessed to original space, clamping out-of-bounds input
pub fn to_original(point: Point2D, transform: &ScaleTransform) -> Point2D {
    transform.to_original(point)
}

fn clamp_point(point: Point2D, width: u32, height: u32) -> Point2D {
    // NaN collapses to the origin rather than poisoning downstream rasterization
    let clamp = |v: f64, max: u32| if v.is_nan() { 0.0 } else { v.clamp(0.0, max as f64) };
    Point2D::new(clamp(point.x, width), clamp(point.y, height))
}
