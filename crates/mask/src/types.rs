use geo_types::{Coord, LineString, Polygon};
use grasp_common::{BoundingBox, Point2D, ScaleTransform};
use image::{GrayImage, Luma};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Segmentation output as returned by a vision model, in preprocessed-image
/// pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MaskEncoding {
    /// Closed polygon, vertices as `[x, y]`
    Polygon { points: Vec<[f64; 2]> },

    /// Horizontal pixel runs, one row each
    Runs { runs: Vec<PixelRun> },

    /// Axis-aligned part box
    #[serde(rename = "bbox")]
    BoundingBox { bbox_2d: BoundingBox },
}

/// `length` pixels starting at column `x` of row `y`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PixelRun {
    pub y: u32,
    pub x: u32,
    pub length: u32,
}

impl MaskEncoding {
    /// Decode into polygon rings in preprocessed space, clamped to the
    /// preprocessed extent of `transform`.
    pub fn decode(&self, transform: &ScaleTransform) -> Vec<Vec<Point2D>> {
        match self {
            MaskEncoding::Polygon { points } => {
                let ring = points
                    .iter()
                    .map(|&p| transform.clamp_preprocessed(Point2D::from(p)))
                    .collect();
                vec![ring]
            }
            MaskEncoding::Runs { runs } => runs
                .iter()
                .filter(|run| run.length > 0)
                .map(|run| {
                    let bbox = BoundingBox::from([
                        run.x as f64,
                        run.y as f64,
                        run.x as f64 + run.length as f64,
                        run.y as f64 + 1.0,
                    ]);
                    clamped_corners(&bbox, transform)
                })
                .collect(),
            MaskEncoding::BoundingBox { bbox_2d } => vec![clamped_corners(bbox_2d, transform)],
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MaskEncoding::Polygon { .. } => "polygon",
            MaskEncoding::Runs { .. } => "runs",
            MaskEncoding::BoundingBox { .. } => "bbox",
        }
    }
}

fn clamped_corners(bbox: &BoundingBox, transform: &ScaleTransform) -> Vec<Point2D> {
    bbox.corners()
        .iter()
        .map(|&p| transform.clamp_preprocessed(p))
        .collect()
}

/// Binary mask with foreground pixels at 255 and background at 0
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryMask {
    image: GrayImage,
}

impl BinaryMask {
    /// Empty mask of the given size
    pub fn new(width: u32, height: u32) -> Self {
        Self { image: GrayImage::new(width, height) }
    }

    /// Wrap a grayscale image, treating any non-zero pixel as foreground
    pub fn from_image(mut image: GrayImage) -> Self {
        for pixel in image.pixels_mut() {
            if pixel[0] != 0 {
                *pixel = Luma([255]);
            }
        }
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        self.image.get_pixel_checked(x, y).is_some_and(|p| p[0] != 0)
    }

    pub fn set(&mut self, x: u32, y: u32) {
        if x < self.width() && y < self.height() {
            self.image.put_pixel(x, y, Luma([255]));
        }
    }

    /// Number of foreground pixels
    pub fn area(&self) -> u64 {
        self.image.pixels().filter(|p| p[0] != 0).count() as u64
    }

    pub fn is_empty(&self) -> bool {
        !self.image.pixels().any(|p| p[0] != 0)
    }

    /// Tight pixel-edge box around the foreground
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y, pixel) in self.image.enumerate_pixels() {
            if pixel[0] == 0 {
                continue;
            }
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x1, y1, x2, y2)) => (x1.min(x), y1.min(y), x2.max(x), y2.max(y)),
            });
        }
        bounds.map(|(x1, y1, x2, y2)| {
            BoundingBox::from([x1 as f64, y1 as f64, (x2 + 1) as f64, (y2 + 1) as f64])
        })
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.image
    }

    pub fn into_image(self) -> GrayImage {
        self.image
    }

    /// Save as an 8-bit grayscale image; format follows the extension
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> crate::error::Result<()> {
        self.image.save(path)?;
        Ok(())
    }
}

/// Outline of a mask region in pixel coordinates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexShape {
    /// The exterior boundary of the shape (outer contour)
    pub exterior: Vec<[f64; 2]>,
    /// Interior boundaries (holes within the shape)
    pub holes: Vec<Vec<[f64; 2]>>,
}

impl ComplexShape {
    /// Convert to geo-types Polygon for geometric operations
    pub fn to_geo_polygon(&self) -> Polygon<f64> {
        let ring = |points: &[[f64; 2]]| {
            LineString::new(points.iter().map(|&[x, y]| Coord { x, y }).collect())
        };
        Polygon::new(
            ring(&self.exterior),
            self.holes.iter().map(|hole| ring(hole)).collect(),
        )
    }

    /// Calculate the area of the shape (exterior minus holes)
    pub fn area(&self) -> f64 {
        use geo::Area;
        self.to_geo_polygon().unsigned_area()
    }

    pub fn has_holes(&self) -> bool {
        !self.holes.is_empty()
    }

    /// Perimeter length of all rings
    pub fn perimeter(&self) -> f64 {
        use geo::EuclideanLength;

        let polygon = self.to_geo_polygon();
        polygon.exterior().euclidean_length()
            + polygon.interiors().iter().map(|ring| ring.euclidean_length()).sum::<f64>()
    }
}

/// All outlines of one mask together with the image size they live in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskOutline {
    pub shapes: Vec<ComplexShape>,
    pub image_width: u32,
    pub image_height: u32,
    /// Free-form label stored on every exported feature
    pub label: Option<String>,
}
