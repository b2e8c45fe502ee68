use grasp_common::ScaleTransform;
use image::GrayImage;
use tracing::debug;

use crate::{
    algorithms::ScanlineRasterizer,
    error::{MaskError, Result},
    traits::Rasterizer,
    types::{BinaryMask, MaskEncoding},
};

/// Turns a model-produced [`MaskEncoding`] into a pixel mask at the
/// original image resolution.
#[derive(Debug, Clone, Default)]
pub struct MaskMaterializer<R: Rasterizer = ScanlineRasterizer> {
    rasterizer: R,
}

impl<R: Rasterizer> MaskMaterializer<R> {
    pub fn new(rasterizer: R) -> Self {
        Self { rasterizer }
    }

    /// Decode `encoding`, scale it back to original space and rasterize it.
    ///
    /// The encoding is clamped to the preprocessed image before scaling, so
    /// out-of-bounds vertices never produce pixels outside the original
    /// image. Self-intersecting rings are filled even-odd. A region that
    /// covers no pixel centre is an [`MaskError::EmptyMask`].
    pub fn materialize(&self, encoding: &MaskEncoding, transform: &ScaleTransform) -> Result<BinaryMask> {
        let width = transform.original_width;
        let height = transform.original_height;

        let rings: Vec<_> = encoding
            .decode(transform)
            .iter()
            .map(|ring| transform.polygon_to_original(ring))
            .collect();

        let mut image = GrayImage::new(width, height);
        for ring in &rings {
            self.rasterizer.fill_ring(&mut image, ring);
        }

        let mask = BinaryMask::from_image(image);
        let pixels = mask.area();
        if pixels == 0 {
            return Err(MaskError::EmptyMask { width, height });
        }

        debug!(
            encoding = encoding.kind(),
            rings = rings.len(),
            pixels,
            "Materialized mask"
        );
        Ok(mask)
    }
}

/// Materialize with the default scanline rasterizer
pub fn materialize(encoding: &MaskEncoding, transform: &ScaleTransform) -> Result<BinaryMask> {
    MaskMaterializer::<ScanlineRasterizer>::default().materialize(encoding, transform)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelRun;
    use grasp_common::BoundingBox;

    fn half_scale() -> ScaleTransform {
        ScaleTransform::new((800, 600), (400, 300)).unwrap()
    }

    #[test]
    fn test_polygon_scaled_to_original() {
        let encoding = MaskEncoding::Polygon {
            points: vec![[230.0, 150.0], [260.0, 150.0], [260.0, 210.0], [230.0, 210.0]],
        };

        let mask = materialize(&encoding, &half_scale()).unwrap();

        assert_eq!((mask.width(), mask.height()), (800, 600));
        assert_eq!(mask.area(), 60 * 120);
        assert_eq!(mask.bounding_box(), Some(BoundingBox::from([460.0, 300.0, 520.0, 420.0])));
        assert!(mask.contains(460, 300));
        assert!(!mask.contains(520, 300));
    }

    #[test]
    fn test_bbox_encoding() {
        let encoding = MaskEncoding::BoundingBox { bbox_2d: BoundingBox::from([10.0, 10.0, 20.0, 15.0]) };
        let transform = ScaleTransform::identity(50, 50).unwrap();

        let mask = materialize(&encoding, &transform).unwrap();

        assert_eq!(mask.area(), 50);
    }

    #[test]
    fn test_runs_union_rows() {
        let encoding = MaskEncoding::Runs {
            runs: vec![
                PixelRun { y: 2, x: 1, length: 3 },
                PixelRun { y: 3, x: 0, length: 5 },
                PixelRun { y: 3, x: 2, length: 1 },
            ],
        };
        let transform = ScaleTransform::identity(10, 10).unwrap();

        let mask = materialize(&encoding, &transform).unwrap();

        assert_eq!(mask.area(), 8);
        assert!(mask.contains(0, 3));
        assert!(!mask.contains(0, 2));
    }

    #[test]
    fn test_out_of_bounds_polygon_is_clamped() {
        let encoding = MaskEncoding::Polygon {
            points: vec![[300.0, 200.0], [900.0, 200.0], [900.0, 900.0], [300.0, 900.0]],
        };

        let mask = materialize(&encoding, &half_scale()).unwrap();

        assert_eq!((mask.width(), mask.height()), (800, 600));
        assert_eq!(mask.area(), 200 * 200);
        assert!(mask.contains(799, 599));
    }

    #[test]
    fn test_polygon_entirely_outside_is_empty() {
        let encoding = MaskEncoding::Polygon {
            points: vec![[500.0, 10.0], [600.0, 10.0], [600.0, 50.0], [500.0, 50.0]],
        };

        let err = materialize(&encoding, &half_scale()).unwrap_err();

        assert!(matches!(err, MaskError::EmptyMask { width: 800, height: 600 }));
    }

    #[test]
    fn test_degenerate_polygon_is_empty() {
        let encoding = MaskEncoding::Polygon { points: vec![[10.0, 10.0], [20.0, 20.0]] };

        let err = materialize(&encoding, &half_scale()).unwrap_err();

        assert!(matches!(err, MaskError::EmptyMask { .. }));
    }

    #[test]
    fn test_self_intersecting_polygon_fills_both_lobes() {
        // Signed area of the two lobes cancels out
        let encoding = MaskEncoding::Polygon {
            points: vec![[0.0, 0.0], [40.0, 40.0], [40.0, 0.0], [0.0, 40.0]],
        };
        let transform = ScaleTransform::identity(40, 40).unwrap();

        let mask = materialize(&encoding, &transform).unwrap();

        assert_eq!(mask.area(), 800);
        assert!(mask.contains(1, 20));
        assert!(mask.contains(38, 20));
        assert!(!mask.contains(20, 5));
    }

    #[test]
    fn test_sliver_without_pixel_centres_is_empty() {
        // Positive area, but no pixel centre falls inside
        let encoding = MaskEncoding::Polygon {
            points: vec![[10.0, 10.1], [20.0, 10.1], [20.0, 10.3], [10.0, 10.3]],
        };
        let transform = ScaleTransform::identity(50, 50).unwrap();

        let err = materialize(&encoding, &transform).unwrap_err();

        assert!(matches!(err, MaskError::EmptyMask { .. }));
    }
}
