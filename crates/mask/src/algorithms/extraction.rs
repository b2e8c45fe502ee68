use std::collections::HashMap;

use imageproc::contours::{BorderType, find_contours};

use crate::{
    error::Result,
    traits::ContourExtractor,
    types::{BinaryMask, ComplexShape},
};

/// Imageproc-based contour extractor
#[derive(Debug, Clone, Default)]
pub struct ImageprocContourExtractor;

impl ContourExtractor for ImageprocContourExtractor {
    fn extract_shapes(&self, mask: &BinaryMask) -> Result<Vec<ComplexShape>> {
        let contours = find_contours::<i32>(mask.as_image());

        let mut shapes = Vec::new();
        let mut shape_index = HashMap::new();

        for (i, contour) in contours.iter().enumerate() {
            if contour.border_type == BorderType::Outer {
                shape_index.insert(i, shapes.len());
                shapes.push(ComplexShape {
                    exterior: contour.points.iter().map(|p| [p.x as f64, p.y as f64]).collect(),
                    holes: Vec::new(),
                });
            }
        }

        for contour in contours.iter().filter(|c| c.border_type == BorderType::Hole) {
            let Some(&owner) = contour.parent.and_then(|parent| shape_index.get(&parent)) else {
                continue;
            };
            shapes[owner]
                .holes
                .push(contour.points.iter().map(|p| [p.x as f64, p.y as f64]).collect());
        }

        Ok(shapes)
    }
}
