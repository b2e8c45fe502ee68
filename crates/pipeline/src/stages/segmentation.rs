use mask::MaskEncoding;

use crate::{
    contracts::{SegmentationResponse, SegmentationResult, StageOutput, same_part},
    error::PipelineError,
    prompt::PromptBuilder,
    stage::Stage,
};

use super::{Checked, StageContext, StageContract};

/// Outlines the chosen part in the preprocessed image
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentationStage;

impl StageContract for SegmentationStage {
    type Response = SegmentationResponse;

    fn stage(&self) -> Stage {
        Stage::Segmentation
    }

    fn prompt(&self, ctx: &StageContext<'_>) -> Result<String, PipelineError> {
        let target = ctx.target_object()?;
        let decision = ctx.safety()?;
        let (width, height) = ctx.image_size;
        let bbox = target.bounding_box;

        Ok(PromptBuilder::new(
            "You segment object parts for a robotic grasping system. Outline exactly \
             the requested part and nothing else.",
        )
        .section(
            "Target",
            format!(
                "The \"{}\" of object {} (\"{}\"), which lies inside the box [{}, {}, {}, {}].",
                decision.target_part_name, target.id, target.label, bbox.x1, bbox.y1, bbox.x2, bbox.y2
            ),
        )
        .section(
            "Mask encoding",
            format!(
                "The image is {width}x{height} pixels and all coordinates are pixels of \
                 this image. Prefer a \"polygon\" with at least three points tracing the \
                 part outline. Use \"runs\" for per-row pixel spans, or \"bbox\" only if \
                 the part is a plain rectangle."
            ),
        )
        .response_format::<SegmentationResponse>()?
        .build())
    }

    fn check(&self, response: SegmentationResponse, ctx: &StageContext<'_>) -> Checked {
        let mut result = SegmentationResult {
            object_id: response.object_id,
            target_part_name: response.target_part_name,
            mask_encoding: response.mask_encoding,
        };

        let check = ctx.safety().map_err(|err| err.to_string()).and_then(|decision| {
            if result.object_id != decision.object_id {
                return Err(format!(
                    "segmentation is for object {} but the chosen object is {}",
                    result.object_id, decision.object_id
                ));
            }
            if !same_part(&result.target_part_name, &decision.target_part_name) {
                return Err(format!(
                    "segmented part '{}' differs from the chosen part '{}'",
                    result.target_part_name, decision.target_part_name
                ));
            }
            result.target_part_name = decision.target_part_name.clone();
            validate_encoding(&result.mask_encoding)
        });

        Checked::from_check(StageOutput::Segmentation(result), check)
    }
}

fn validate_encoding(encoding: &MaskEncoding) -> Result<(), String> {
    match encoding {
        MaskEncoding::Polygon { points } if points.len() < 3 => {
            Err(format!("polygon has {} points, at least 3 are required", points.len()))
        }
        MaskEncoding::Polygon { points } if points.iter().flatten().any(|v| !v.is_finite()) => {
            Err("polygon has non-finite coordinates".to_string())
        }
        MaskEncoding::Runs { runs } if runs.iter().all(|run| run.length == 0) => {
            Err("run encoding covers no pixels".to_string())
        }
        MaskEncoding::BoundingBox { bbox_2d } => bbox_2d.validate().map_err(|err| err.to_string()),
        _ => Ok(()),
    }
}
