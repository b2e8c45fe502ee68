use crate::{
    contracts::{DetectionResponse, SceneObject, StageOutput},
    error::PipelineError,
    prompt::PromptBuilder,
    stage::Stage,
};

use super::{Checked, StageContext, StageContract};

/// Finds the objects in the scene
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectionStage;

impl StageContract for DetectionStage {
    type Response = DetectionResponse;

    fn stage(&self) -> Stage {
        Stage::Detection
    }

    fn prompt(&self, ctx: &StageContext<'_>) -> Result<String, PipelineError> {
        let (width, height) = ctx.image_size;
        Ok(PromptBuilder::new(
            "You are the scene analyst of a robotic grasping system. \
             Identify every distinct physical object in the image.",
        )
        .section(
            "Image",
            format!(
                "The image is {width}x{height} pixels. Give each bounding box as \
                 [x1, y1, x2, y2] in pixels of this image, with x1 < x2 and y1 < y2."
            ),
        )
        .section("User instruction (context only)", ctx.instruction)
        .response_format::<DetectionResponse>()?
        .build())
    }

    fn check(&self, response: DetectionResponse, _ctx: &StageContext<'_>) -> Checked {
        let objects: Vec<SceneObject> = response
            .objects
            .into_iter()
            .zip(1..)
            .map(|(object, id)| SceneObject {
                id,
                label: object.label.trim().to_string(),
                bounding_box: object.bbox_2d,
                confidence: object.confidence,
            })
            .collect();

        let check = validate(&objects);
        Checked::from_check(StageOutput::Detection(objects), check)
    }
}

fn validate(objects: &[SceneObject]) -> Result<(), String> {
    if objects.is_empty() {
        return Err("no objects detected".to_string());
    }
    for object in objects {
        object
            .bounding_box
            .validate()
            .map_err(|err| format!("object {} ({}): {err}", object.id, object.label))?;
        if !(0.0..=1.0).contains(&object.confidence) {
            return Err(format!(
                "object {} ({}): confidence {} outside [0, 1]",
                object.id, object.label, object.confidence
            ));
        }
    }
    Ok(())
}
