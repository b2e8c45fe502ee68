use serde::Serialize;

use crate::{
    contracts::{IntentResponse, IntentResult, StageOutput},
    error::PipelineError,
    prompt::PromptBuilder,
    stage::Stage,
};

use super::{Checked, StageContext, StageContract};

/// Resolves which detected object the instruction is about
#[derive(Debug, Clone, Copy, Default)]
pub struct IntentStage;

#[derive(Serialize)]
struct ObjectSummary<'a> {
    id: u32,
    label: &'a str,
    confidence: f64,
}

impl StageContract for IntentStage {
    type Response = IntentResponse;

    fn stage(&self) -> Stage {
        Stage::Intent
    }

    fn needs_image(&self) -> bool {
        false
    }

    fn prompt(&self, ctx: &StageContext<'_>) -> Result<String, PipelineError> {
        let objects: Vec<ObjectSummary<'_>> = ctx
            .detections()?
            .iter()
            .map(|o| ObjectSummary { id: o.id, label: &o.label, confidence: o.confidence })
            .collect();

        Ok(PromptBuilder::new(
            "You interpret instructions for a robot arm. Decide which one of the \
             detected objects the user wants the robot to pick up.",
        )
        .section("Instruction", ctx.instruction)
        .json_section("Detected objects", &objects)?
        .section("Rules", "target_object_id must be one of the ids listed above.")
        .response_format::<IntentResponse>()?
        .build())
    }

    fn check(&self, response: IntentResponse, ctx: &StageContext<'_>) -> Checked {
        let target = response.target_object_id;
        let check = match ctx.detections() {
            Ok(objects) if objects.iter().any(|o| o.id == target) => Ok(()),
            Ok(objects) => Err(format!(
                "target_object_id {target} is not a detected object (known ids: {:?})",
                objects.iter().map(|o| o.id).collect::<Vec<_>>()
            )),
            Err(err) => Err(err.to_string()),
        };

        let output = StageOutput::Intent(IntentResult {
            target_object_id: target,
            rationale: response.rationale,
        });
        Checked::from_check(output, check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::SceneObject;
    use grasp_common::BoundingBox;
    use model_client::ImageAttachment;

    fn detections() -> Vec<StageOutput> {
        vec![StageOutput::Detection(vec![SceneObject {
            id: 1,
            label: "mug".into(),
            bounding_box: BoundingBox::from([100.0, 100.0, 260.0, 260.0]),
            confidence: 0.9,
        }])]
    }

    #[test]
    fn test_known_target_accepted() {
        let outputs = detections();
        let image = ImageAttachment::jpeg(&[]);
        let ctx = StageContext { instruction: "drink", outputs: &outputs, image: &image, image_size: (400, 300) };

        let response = IntentResponse { target_object_id: 1, rationale: "mugs hold water".into() };
        assert!(IntentStage.check(response, &ctx).violation.is_none());
    }

    #[test]
    fn test_unknown_target_rejected_but_recorded() {
        let outputs = detections();
        let image = ImageAttachment::jpeg(&[]);
        let ctx = StageContext { instruction: "drink", outputs: &outputs, image: &image, image_size: (400, 300) };

        let checked = IntentStage.check(IntentResponse { target_object_id: 7, rationale: String::new() }, &ctx);

        assert!(checked.violation.unwrap().contains("target_object_id 7"));
        assert!(matches!(checked.output, StageOutput::Intent(IntentResult { target_object_id: 7, .. })));
    }

    #[test]
    fn test_prompt_lists_objects_without_image() {
        let outputs = detections();
        let image = ImageAttachment::jpeg(&[]);
        let ctx = StageContext { instruction: "I want to drink water", outputs: &outputs, image: &image, image_size: (400, 300) };

        let prompt = IntentStage.prompt(&ctx).unwrap();

        assert!(prompt.contains("I want to drink water"));
        assert!(prompt.contains("\"label\": \"mug\""));
        assert!(!IntentStage.needs_image());
    }
}
