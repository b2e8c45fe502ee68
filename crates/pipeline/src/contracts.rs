//! Data flowing between pipeline stages.
//!
//! `*Response` types are what a model must return for each stage; their JSON
//! Schemas are embedded in the prompts. The remaining types are the validated
//! outputs recorded in a [`crate::PipelineResult`]. All coordinates are in
//! preprocessed-image pixels.

use grasp_common::BoundingBox;
use mask::MaskEncoding;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::stage::Stage;

/// An object found by the detection stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SceneObject {
    /// 1-based, in detection order
    pub id: u32,
    pub label: String,
    pub bounding_box: BoundingBox,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct IntentResult {
    pub target_object_id: u32,
    pub rationale: String,
}

/// A named functional part of an object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Component {
    /// Short part name, e.g. "handle"
    pub name: String,
    /// What the part is for
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FunctionalDescription {
    pub object_id: u32,
    pub components: Vec<Component>,
}

impl FunctionalDescription {
    /// Look up a component by name, ignoring case and surrounding whitespace
    pub fn find_component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| same_part(&c.name, name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SafetyDecision {
    pub object_id: u32,
    pub target_part_name: String,
    pub justification: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SegmentationResult {
    pub object_id: u32,
    pub target_part_name: String,
    pub mask_encoding: MaskEncoding,
}

/// Part names match when equal after trimming, ignoring case
pub fn same_part(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Output recorded for one completed (or contract-failed) stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "output", rename_all = "snake_case")]
pub enum StageOutput {
    Detection(Vec<SceneObject>),
    Intent(IntentResult),
    Description(FunctionalDescription),
    Safety(SafetyDecision),
    Segmentation(SegmentationResult),
}

impl StageOutput {
    pub fn stage(&self) -> Stage {
        match self {
            StageOutput::Detection(_) => Stage::Detection,
            StageOutput::Intent(_) => Stage::Intent,
            StageOutput::Description(_) => Stage::Description,
            StageOutput::Safety(_) => Stage::Safety,
            StageOutput::Segmentation(_) => Stage::Segmentation,
        }
    }
}

/// Model reply for the detection stage
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DetectionResponse {
    /// Every distinct physical object visible in the image
    pub objects: Vec<DetectedObject>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DetectedObject {
    /// Common name of the object, e.g. "mug"
    pub label: String,
    /// `[x1, y1, x2, y2]` in pixels of the supplied image
    pub bbox_2d: BoundingBox,
    /// Detection confidence between 0 and 1
    pub confidence: f64,
}

/// Model reply for the intent stage
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct IntentResponse {
    /// Id of the object the instruction is about
    pub target_object_id: u32,
    /// One or two sentences explaining the choice
    pub rationale: String,
}

/// Model reply for the description stage
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DescriptionResponse {
    pub object_id: u32,
    /// Functional parts of the object, most important first
    pub components: Vec<Component>,
}

/// Model reply for the safety stage
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SafetyResponse {
    pub object_id: u32,
    /// Exactly one of the listed component names
    pub target_part_name: String,
    pub justification: String,
}

/// Model reply for the segmentation stage
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SegmentationResponse {
    pub object_id: u32,
    pub target_part_name: String,
    /// Region of the part in pixels of the supplied image
    pub mask_encoding: MaskEncoding,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_lookup_is_case_insensitive() {
        let description = FunctionalDescription {
            object_id: 1,
            components: vec![
                Component { name: "Handle".into(), description: "grip".into() },
                Component { name: "body".into(), description: "holds liquid".into() },
            ],
        };

        assert_eq!(description.find_component("  handle ").unwrap().name, "Handle");
        assert!(description.find_component("blade").is_none());
    }

    #[test]
    fn test_stage_output_tagging() {
        let output = StageOutput::Intent(IntentResult { target_object_id: 2, rationale: "cup".into() });
        let json = serde_json::to_value(&output).unwrap();

        assert_eq!(json["stage"], "intent");
        assert_eq!(json["output"]["target_object_id"], 2);
        assert_eq!(output.stage(), Stage::Intent);
    }

    #[test]
    fn test_segmentation_response_parses_tagged_mask() {
        let response: SegmentationResponse = serde_json::from_str(
            r#"{
                "object_id": 1,
                "target_part_name": "handle",
                "mask_encoding": {"type": "polygon", "points": [[0, 0], [4, 0], [4, 4]]}
            }"#,
        )
        .unwrap();

        assert!(matches!(response.mask_encoding, MaskEncoding::Polygon { ref points } if points.len() == 3));
    }
}
