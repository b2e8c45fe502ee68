use grasp_common::{BoundingBox, ScaleTransform};
use mask::BinaryMask;
use serde::Serialize;

use crate::{
    contracts::{SafetyDecision, SceneObject, StageOutput},
    error::StageError,
    stage::Stage,
};

/// Outcome of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub success: bool,
    /// Outputs in stage order, including a stage whose contract check failed
    pub stage_outputs: Vec<StageOutput>,
    /// Grasp mask at the original image resolution
    #[serde(skip)]
    pub final_mask: Option<BinaryMask>,
    /// Summary of `final_mask` for serialized reports
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask: Option<MaskSummary>,
    pub error: Option<StageError>,
    /// Original to preprocessed mapping, once preprocessing succeeded.
    /// Stage outputs are in preprocessed coordinates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<ScaleTransform>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaskSummary {
    pub width: u32,
    pub height: u32,
    /// Foreground pixel count
    pub area: u64,
    pub bounding_box: Option<BoundingBox>,
}

impl PipelineResult {
    pub fn completed(stage_outputs: Vec<StageOutput>, mask: BinaryMask) -> Self {
        let summary = MaskSummary {
            width: mask.width(),
            height: mask.height(),
            area: mask.area(),
            bounding_box: mask.bounding_box(),
        };
        Self {
            success: true,
            stage_outputs,
            final_mask: Some(mask),
            mask: Some(summary),
            error: None,
            transform: None,
        }
    }

    pub fn failed(stage_outputs: Vec<StageOutput>, error: StageError) -> Self {
        Self {
            success: false,
            stage_outputs,
            final_mask: None,
            mask: None,
            error: Some(error),
            transform: None,
        }
    }

    pub fn with_transform(mut self, transform: Option<ScaleTransform>) -> Self {
        self.transform = transform;
        self
    }

    pub fn output(&self, stage: Stage) -> Option<&StageOutput> {
        self.stage_outputs.iter().find(|output| output.stage() == stage)
    }

    /// Objects found by the detection stage, in preprocessed coordinates
    pub fn detections(&self) -> Option<&[SceneObject]> {
        match self.output(Stage::Detection) {
            Some(StageOutput::Detection(objects)) => Some(objects),
            _ => None,
        }
    }

    /// The object the run decided to grasp
    pub fn target_object(&self) -> Option<&SceneObject> {
        let Some(StageOutput::Intent(intent)) = self.output(Stage::Intent) else {
            return None;
        };
        self.detections()?
            .iter().find(|object| object.id == intent.target_object_id)
    }

    pub fn safety_decision(&self) -> Option<&SafetyDecision> {
        match self.output(Stage::Safety) {
            Some(StageOutput::Safety(decision)) => Some(decision),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
