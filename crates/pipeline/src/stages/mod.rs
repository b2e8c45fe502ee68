//! Stage descriptors.
//!
//! Each stage is a [`StageContract`]: a prompt builder, a response type and a
//! validator that checks the reply against earlier stage outputs. The
//! orchestrator only sees the object-safe [`PipelineStage`], so stages can be
//! added or reordered without touching its control flow.

mod description;
mod detection;
mod intent;
mod safety;
mod segmentation;

pub use description::DescriptionStage;
pub use detection::DetectionStage;
pub use intent::IntentStage;
pub use safety::SafetyStage;
pub use segmentation::SegmentationStage;

use async_trait::async_trait;
use model_client::{ImageAttachment, ModelClient, ModelSettings};
use schemars::{JsonSchema, schema::RootSchema};
use serde::de::DeserializeOwned;

use crate::{
    contracts::{FunctionalDescription, IntentResult, SafetyDecision, SceneObject, StageOutput},
    error::PipelineError,
    prompt::response_schema,
    stage::Stage,
};

/// Everything a stage may read while it runs
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub instruction: &'a str,
    /// Outputs of the stages that already ran, in order
    pub outputs: &'a [StageOutput],
    /// Preprocessed image, ready for transport
    pub image: &'a ImageAttachment,
    /// `(width, height)` of the preprocessed image
    pub image_size: (u32, u32),
}

impl<'a> StageContext<'a> {
    pub fn detections(&self) -> Result<&'a [SceneObject], PipelineError> {
        self.outputs
            .iter()
            .find_map(|output| match output {
                StageOutput::Detection(objects) => Some(objects.as_slice()),
                _ => None,
            })
            .ok_or_else(|| missing(Stage::Detection))
    }

    pub fn intent(&self) -> Result<&'a IntentResult, PipelineError> {
        self.outputs
            .iter()
            .find_map(|output| match output {
                StageOutput::Intent(intent) => Some(intent),
                _ => None,
            })
            .ok_or_else(|| missing(Stage::Intent))
    }

    pub fn description(&self) -> Result<&'a FunctionalDescription, PipelineError> {
        self.outputs
            .iter()
            .find_map(|output| match output {
                StageOutput::Description(description) => Some(description),
                _ => None,
            })
            .ok_or_else(|| missing(Stage::Description))
    }

    pub fn safety(&self) -> Result<&'a SafetyDecision, PipelineError> {
        self.outputs
            .iter()
            .find_map(|output| match output {
                StageOutput::Safety(decision) => Some(decision),
                _ => None,
            })
            .ok_or_else(|| missing(Stage::Safety))
    }

    /// The object chosen by the intent stage
    pub fn target_object(&self) -> Result<&'a SceneObject, PipelineError> {
        let target = self.intent()?.target_object_id;
        self.detections()?
            .iter()
            .find(|object| object.id == target)
            .ok_or_else(|| PipelineError::contract(format!("object {target} was not detected")))
    }
}

fn missing(stage: Stage) -> PipelineError {
    PipelineError::contract(format!("{stage} output is required but missing"))
}

/// Stage output plus the outcome of its contract check
#[derive(Debug, Clone, PartialEq)]
pub struct Checked {
    pub output: StageOutput,
    pub violation: Option<String>,
}

impl Checked {
    pub fn accepted(output: StageOutput) -> Self {
        Self { output, violation: None }
    }

    pub fn rejected(output: StageOutput, reason: impl Into<String>) -> Self {
        Self { output, violation: Some(reason.into()) }
    }

    /// Build `output`, rejecting it if `check` fails
    pub fn from_check(output: StageOutput, check: Result<(), String>) -> Self {
        Self { output, violation: check.err() }
    }
}

/// Typed description of one model-backed stage
pub trait StageContract: Send + Sync {
    type Response: DeserializeOwned + JsonSchema + Send;

    fn stage(&self) -> Stage;

    /// Whether the preprocessed image is attached to the request
    fn needs_image(&self) -> bool {
        true
    }

    fn prompt(&self, ctx: &StageContext<'_>) -> Result<String, PipelineError>;

    /// Convert the model reply into a stage output and validate it against
    /// the outputs of earlier stages
    fn check(&self, response: Self::Response, ctx: &StageContext<'_>) -> Checked;
}

/// Object-safe view of a stage used by the orchestrator
#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn stage(&self) -> Stage;

    fn response_schema(&self) -> RootSchema;

    async fn execute(
        &self,
        client: &ModelClient,
        settings: &ModelSettings,
        ctx: &StageContext<'_>,
    ) -> Result<Checked, PipelineError>;
}

#[async_trait]
impl<C: StageContract> PipelineStage for C {
    fn stage(&self) -> Stage {
        StageContract::stage(self)
    }

    fn response_schema(&self) -> RootSchema {
        response_schema::<C::Response>()
    }

    async fn execute(
        &self,
        client: &ModelClient,
        settings: &ModelSettings,
        ctx: &StageContext<'_>,
    ) -> Result<Checked, PipelineError> {
        let stage = StageContract::stage(self);
        let prompt = self.prompt(ctx)?;
        let image = self.needs_image().then_some(ctx.image);

        let response: C::Response = client.invoke(stage.as_str(), settings, &prompt, image).await?;
        Ok(self.check(response, ctx))
    }
}

/// The standard five-stage sequence
pub fn default_stages() -> Vec<Box<dyn PipelineStage>> {
    vec![
        Box::new(DetectionStage),
        Box::new(IntentStage),
        Box::new(DescriptionStage),
        Box::new(SafetyStage),
        Box::new(SegmentationStage),
    ]
}
