use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use grasp_common::ScaleTransform;
use image::DynamicImage;
use mask::MaskMaterializer;
use model_client::{ImageAttachment, ModelBackend, ModelClient, OpenAiCompatibleBackend};
use preprocessing::{PreprocessedImage, preprocess, preprocess_bytes};
use tracing::{debug, info, warn};

use crate::{
    config::{Credentials, PipelineConfig},
    contracts::StageOutput,
    error::{PipelineError, StageError},
    result::PipelineResult,
    stage::{RunState, Stage},
    stages::{Checked, PipelineStage, StageContext, default_stages},
};

/// Input image of a run
#[derive(Debug, Clone, Copy)]
pub enum ImageSource<'a> {
    /// Encoded image file contents
    Bytes(&'a [u8]),
    Image(&'a DynamicImage),
}

/// Cooperative cancellation, checked between stages
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs the stage sequence and turns the final segmentation into a mask.
///
/// Holds no per-run state, so one orchestrator can serve concurrent runs.
pub struct Orchestrator {
    config: PipelineConfig,
    credentials: Credentials,
    client: ModelClient,
    stages: Vec<Box<dyn PipelineStage>>,
    materializer: MaskMaterializer,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("stages", &self.stages.iter().map(|s| s.stage()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Image state scoped to a single run
struct PreparedImage {
    preprocessed: PreprocessedImage,
    attachment: ImageAttachment,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig, backend: Arc<dyn ModelBackend>) -> Self {
        let client = ModelClient::new(backend, config.retry.policy());
        Self {
            config,
            credentials: Credentials::default(),
            client,
            stages: default_stages(),
            materializer: MaskMaterializer::default(),
        }
    }

    /// Orchestrator talking to real HTTP endpoints
    pub fn with_http(config: PipelineConfig, credentials: Credentials) -> Self {
        Self::new(config, Arc::new(OpenAiCompatibleBackend::new())).with_credentials(credentials)
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Replace the stage sequence
    pub fn with_stages(mut self, stages: Vec<Box<dyn PipelineStage>>) -> Self {
        self.stages = stages;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.stages.iter().map(|s| s.stage())
    }

    pub async fn run(&self, image: ImageSource<'_>, instruction: &str) -> PipelineResult {
        self.run_with_cancel(image, instruction, &CancellationFlag::new()).await
    }

    /// Run the pipeline, stopping at the next stage boundary once `cancel` is set
    pub async fn run_with_cancel(
        &self,
        image: ImageSource<'_>,
        instruction: &str,
        cancel: &CancellationFlag,
    ) -> PipelineResult {
        let started = Instant::now();
        let mut outputs = Vec::new();
        let mut transform = None;

        let result = self.execute(image, instruction, cancel, &mut outputs, &mut transform).await;
        let result = match result {
            Ok(mask) => {
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    area = mask.area(),
                    state = %RunState::Completed,
                    "Pipeline completed"
                );
                PipelineResult::completed(outputs, mask)
            }
            Err(error) => {
                warn!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    state = %RunState::Failed(error.failed_stage),
                    kind = %error.kind,
                    message = %error.message,
                    "Pipeline failed"
                );
                PipelineResult::failed(outputs, error)
            }
        };
        result.with_transform(transform)
    }

    async fn execute(
        &self,
        image: ImageSource<'_>,
        instruction: &str,
        cancel: &CancellationFlag,
        outputs: &mut Vec<StageOutput>,
        transform: &mut Option<ScaleTransform>,
    ) -> Result<mask::BinaryMask, StageError> {
        let mut state = RunState::Running(Stage::Preprocessing);
        checkpoint(cancel, Stage::Preprocessing)?;
        self.config
            .validate()
            .map_err(|err| PipelineError::from(err).at(Stage::Preprocessing))?;

        // Dropped on every return path below
        let prepared = self.prepare(image).map_err(|err| err.at(Stage::Preprocessing))?;
        let image_size = (prepared.preprocessed.width(), prepared.preprocessed.height());
        *transform = Some(prepared.preprocessed.transform);

        if instruction.trim().is_empty() {
            return Err(PipelineError::contract("instruction is empty").at(Stage::Detection));
        }

        for stage in &self.stages {
            let current = stage.stage();
            checkpoint(cancel, current)?;
            state = state.advance(current).ok_or_else(|| {
                PipelineError::contract(format!("stage {current} cannot follow {state}")).at(current)
            })?;

            let settings = self.config.model_settings(current, &self.credentials).ok_or_else(|| {
                PipelineError::contract(format!("no model configuration for {current}")).at(current)
            })?;

            info!(stage = %current, model = %settings.model, "Stage started");
            let stage_started = Instant::now();

            let checked = {
                let ctx = StageContext {
                    instruction,
                    outputs: outputs.as_slice(),
                    image: &prepared.attachment,
                    image_size,
                };
                stage.execute(&self.client, &settings, &ctx).await
            };

            let Checked { output, violation } = checked.map_err(|err| err.at(current))?;
            outputs.push(output);
            if let Some(reason) = violation {
                return Err(PipelineError::ContractViolation(reason).at(current));
            }

            info!(
                stage = %current,
                elapsed_ms = stage_started.elapsed().as_millis() as u64,
                "Stage finished"
            );
        }

        checkpoint(cancel, Stage::Materialization)?;
        let Some(StageOutput::Segmentation(segmentation)) = outputs.last() else {
            return Err(PipelineError::contract("the last stage did not produce a segmentation")
                .at(Stage::Materialization));
        };

        self.materializer
            .materialize(&segmentation.mask_encoding, &prepared.preprocessed.transform)
            .map_err(|err| PipelineError::from(err).at(Stage::Materialization))
    }

    fn prepare(&self, image: ImageSource<'_>) -> Result<PreparedImage, PipelineError> {
        let config = self.config.preprocess_config();
        let preprocessed = match image {
            ImageSource::Bytes(bytes) => preprocess_bytes(bytes, &config)?,
            ImageSource::Image(image) => preprocess(image, &config)?,
        };
        let jpeg = preprocessed.encode_jpeg(config.jpeg_quality)?;
        let attachment = ImageAttachment::jpeg(&jpeg);

        debug!(
            width = preprocessed.width(),
            height = preprocessed.height(),
            encoded_bytes = attachment.encoded_len(),
            "Prepared image for transport"
        );
        Ok(PreparedImage { preprocessed, attachment })
    }
}

fn checkpoint(cancel: &CancellationFlag, next: Stage) -> Result<(), StageError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled.at(next))
    } else {
        Ok(())
    }
}
