//! # GraspMind
//!
//! Turns an image and a natural-language instruction into a pixel mask of
//! the part a robot should grasp, by running five remote vision-language
//! model calls in sequence:
//!
//! 1. **Detection** finds the objects in the scene
//! 2. **Intent** picks the object the instruction is about
//! 3. **Description** names that object's functional parts
//! 4. **Safety** chooses the part that is safe to hold and hand over
//! 5. **Segmentation** outlines that part
//!
//! Every reply is checked against the outputs of earlier stages before the
//! run advances. The image is downscaled once up front; all model
//! coordinates stay in that preprocessed space until the final mask is
//! materialized at the original resolution.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use graspmind::{Credentials, ImageSource, Orchestrator, PipelineConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::from_file("graspmind.toml")?;
//! let credentials = Credentials::new().with_key("OPENAI_API_KEY", "sk-...");
//! let orchestrator = Orchestrator::with_http(config, credentials);
//!
//! let bytes = std::fs::read("kitchen.jpg")?;
//! let result = orchestrator.run(ImageSource::Bytes(&bytes), "I want to drink water").await;
//! if let Some(mask) = &result.final_mask {
//!     mask.save("grasp_mask.png")?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod contracts;
pub mod error;
pub mod orchestrator;
pub mod prompt;
pub mod result;
pub mod stage;
pub mod stages;

pub use config::{ConfigError, Credentials, EndpointConfig, PipelineConfig, RetryConfig, StageConfig, StageConfigs};
pub use contracts::{
    Component, FunctionalDescription, IntentResult, SafetyDecision, SceneObject, SegmentationResult, StageOutput,
};
pub use error::{ErrorKind, PipelineError, StageError};
pub use orchestrator::{CancellationFlag, ImageSource, Orchestrator};
pub use result::{MaskSummary, PipelineResult};
pub use stage::{RunState, Stage};
pub use stages::{PipelineStage, StageContract, default_stages};
