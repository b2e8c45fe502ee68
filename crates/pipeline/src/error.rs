use mask::MaskError;
use model_client::ModelError;
use preprocessing::PreprocessError;
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

use crate::{config::ConfigError, stage::Stage};

/// Category of a run failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum ErrorKind {
    UnsupportedFormat,
    InvalidDimension,
    /// Transient transport failures exhausted the retry budget
    StageUnavailable,
    /// Non-transient transport failure such as bad credentials
    RequestRejected,
    MalformedResponse,
    ContractViolation,
    EmptyMask,
    Cancelled,
    /// Configuration failed validation before the run started
    InvalidConfig,
}

/// Failure reported in a [`crate::PipelineResult`]
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{failed_stage} failed ({kind}): {message}")]
pub struct StageError {
    pub failed_stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
    /// What the model actually returned, for malformed responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<String>,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("{0}")]
    ContractViolation(String),

    #[error(transparent)]
    Mask(#[from] MaskError),

    /// Earlier stage outputs could not be embedded in a prompt
    #[error("Failed to encode prompt: {0}")]
    PromptEncoding(#[from] serde_json::Error),

    #[error("Run cancelled")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PipelineError {
    pub fn contract(message: impl Into<String>) -> Self {
        PipelineError::ContractViolation(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Preprocess(PreprocessError::UnsupportedFormat(_) | PreprocessError::Encode(_)) => {
                ErrorKind::UnsupportedFormat
            }
            PipelineError::Preprocess(_) => ErrorKind::InvalidDimension,
            PipelineError::Model(ModelError::StageUnavailable { .. }) => ErrorKind::StageUnavailable,
            PipelineError::Model(ModelError::Rejected { .. }) => ErrorKind::RequestRejected,
            PipelineError::Model(ModelError::MalformedResponse { .. }) => ErrorKind::MalformedResponse,
            PipelineError::ContractViolation(_) | PipelineError::PromptEncoding(_) => {
                ErrorKind::ContractViolation
            }
            PipelineError::Mask(MaskError::EmptyMask { .. }) => ErrorKind::EmptyMask,
            PipelineError::Mask(MaskError::DimensionMismatch { .. }) => ErrorKind::InvalidDimension,
            PipelineError::Mask(_) => ErrorKind::UnsupportedFormat,
            PipelineError::Cancelled => ErrorKind::Cancelled,
            PipelineError::Config(_) => ErrorKind::InvalidConfig,
        }
    }

    /// Attach the stage that was running when this error occurred
    pub fn at(self, stage: Stage) -> StageError {
        let raw_payload = match &self {
            PipelineError::Model(err) => err.raw_payload().map(str::to_owned),
            _ => None,
        };
        StageError {
            failed_stage: stage,
            kind: self.kind(),
            message: self.to_string(),
            raw_payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_response_keeps_payload() {
        let err = PipelineError::from(ModelError::MalformedResponse {
            stage: "intent".into(),
            reason: "missing field `target_object_id`".into(),
            raw: "{}".into(),
        });

        let stage_error = err.at(Stage::Intent);

        assert_eq!(stage_error.kind, ErrorKind::MalformedResponse);
        assert_eq!(stage_error.failed_stage, Stage::Intent);
        assert_eq!(stage_error.raw_payload.as_deref(), Some("{}"));
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            PipelineError::from(MaskError::EmptyMask { width: 1, height: 1 }).kind(),
            ErrorKind::EmptyMask
        );
        assert_eq!(
            PipelineError::from(PreprocessError::InvalidDimension { width: 0, height: 3 }).kind(),
            ErrorKind::InvalidDimension
        );
        assert_eq!(PipelineError::contract("bad id").kind(), ErrorKind::ContractViolation);
        let encoding = serde_json::from_str::<u32>("x").unwrap_err();
        assert_eq!(PipelineError::from(encoding).kind(), ErrorKind::ContractViolation);
        assert_eq!(ErrorKind::StageUnavailable.to_string(), "StageUnavailable");
    }

    #[test]
    fn test_stage_error_serialization() {
        let stage_error = PipelineError::contract("part 'blade' not among components").at(Stage::Safety);
        let json = serde_json::to_value(&stage_error).unwrap();

        assert_eq!(json["failed_stage"], "safety");
        assert_eq!(json["kind"], "ContractViolation");
        assert!(json.get("raw_payload").is_none());
    }
}
