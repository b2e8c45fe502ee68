use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr, VariantNames};

/// A step of a pipeline run, in execution order
#[derive(
    Debug, Clone, Copy,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, EnumIter, VariantNames, IntoStaticStr,
    PartialEq, Eq, PartialOrd, Ord, Hash
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Stage {
    Preprocessing,
    /// Find objects in the scene
    Detection,
    /// Pick the object the instruction refers to
    Intent,
    /// Name the functional parts of that object
    Description,
    /// Choose the part that is safe to grasp
    Safety,
    /// Outline the chosen part
    Segmentation,
    Materialization,
}

impl Stage {
    /// Stages backed by a remote model call
    pub const MODEL_STAGES: [Stage; 5] = [
        Stage::Detection,
        Stage::Intent,
        Stage::Description,
        Stage::Safety,
        Stage::Segmentation,
    ];

    pub fn is_model_stage(self) -> bool {
        Self::MODEL_STAGES.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum RunState {
    Running(Stage),
    Completed,
    Failed(Stage),
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunState::Running(_))
    }

    /// Move forward to `next`; runs never go back to an earlier stage
    pub fn advance(self, next: Stage) -> Option<RunState> {
        match self {
            RunState::Running(current) if next > current => Some(RunState::Running(next)),
            _ => None,
        }
    }

    pub fn fail(self) -> RunState {
        match self {
            RunState::Running(stage) | RunState::Failed(stage) => RunState::Failed(stage),
            RunState::Completed => RunState::Completed,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Running(stage) => write!(f, "running:{stage}"),
            RunState::Completed => write!(f, "completed"),
            RunState::Failed(stage) => write!(f, "failed:{stage}"),
        }
    }
}
