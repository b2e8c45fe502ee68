use std::{collections::HashMap, fs, path::Path, time::Duration};

use model_client::{ModelSettings, RetryPolicy};
use preprocessing::PreprocessConfig;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stage::Stage;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
    #[error(transparent)]
    TomlDeError(#[from] toml::de::Error),
    #[error(transparent)]
    TomlSerError(#[from] toml::ser::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Unsupported file format. Please use .toml or .json files")]
    UnsupportedFileFormat,
    #[error("'{0}' is not a model stage")]
    NotAModelStage(Stage),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Connection details of a chat-completion endpoint
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Per-attempt timeout
    pub timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per model call, including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, initial_backoff_ms: 500, max_backoff_ms: 8000 }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            multiplier: 2.0,
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

/// Model parameters for one stage
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct StageConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub json_mode: bool,
    /// Overrides the shared endpoint for this stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EndpointConfig>,
}

impl StageConfig {
    /// Image-reading stages: deterministic, full-size model
    pub fn vision() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.0,
            max_tokens: 2000,
            json_mode: true,
            endpoint: None,
        }
    }

    /// Text-only reasoning stages
    pub fn reasoning() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            ..Self::vision()
        }
    }
}

/// A `[stages.X]` table; absent fields keep that stage's own default
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StageTable {
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    json_mode: Option<bool>,
    endpoint: Option<EndpointConfig>,
}

impl StageTable {
    fn apply_to(self, mut config: StageConfig) -> StageConfig {
        if let Some(model) = self.model {
            config.model = model;
        }
        if let Some(temperature) = self.temperature {
            config.temperature = temperature;
        }
        if let Some(max_tokens) = self.max_tokens {
            config.max_tokens = max_tokens;
        }
        if let Some(json_mode) = self.json_mode {
            config.json_mode = json_mode;
        }
        if self.endpoint.is_some() {
            config.endpoint = self.endpoint;
        }
        config
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StageTables {
    detection: StageTable,
    intent: StageTable,
    description: StageTable,
    safety: StageTable,
    segmentation: StageTable,
}

impl From<StageTables> for StageConfigs {
    fn from(tables: StageTables) -> Self {
        let defaults = StageConfigs::default();
        Self {
            detection: tables.detection.apply_to(defaults.detection),
            intent: tables.intent.apply_to(defaults.intent),
            description: tables.description.apply_to(defaults.description),
            safety: tables.safety.apply_to(defaults.safety),
            segmentation: tables.segmentation.apply_to(defaults.segmentation),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(from = "StageTables")]
pub struct StageConfigs {
    pub detection: StageConfig,
    pub intent: StageConfig,
    pub description: StageConfig,
    pub safety: StageConfig,
    pub segmentation: StageConfig,
}

impl Default for StageConfigs {
    fn default() -> Self {
        Self {
            detection: StageConfig::vision(),
            intent: StageConfig::reasoning(),
            description: StageConfig::vision(),
            safety: StageConfig::reasoning(),
            segmentation: StageConfig::vision(),
        }
    }
}

impl StageConfigs {
    pub fn get(&self, stage: Stage) -> Option<&StageConfig> {
        match stage {
            Stage::Detection => Some(&self.detection),
            Stage::Intent => Some(&self.intent),
            Stage::Description => Some(&self.description),
            Stage::Safety => Some(&self.safety),
            Stage::Segmentation => Some(&self.segmentation),
            Stage::Preprocessing | Stage::Materialization => None,
        }
    }

    pub fn get_mut(&mut self, stage: Stage) -> Result<&mut StageConfig, ConfigError> {
        match stage {
            Stage::Detection => Ok(&mut self.detection),
            Stage::Intent => Ok(&mut self.intent),
            Stage::Description => Ok(&mut self.description),
            Stage::Safety => Ok(&mut self.safety),
            Stage::Segmentation => Ok(&mut self.segmentation),
            other => Err(ConfigError::NotAModelStage(other)),
        }
    }
}

/// API keys by environment variable name, resolved outside the pipeline
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Credentials {
    keys: HashMap<String, String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, env_var: impl Into<String>, key: impl Into<String>) -> Self {
        self.insert(env_var, key);
        self
    }

    pub fn insert(&mut self, env_var: impl Into<String>, key: impl Into<String>) {
        self.keys.insert(env_var.into(), key.into());
    }

    pub fn get(&self, env_var: &str) -> Option<&str> {
        self.keys.get(env_var).map(String::as_str)
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Longest side of the image sent to the models
    pub max_dimension: u32,
    pub jpeg_quality: u8,
    /// RGB colour transparent pixels are composited onto
    pub background: [u8; 3],
    pub endpoint: EndpointConfig,
    pub retry: RetryConfig,
    pub stages: StageConfigs,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let preprocess = PreprocessConfig::default();
        Self {
            max_dimension: preprocess.max_dimension,
            jpeg_quality: preprocess.jpeg_quality,
            background: preprocess.background,
            endpoint: EndpointConfig::default(),
            retry: RetryConfig::default(),
            stages: StageConfigs::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Auto-detect file format and load configuration
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        match path_ref.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_file(path),
            Some("json") => Self::from_json_file(path),
            _ => Err(ConfigError::UnsupportedFileFormat),
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Save configuration, format chosen by extension
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path_ref = path.as_ref();
        let content = match path_ref.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => self.to_toml()?,
            Some("json") => self.to_json()?,
            _ => return Err(ConfigError::UnsupportedFileFormat),
        };
        fs::write(path_ref, content)?;
        Ok(())
    }

    pub fn preprocess_config(&self) -> PreprocessConfig {
        PreprocessConfig {
            max_dimension: self.max_dimension,
            background: self.background,
            jpeg_quality: self.jpeg_quality,
        }
    }

    /// Endpoint used by `stage`, honouring per-stage overrides
    pub fn endpoint_for(&self, stage: Stage) -> &EndpointConfig {
        self.stages
            .get(stage)
            .and_then(|config| config.endpoint.as_ref())
            .unwrap_or(&self.endpoint)
    }

    /// Resolved call settings for a model stage
    pub fn model_settings(&self, stage: Stage, credentials: &Credentials) -> Option<ModelSettings> {
        let config = self.stages.get(stage)?;
        let endpoint = self.endpoint_for(stage);
        Some(ModelSettings {
            base_url: endpoint.base_url.clone(),
            api_key: credentials.get(&endpoint.api_key_env).map(str::to_owned),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            json_mode: config.json_mode,
            timeout: Duration::from_secs(endpoint.timeout_secs),
        })
    }

    /// Distinct API-key variables referenced by any stage
    pub fn api_key_envs(&self) -> Vec<&str> {
        let mut envs: Vec<&str> = Stage::MODEL_STAGES
            .iter()
            .map(|&stage| self.endpoint_for(stage).api_key_env.as_str())
            .collect();
        envs.sort_unstable();
        envs.dedup();
        envs
    }

    /// Model stages whose API key is not in `credentials`
    pub fn missing_credentials(&self, credentials: &Credentials) -> Vec<(Stage, &str)> {
        Stage::MODEL_STAGES
            .iter()
            .map(|&stage| (stage, self.endpoint_for(stage).api_key_env.as_str()))
            .filter(|(_, env)| credentials.get(env).is_none())
            .collect()
    }

    pub fn set_model(&mut self, stage: Stage, model: impl Into<String>) -> Result<(), ConfigError> {
        self.stages.get_mut(stage)?.model = model.into();
        Ok(())
    }

    pub fn set_temperature(&mut self, stage: Stage, temperature: f32) -> Result<(), ConfigError> {
        self.stages.get_mut(stage)?.temperature = temperature;
        Ok(())
    }

    /// Reject values no run could succeed with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid(message));

        if self.max_dimension == 0 {
            return invalid("max_dimension must be positive".to_string());
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return invalid(format!("jpeg_quality {} outside 1..=100", self.jpeg_quality));
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".to_string());
        }
        for stage in Stage::MODEL_STAGES {
            let Some(config) = self.stages.get(stage) else { continue };
            if config.model.trim().is_empty() {
                return invalid(format!("stages.{stage}.model is empty"));
            }
            if !(0.0..=2.0).contains(&config.temperature) {
                return invalid(format!("stages.{stage}.temperature {} outside 0..=2", config.temperature));
            }
            if config.max_tokens == 0 {
                return invalid(format!("stages.{stage}.max_tokens must be positive"));
            }
            let endpoint = self.endpoint_for(stage);
            if endpoint.base_url.trim().is_empty() {
                return invalid(format!("endpoint for {stage} has an empty base_url"));
            }
            if endpoint.timeout_secs == 0 {
                return invalid(format!("endpoint for {stage} has a zero timeout"));
            }
        }
        Ok(())
    }
}
