use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    backend::{ModelBackend, OpenAiCompatibleBackend},
    error::{ModelError, Result, TransportError},
    request::{CompletionRequest, ImageAttachment, ModelSettings},
    retry::RetryPolicy,
};

/// Typed, retrying front end over a [`ModelBackend`].
///
/// Holds no per-call state and can be shared between concurrent runs.
#[derive(Clone)]
pub struct ModelClient {
    backend: Arc<dyn ModelBackend>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ModelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClient").field("retry", &self.retry).finish_non_exhaustive()
    }
}

impl Default for ModelClient {
    fn default() -> Self {
        Self::new(Arc::new(OpenAiCompatibleBackend::new()), RetryPolicy::default())
    }
}

impl ModelClient {
    pub fn new(backend: Arc<dyn ModelBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Call the model for `stage` and decode its reply as `T`.
    ///
    /// Transient transport failures are retried per the retry policy; any
    /// other failure returns immediately.
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        stage: &str,
        settings: &ModelSettings,
        prompt: &str,
        image: Option<&ImageAttachment>,
    ) -> Result<T> {
        let request = CompletionRequest { stage, settings, prompt, image };
        let content = self.complete_with_retry(&request).await?;
        decode_response(stage, &content)
    }

    /// Raw message text, with retries
    pub async fn complete_with_retry(&self, request: &CompletionRequest<'_>) -> Result<String> {
        let attempts = self.retry.attempts();
        let mut failures = 0;

        loop {
            debug!(
                stage = request.stage,
                model = %request.settings.model,
                attempt = failures + 1,
                image_bytes = request.image.map(ImageAttachment::encoded_len),
                "Sending completion request"
            );

            let err = match self.backend.complete(request).await {
                Ok(content) => return Ok(content),
                Err(err) => err,
            };
            failures += 1;

            if !err.is_transient() {
                return Err(classify(request.stage, err));
            }
            if failures >= attempts {
                return Err(ModelError::StageUnavailable {
                    stage: request.stage.to_string(),
                    attempts: failures,
                    last_error: err.to_string(),
                });
            }

            let delay = self.retry.backoff(failures);
            warn!(
                stage = request.stage,
                attempt = failures,
                max_attempts = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient model failure, retrying"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn classify(stage: &str, err: TransportError) -> ModelError {
    match err {
        TransportError::Envelope { reason, raw } => ModelError::MalformedResponse {
            stage: stage.to_string(),
            reason,
            raw,
        },
        TransportError::Status { code, body } => ModelError::Rejected {
            stage: stage.to_string(),
            status: Some(code),
            message: body,
        },
        other => ModelError::Rejected {
            stage: stage.to_string(),
            status: None,
            message: other.to_string(),
        },
    }
}

/// Parse model text as `T`, tolerating markdown fences and surrounding prose
pub fn decode_response<T: DeserializeOwned>(stage: &str, content: &str) -> Result<T> {
    let malformed = |reason: String| ModelError::MalformedResponse {
        stage: stage.to_string(),
        reason,
        raw: content.to_string(),
    };

    let value = parse_json_value(content).ok_or_else(|| malformed("response is not JSON".to_string()))?;
    serde_json::from_value(value).map_err(|err| malformed(err.to_string()))
}

fn parse_json_value(content: &str) -> Option<Value> {
    let cleaned = strip_code_fences(content);
    if let Ok(value) = serde_json::from_str(cleaned) {
        return Some(value);
    }

    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&cleaned[start..=end]).ok()
}

/// Remove a surrounding ```` ``` ```` or ```` ```json ```` fence
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string, e.g. "json"
    let body = rest.split_once('\n').map_or(rest, |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
