use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::{error::TransportError, request::CompletionRequest};

/// Capability interface for a remote vision-language model
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Send one completion request and return the message text
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, TransportError>;
}

/// HTTP backend for OpenAI-compatible chat-completion endpoints
#[derive(Debug, Clone, Default)]
pub struct OpenAiCompatibleBackend {
    http: reqwest::Client,
}

impl OpenAiCompatibleBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuse an existing connection pool
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ModelBackend for OpenAiCompatibleBackend {
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, TransportError> {
        let url = format!("{}/chat/completions", request.settings.base_url.trim_end_matches('/'));

        let mut builder = self
            .http
            .post(&url)
            .timeout(request.settings.timeout)
            .json(&request.to_chat_payload());
        if let Some(key) = &request.settings.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(TransportError::from_reqwest)?;
        let status = response.status();
        let body = response.text().await.map_err(TransportError::from_reqwest)?;

        debug!(stage = request.stage, status = status.as_u16(), bytes = body.len(), "Completion response");

        if !status.is_success() {
            return Err(TransportError::Status { code: status.as_u16(), body });
        }

        let envelope: Value = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(err) => return Err(TransportError::Envelope { reason: err.to_string(), raw: body }),
        };
        extract_content(&envelope).ok_or_else(|| TransportError::Envelope {
            reason: "no choices[0].message.content in response".to_string(),
            raw: body,
        })
    }
}

/// Message text of an OpenAI or DashScope completion envelope
pub fn extract_content(envelope: &Value) -> Option<String> {
    let message = envelope
        .pointer("/choices/0/message/content")
        .or_else(|| envelope.pointer("/output/choices/0/message/content"))?;

    match message {
        Value::String(text) => Some(text.clone()),
        // Multimodal replies arrive as a list of parts
        Value::Array(parts) => {
            let text: String = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect();
            (!text.is_empty()).then_some(text)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_openai_envelope() {
        let envelope = json!({"choices": [{"message": {"role": "assistant", "content": "{\"a\": 1}"}}]});
        assert_eq!(extract_content(&envelope).as_deref(), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_dashscope_envelope() {
        let envelope = json!({
            "output": {"choices": [{"message": {"content": [{"text": "{\"a\":"}, {"text": " 1}"}]}}]}
        });
        assert_eq!(extract_content(&envelope).as_deref(), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_missing_content() {
        assert!(extract_content(&json!({"choices": []})).is_none());
        assert!(extract_content(&json!({"choices": [{"message": {"content": null}}]})).is_none());
    }
}
