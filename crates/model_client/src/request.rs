use std::{fmt, time::Duration};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::{Value, json};

/// Resolved per-stage call settings
#[derive(Clone, PartialEq)]
pub struct ModelSettings {
    /// Base URL of an OpenAI-compatible API, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the endpoint for a JSON object response
    pub json_mode: bool,
    /// Per-attempt timeout
    pub timeout: Duration,
}

impl fmt::Debug for ModelSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("json_mode", &self.json_mode)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o".to_string(),
            temperature: 0.0,
            max_tokens: 2000,
            json_mode: true,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Image sent alongside a prompt, already encoded
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAttachment {
    mime_type: &'static str,
    base64: String,
}

impl ImageAttachment {
    pub fn jpeg(bytes: &[u8]) -> Self {
        Self { mime_type: "image/jpeg", base64: STANDARD.encode(bytes) }
    }

    pub fn png(bytes: &[u8]) -> Self {
        Self { mime_type: "image/png", base64: STANDARD.encode(bytes) }
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }

    /// Size of the encoded payload in bytes
    pub fn encoded_len(&self) -> usize {
        self.base64.len()
    }
}

/// One chat-completion call
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    /// Pipeline stage issuing the call, used for logs and errors
    pub stage: &'a str,
    pub settings: &'a ModelSettings,
    pub prompt: &'a str,
    pub image: Option<&'a ImageAttachment>,
}

const JSON_REMINDER: &str = "\n\nRespond with a single valid JSON object.";

impl CompletionRequest<'_> {
    /// OpenAI chat-completions request body
    pub fn to_chat_payload(&self) -> Value {
        let mut text = self.prompt.to_string();
        // JSON mode is refused unless the word "json" appears in the messages
        if self.settings.json_mode && !text.to_lowercase().contains("json") {
            text.push_str(JSON_REMINDER);
        }

        let mut content = vec![json!({ "type": "text", "text": text })];
        if let Some(image) = self.image {
            content.push(json!({
                "type": "image_url",
                "image_url": { "url": image.data_url() }
            }));
        }

        let mut payload = json!({
            "model": self.settings.model,
            "messages": [{ "role": "user", "content": content }],
            "max_tokens": self.settings.max_tokens,
            "temperature": self.settings.temperature,
        });
        if self.settings.json_mode {
            payload["response_format"] = json!({ "type": "json_object" });
        }
        payload
    }
}
