//! Scripted in-memory backend for deterministic tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use serde_json::Value;

use crate::{backend::ModelBackend, error::TransportError, request::CompletionRequest};

/// A request the scripted backend received
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub stage: String,
    pub model: String,
    pub prompt: String,
    pub has_image: bool,
}

/// Backend that answers each stage from a queue of canned replies.
///
/// A stage with no reply left fails with a non-transient HTTP 400.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: Mutex<HashMap<String, VecDeque<Result<String, TransportError>>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a text reply for `stage`
    pub fn reply(self, stage: &str, content: impl Into<String>) -> Self {
        self.push(stage, Ok(content.into()));
        self
    }

    /// Queue a JSON reply for `stage`
    pub fn reply_json(self, stage: &str, value: Value) -> Self {
        self.reply(stage, value.to_string())
    }

    /// Queue a transport failure for `stage`
    pub fn fail(self, stage: &str, error: TransportError) -> Self {
        self.push(stage, Err(error));
        self
    }

    pub fn push(&self, stage: &str, reply: Result<String, TransportError>) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(stage.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of requests issued for `stage`
    pub fn call_count(&self, stage: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|call| call.stage == stage)
            .count()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, TransportError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                stage: request.stage.to_string(),
                model: request.settings.model.clone(),
                prompt: request.prompt.to_string(),
                has_image: request.image.is_some(),
            });

        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(request.stage)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| {
                Err(TransportError::Status {
                    code: 400,
                    body: format!("no scripted reply for stage '{}'", request.stage),
                })
            })
    }
}
