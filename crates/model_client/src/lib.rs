//! Client for OpenAI-compatible vision-language endpoints.
//!
//! [`ModelClient::invoke`] sends a prompt (and optionally an image) for one
//! pipeline stage and decodes the reply into the stage's response type.
//! Transport goes through the [`ModelBackend`] trait; the default backend
//! speaks HTTP via a pooled `reqwest::Client`.

pub mod backend;
pub mod client;
pub mod error;
pub mod request;
pub mod retry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backend::{ModelBackend, OpenAiCompatibleBackend, extract_content};
pub use client::{ModelClient, decode_response, strip_code_fences};
pub use error::{ModelError, Result, TransportError};
pub use request::{CompletionRequest, ImageAttachment, ModelSettings};
pub use retry::RetryPolicy;
