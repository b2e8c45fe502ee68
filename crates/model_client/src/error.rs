use thiserror::Error;

/// Failure of a single completion attempt
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Endpoint returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("Unreadable completion envelope: {reason}")]
    Envelope { reason: String, raw: String },
}

impl TransportError {
    /// Timeouts, connection failures, HTTP 429 and HTTP 5xx are worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Timeout | TransportError::Connection(_) => true,
            TransportError::Status { code, .. } => *code == 429 || (500..600).contains(code),
            TransportError::Envelope { .. } => false,
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Connection(err.to_string())
        }
    }
}

/// Failure of a stage invocation after retries
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Stage '{stage}' unavailable after {attempts} attempts: {last_error}")]
    StageUnavailable {
        stage: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Stage '{stage}' request rejected{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Rejected {
        stage: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Stage '{stage}' returned a malformed response: {reason}")]
    MalformedResponse {
        stage: String,
        reason: String,
        raw: String,
    },
}

impl ModelError {
    pub fn stage(&self) -> &str {
        match self {
            ModelError::StageUnavailable { stage, .. }
            | ModelError::Rejected { stage, .. }
            | ModelError::MalformedResponse { stage, .. } => stage,
        }
    }

    /// Raw model output, present only for malformed responses
    pub fn raw_payload(&self) -> Option<&str> {
        match self {
            ModelError::MalformedResponse { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;
