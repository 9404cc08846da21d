pub mod anthropic;
pub mod client;
pub mod openai;

use std::time::Duration;

use thiserror::Error;

use crate::models::Stage;

pub use client::LlmClient;

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stage: Stage,
}

#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub finish_reason: String,
    pub provider: String,
}

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("upstream error ({}): {message}", display_status(.status))]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    #[error("generation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

fn display_status(status: &Option<u16>) -> String {
    status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "no status".to_string())
}

impl LlmError {
    /// Low-cardinality label for the `error.type` span attribute.
    pub fn error_type(&self) -> &'static str {
        match self {
            LlmError::Upstream {
                status: Some(429), ..
            } => "rate_limit",
            LlmError::Upstream {
                status: Some(401 | 403),
                ..
            } => "auth_error",
            LlmError::Upstream {
                status: Some(400 | 422),
                ..
            } => "invalid_request",
            LlmError::Upstream {
                status: Some(s), ..
            } if *s >= 500 => "server_error",
            LlmError::Upstream { .. } => "upstream_error",
            LlmError::Timeout(_) => "timeout",
            LlmError::Transport(_) => "network_error",
            LlmError::InvalidRequest(_) => "invalid_request",
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => LlmError::Upstream {
                status: Some(status.as_u16()),
                message: err.to_string(),
            },
            None => LlmError::Transport(err.to_string()),
        }
    }
}

/// A text-generation backend. One request, one free-text response.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, LlmError>;
    fn name(&self) -> &str;
}
