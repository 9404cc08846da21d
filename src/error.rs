use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use opentelemetry::trace::TraceContextExt;
use serde_json::json;
use thiserror::Error;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::db::StoreError;
use crate::llm::LlmError;
use crate::models::Stage;

/// Failure of one pipeline stage. Nothing here is retried or corrected
/// automatically; the caller decides.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{stage}: malformed generation response: {reason}")]
    MalformedResponse { stage: Stage, reason: String },

    #[error("{stage}: contract violated: {field} is {measured}, expected {expected}")]
    ContractViolation {
        stage: Stage,
        field: &'static str,
        measured: i64,
        expected: String,
    },

    #[error("{stage}: persistence failed: {source}")]
    Persistence {
        stage: Stage,
        #[source]
        source: StoreError,
    },

    #[error("{stage}: {source}")]
    Upstream {
        stage: Stage,
        #[source]
        source: LlmError,
    },

    #[error("{stage}: generation timed out after {elapsed_ms}ms")]
    Timeout { stage: Stage, elapsed_ms: u64 },

    /// A store read made outside any stage, such as the daily gate lookup.
    #[error("store lookup failed: {0}")]
    Lookup(#[from] StoreError),
}

impl PipelineError {
    pub fn from_llm(stage: Stage, err: LlmError) -> Self {
        match err {
            LlmError::Timeout(after) => PipelineError::Timeout {
                stage,
                elapsed_ms: after.as_millis() as u64,
            },
            other => PipelineError::Upstream {
                stage,
                source: other,
            },
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::MalformedResponse { stage, .. }
            | PipelineError::ContractViolation { stage, .. }
            | PipelineError::Persistence { stage, .. }
            | PipelineError::Upstream { stage, .. }
            | PipelineError::Timeout { stage, .. } => Some(*stage),
            PipelineError::Lookup(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::MalformedResponse { .. } => "malformed_response",
            PipelineError::ContractViolation { .. } => "contract_violation",
            PipelineError::Persistence { .. } => "persistence_error",
            PipelineError::Upstream { .. } => "upstream_error",
            PipelineError::Timeout { .. } => "timeout",
            PipelineError::Lookup(_) => "store_read_error",
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn get_trace_id() -> Option<String> {
    let span = Span::current();
    let context = span.context();
    let span_ref = context.span();
    let span_context = span_ref.span_context();

    if span_context.is_valid() {
        Some(span_context.trace_id().to_string())
    } else {
        None
    }
}

impl AppError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Store(_) | AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
            AppError::Pipeline(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Generation failed".to_string(),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Store(e) => tracing::error!(error = %e, "Store error"),
            AppError::Pipeline(e) => tracing::error!(
                error = %e,
                error.kind = e.kind(),
                pipeline.stage = ?e.stage(),
                "Pipeline error"
            ),
            AppError::Internal(msg) => tracing::error!(error = %msg, "Internal error"),
            AppError::Unauthorized => tracing::warn!("Unauthorized request"),
            _ => {}
        }

        let (status, error_message) = self.status_and_message();

        let body = if let Some(trace_id) = get_trace_id() {
            json!({
                "error": error_message,
                "status": status.as_u16(),
                "trace_id": trace_id,
            })
        } else {
            json!({
                "error": error_message,
                "status": status.as_u16(),
            })
        };

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
