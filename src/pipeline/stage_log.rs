use std::time::Instant;

use opentelemetry::KeyValue;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::db::Store;
use crate::error::PipelineError;
use crate::models::{LogStatus, NewGenerationLog, Stage};
use crate::telemetry::metrics::PIPELINE_STAGE_DURATION;

pub const LOGGED_OUTPUT_MAX_CHARS: usize = 500;

pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Logged form of a generation response.
pub fn response_output(response: &str) -> Value {
    json!({ "response": truncate_chars(response, LOGGED_OUTPUT_MAX_CHARS) })
}

/// One in-flight stage invocation. Finishing consumes the run, so each
/// invocation produces exactly one log entry.
pub struct StageRun<'a> {
    store: &'a dyn Store,
    stage: Stage,
    started: Instant,
    model_name: Option<String>,
    input_data: Option<Value>,
}

impl<'a> StageRun<'a> {
    pub fn start(store: &'a dyn Store, stage: Stage) -> Self {
        Self {
            store,
            stage,
            started: Instant::now(),
            model_name: None,
            input_data: None,
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model_name = Some(model.to_string());
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input_data = Some(input);
        self
    }

    /// Replaces the requested model with the one that actually answered.
    pub fn answered_by(&mut self, model: &str) {
        if !model.is_empty() {
            self.model_name = Some(model.to_string());
        }
    }

    pub fn elapsed_ms(&self) -> i64 {
        self.started.elapsed().as_millis() as i64
    }

    pub async fn succeed(self, short_id: Option<Uuid>, output: Option<Value>) {
        let mut entry = self.entry(LogStatus::Success);
        entry.short_id = short_id;
        entry.output_data = output;
        self.write(entry).await;
    }

    /// Records the failure and hands the error back for propagation.
    /// `response` is the generation output, when one was received.
    pub async fn fail(self, err: PipelineError, response: Option<&str>) -> PipelineError {
        let mut entry = self.entry(LogStatus::Error);
        entry.error_message = Some(err.to_string());
        entry.output_data = response.map(response_output);
        entry.metadata = Some(json!({ "error_kind": err.kind() }));

        tracing::error!(
            pipeline.stage = %self.stage,
            error = %err,
            error.kind = err.kind(),
            elapsed_ms = entry.elapsed_ms,
            "Pipeline stage failed"
        );

        self.write(entry).await;
        err
    }

    fn entry(&self, status: LogStatus) -> NewGenerationLog {
        let mut entry = NewGenerationLog::new(self.stage, status);
        entry.elapsed_ms = self.elapsed_ms();
        entry.model_name = self.model_name.clone();
        entry.input_data = self.input_data.clone();
        entry
    }

    async fn write(self, entry: NewGenerationLog) {
        PIPELINE_STAGE_DURATION.record(
            entry.elapsed_ms as f64,
            &[
                KeyValue::new("pipeline.stage", self.stage.as_str()),
                KeyValue::new("outcome", entry.status.as_str()),
            ],
        );

        if let Err(e) = self.store.insert_generation_log(&entry).await {
            tracing::error!(
                pipeline.stage = %self.stage,
                error = %e,
                "Failed to write generation log entry"
            );
        }
    }
}
