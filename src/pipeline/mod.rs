pub mod audit;
pub mod draft;
pub mod extract;
pub mod orchestrator;
pub mod publish;
pub mod sanitize;
pub mod stage_log;

pub use audit::{AuditResult, Recommendation};
pub use draft::ShortDraft;
pub use orchestrator::{DailyOutcome, DayWindow, GenerationOutcome, ShortsPipeline};
pub use publish::{AUTO_PUBLISH_MAX_RISK, PublishDecision};
pub use sanitize::SafeSummary;

/// Values the pipeline reads from configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub model: String,
    /// Reports fed into one scheduled run.
    pub daily_batch_size: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5-20250929".to_string(),
            daily_batch_size: 3,
        }
    }
}
