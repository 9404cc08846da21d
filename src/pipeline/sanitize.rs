use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::db::Store;
use crate::error::PipelineError;
use crate::llm::{GenerateRequest, LlmClient};
use crate::models::{Report, Stage};

use super::extract::{JsonShape, parse_block};
use super::stage_log::{StageRun, response_output};

pub const SUMMARY_MIN_CHARS: usize = 80;
pub const SUMMARY_MAX_CHARS: usize = 120;

/// Privacy-scrubbed summary of one report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeSummary {
    pub report_id: Uuid,
    pub safe_summary: String,
    #[serde(default)]
    pub flags: Vec<String>,
}

impl SafeSummary {
    pub fn within_band(&self) -> bool {
        let len = self.safe_summary.chars().count();
        (SUMMARY_MIN_CHARS..=SUMMARY_MAX_CHARS).contains(&len)
    }
}

const SYSTEM_PROMPT: &str = "You are a content auditor preparing staff field notes for publication. \
Remove personally identifying details (names, schools, precise locations, diagnoses, contact details) \
by generalizing them, replace sensitive wording with neutral terms, and soften definitive, comparative \
or exaggerated claims. Respond with JSON only.";

fn build_prompt(reports: &[Report]) -> String {
    let input: Vec<_> = reports
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "content": r.content,
                "date": r.report_date,
            })
        })
        .collect();

    format!(
        "Write one safe summary of {min} to {max} characters for each report below, \
        describing the care given first and the support second.\n\
        List every kind of detail you removed or rewrote in \"flags\".\n\n\
        REPORTS:\n{reports}\n\n\
        Return a JSON array with one element per report:\n\
        [{{\"report_id\": \"<report id>\", \"safe_summary\": \"...\", \"flags\": [\"...\"]}}]",
        min = SUMMARY_MIN_CHARS,
        max = SUMMARY_MAX_CHARS,
        reports = serde_json::Value::Array(input),
    )
}

#[tracing::instrument(
    name = "pipeline_stage sanitize",
    skip(llm_client, store, reports),
    fields(
        pipeline.stage = "sanitize",
        sanitize.report_count = reports.len(),
        sanitize.flagged,
    )
)]
pub async fn sanitize(
    llm_client: &LlmClient,
    store: &dyn Store,
    model: &str,
    reports: &[Report],
) -> Result<Vec<SafeSummary>, PipelineError> {
    // Only ids and sizes are logged; report text stays out of the log.
    let input: Vec<_> = reports
        .iter()
        .map(|r| json!({ "id": r.id, "length": r.content_chars() }))
        .collect();
    let mut run = StageRun::start(store, Stage::Sanitize)
        .with_model(model)
        .with_input(json!({ "reports": input }));

    if reports.is_empty() {
        let err = PipelineError::ContractViolation {
            stage: Stage::Sanitize,
            field: "reports",
            measured: 0,
            expected: "at least 1 report".to_string(),
        };
        return Err(run.fail(err, None).await);
    }

    let resp = match llm_client
        .generate(&GenerateRequest {
            model: model.to_string(),
            system: SYSTEM_PROMPT.to_string(),
            prompt: build_prompt(reports),
            temperature: 0.2,
            max_tokens: 2000,
            stage: Stage::Sanitize,
        })
        .await
    {
        Ok(resp) => resp,
        Err(e) => return Err(run.fail(PipelineError::from_llm(Stage::Sanitize, e), None).await),
    };
    run.answered_by(&resp.model);

    let summaries = match parse_summaries(&resp.content, reports) {
        Ok(summaries) => summaries,
        Err(e) => return Err(run.fail(e, Some(&resp.content)).await),
    };

    for summary in summaries.iter().filter(|s| !s.within_band()) {
        tracing::warn!(
            report.id = %summary.report_id,
            summary.chars = summary.safe_summary.chars().count(),
            "Safe summary outside the {SUMMARY_MIN_CHARS}-{SUMMARY_MAX_CHARS} character band"
        );
    }

    let flagged = summaries.iter().filter(|s| !s.flags.is_empty()).count();
    tracing::Span::current().record("sanitize.flagged", flagged);

    run.succeed(None, Some(response_output(&resp.content))).await;
    Ok(summaries)
}

/// Parses the array of summaries and returns it in report order.
pub fn parse_summaries(
    content: &str,
    reports: &[Report],
) -> Result<Vec<SafeSummary>, PipelineError> {
    let summaries: Vec<SafeSummary> = parse_block(Stage::Sanitize, content, JsonShape::Array)?;
    align_to_reports(summaries, reports)
}

/// Orders summaries to match `reports`. Every report must have exactly one
/// summary and every summary must belong to a report.
pub fn align_to_reports(
    summaries: Vec<SafeSummary>,
    reports: &[Report],
) -> Result<Vec<SafeSummary>, PipelineError> {
    if summaries.len() != reports.len() {
        return Err(PipelineError::ContractViolation {
            stage: Stage::Sanitize,
            field: "summaries",
            measured: summaries.len() as i64,
            expected: format!("{} entries", reports.len()),
        });
    }

    let mut by_id: HashMap<Uuid, SafeSummary> = summaries
        .into_iter()
        .map(|s| (s.report_id, s))
        .collect();

    let aligned: Vec<SafeSummary> = reports
        .iter()
        .filter_map(|r| by_id.remove(&r.id))
        .collect();

    if aligned.len() != reports.len() {
        return Err(PipelineError::ContractViolation {
            stage: Stage::Sanitize,
            field: "matched report ids",
            measured: aligned.len() as i64,
            expected: format!("all {} report ids", reports.len()),
        });
    }

    Ok(aligned)
}
