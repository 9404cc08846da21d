use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::Store;
use crate::error::PipelineError;
use crate::llm::{GenerateRequest, LlmClient};
use crate::models::Stage;
use crate::telemetry::metrics::AUDIT_RISK_SCORE;

use super::draft::{BODY_MAX_CHARS, BODY_MIN_CHARS, ShortDraft};
use super::extract::{JsonShape, parse_block};
use super::stage_log::{StageRun, response_output};

pub const MAX_RISK_SCORE: i64 = 100;

/// The auditor's suggested status. Advisory only; anything it sends that
/// is not a known status is kept as `Unrecognized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Published,
    PendingReview,
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditResult {
    pub pii_risk_score: u8,
    pub issues_found: Vec<String>,
    pub ok_version_md: Option<String>,
    pub recommended_status: Recommendation,
}

#[derive(Deserialize)]
struct RawAudit {
    pii_risk_score: serde_json::Value,
    #[serde(default)]
    issues_found: Vec<String>,
    #[serde(default)]
    ok_version_md: Option<String>,
    recommended_status: Recommendation,
}

const SYSTEM_PROMPT: &str = "You are a quality auditor for published stories. Look for \
personally identifying information (names, schools, precise places, diagnoses, contact \
details), definitive medical claims, comparative advertising and exaggerated claims. \
Respond with JSON only.";

fn build_prompt(draft: &ShortDraft) -> String {
    format!(
        "Audit this draft.\n\n\
        Title: {title}\n\
        Body: {body}\n\
        Tags: {tags}\n\n\
        Return a JSON object:\n\
        {{\"pii_risk_score\": <integer 0-100>, \"issues_found\": [\"...\"], \
        \"ok_version_md\": \"<corrected body, only when changes are needed>\", \
        \"recommended_status\": \"published\" | \"pending_review\"}}",
        title = draft.title,
        body = draft.body_md,
        tags = draft.tags.join(", "),
    )
}

#[tracing::instrument(
    name = "pipeline_stage audit",
    skip(llm_client, store, draft),
    fields(
        pipeline.stage = "audit",
        audit.risk_score,
        audit.issues_found,
        audit.recommended_status,
    )
)]
pub async fn audit_draft(
    llm_client: &LlmClient,
    store: &dyn Store,
    model: &str,
    draft: &ShortDraft,
) -> Result<AuditResult, PipelineError> {
    let mut run = StageRun::start(store, Stage::Audit)
        .with_model(model)
        .with_input(json!({ "draft": draft }));

    let resp = match llm_client
        .generate(&GenerateRequest {
            model: model.to_string(),
            system: SYSTEM_PROMPT.to_string(),
            prompt: build_prompt(draft),
            temperature: 0.0,
            max_tokens: 1500,
            stage: Stage::Audit,
        })
        .await
    {
        Ok(resp) => resp,
        Err(e) => return Err(run.fail(PipelineError::from_llm(Stage::Audit, e), None).await),
    };
    run.answered_by(&resp.model);

    let audit = match parse_audit(&resp.content) {
        Ok(audit) => audit,
        Err(e) => return Err(run.fail(e, Some(&resp.content)).await),
    };

    let span = tracing::Span::current();
    span.record("audit.risk_score", audit.pii_risk_score);
    span.record("audit.issues_found", audit.issues_found.len());
    span.record(
        "audit.recommended_status",
        tracing::field::debug(audit.recommended_status),
    );

    AUDIT_RISK_SCORE.record(
        f64::from(audit.pii_risk_score),
        &[KeyValue::new("gen_ai.request.model", model.to_string())],
    );

    run.succeed(None, Some(response_output(&resp.content))).await;
    Ok(audit)
}

/// Accepts `10` and `10.0`; rejects fractions and non-numbers.
fn integral_score(value: &serde_json::Value) -> Option<i64> {
    if let Some(score) = value.as_i64() {
        return Some(score);
    }
    value
        .as_f64()
        .filter(|score| score.is_finite() && score.fract() == 0.0)
        .map(|score| score as i64)
}

pub fn parse_audit(content: &str) -> Result<AuditResult, PipelineError> {
    let raw: RawAudit = parse_block(Stage::Audit, content, JsonShape::Object)?;

    let score = integral_score(&raw.pii_risk_score).ok_or_else(|| {
        PipelineError::MalformedResponse {
            stage: Stage::Audit,
            reason: "pii_risk_score is not an integer".to_string(),
        }
    })?;

    if !(0..=MAX_RISK_SCORE).contains(&score) {
        return Err(PipelineError::ContractViolation {
            stage: Stage::Audit,
            field: "pii_risk_score",
            measured: score,
            expected: format!("0..={MAX_RISK_SCORE}"),
        });
    }

    let ok_version_md = raw.ok_version_md.filter(|body| !body.is_empty());
    if let Some(body) = &ok_version_md {
        let chars = body.chars().count();
        if !(BODY_MIN_CHARS..=BODY_MAX_CHARS).contains(&chars) {
            tracing::warn!(
                ok_version.chars = chars,
                "Corrected body outside the draft length bounds"
            );
        }
    }

    if raw.recommended_status == Recommendation::Unrecognized {
        tracing::warn!("Auditor returned an unrecognized recommended_status");
    }

    Ok(AuditResult {
        pii_risk_score: score as u8,
        issues_found: raw.issues_found,
        ok_version_md,
        recommended_status: raw.recommended_status,
    })
}
