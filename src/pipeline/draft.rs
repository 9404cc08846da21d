use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::Store;
use crate::error::PipelineError;
use crate::llm::{GenerateRequest, LlmClient};
use crate::models::Stage;

use super::extract::{JsonShape, parse_block};
use super::sanitize::SafeSummary;
use super::stage_log::{StageRun, response_output};

pub const TITLE_MAX_CHARS: usize = 20;
pub const BODY_MIN_CHARS: usize = 150;
pub const BODY_MAX_CHARS: usize = 250;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortDraft {
    pub title: String,
    pub body_md: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

const SYSTEM_PROMPT: &str = "You are a public relations writer for a salon that gives \
individual, unhurried care to clients with special support needs. You write warm, \
modest stories that never identify anyone, never make medical claims and never compare \
the salon with others. Respond with JSON only.";

fn build_prompt(summaries: &[SafeSummary]) -> String {
    let numbered: String = summaries
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}\n", i + 1, s.safe_summary))
        .collect();

    format!(
        "Write one short story from the summaries below.\n\
        - title: at most {title_max} characters\n\
        - body_md: {body_min} to {body_max} characters, moving from care to support to a small step forward\n\
        - tags: a few short topic words\n\n\
        SUMMARIES:\n{numbered}\n\
        Return a JSON object:\n\
        {{\"title\": \"...\", \"body_md\": \"...\", \"tags\": [\"...\"]}}",
        title_max = TITLE_MAX_CHARS,
        body_min = BODY_MIN_CHARS,
        body_max = BODY_MAX_CHARS,
    )
}

#[tracing::instrument(
    name = "pipeline_stage draft",
    skip(llm_client, store, summaries),
    fields(
        pipeline.stage = "draft",
        draft.title_chars,
        draft.body_chars,
    )
)]
pub async fn create_draft(
    llm_client: &LlmClient,
    store: &dyn Store,
    model: &str,
    summaries: &[SafeSummary],
) -> Result<ShortDraft, PipelineError> {
    let mut run = StageRun::start(store, Stage::Draft)
        .with_model(model)
        .with_input(json!({ "summaries": summaries }));

    let resp = match llm_client
        .generate(&GenerateRequest {
            model: model.to_string(),
            system: SYSTEM_PROMPT.to_string(),
            prompt: build_prompt(summaries),
            temperature: 0.7,
            max_tokens: 1000,
            stage: Stage::Draft,
        })
        .await
    {
        Ok(resp) => resp,
        Err(e) => return Err(run.fail(PipelineError::from_llm(Stage::Draft, e), None).await),
    };
    run.answered_by(&resp.model);

    let draft = match parse_draft(&resp.content) {
        Ok(draft) => draft,
        Err(e) => return Err(run.fail(e, Some(&resp.content)).await),
    };

    let span = tracing::Span::current();
    span.record("draft.title_chars", draft.title.chars().count());
    span.record("draft.body_chars", draft.body_md.chars().count());

    run.succeed(None, Some(response_output(&resp.content))).await;
    Ok(draft)
}

pub fn parse_draft(content: &str) -> Result<ShortDraft, PipelineError> {
    let draft: ShortDraft = parse_block(Stage::Draft, content, JsonShape::Object)?;
    validate_draft(&draft)?;
    Ok(draft)
}

/// Length bounds counted in characters. Nothing is trimmed or padded.
pub fn validate_draft(draft: &ShortDraft) -> Result<(), PipelineError> {
    let title_chars = draft.title.chars().count();
    if !(1..=TITLE_MAX_CHARS).contains(&title_chars) {
        return Err(PipelineError::ContractViolation {
            stage: Stage::Draft,
            field: "title",
            measured: title_chars as i64,
            expected: format!("1..={TITLE_MAX_CHARS} chars"),
        });
    }

    let body_chars = draft.body_md.chars().count();
    if !(BODY_MIN_CHARS..=BODY_MAX_CHARS).contains(&body_chars) {
        return Err(PipelineError::ContractViolation {
            stage: Stage::Draft,
            field: "body_md",
            measured: body_chars as i64,
            expected: format!("{BODY_MIN_CHARS}..={BODY_MAX_CHARS} chars"),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(title: &str, body_chars: usize) -> ShortDraft {
        ShortDraft {
            title: title.to_string(),
            body_md: "ゆ".repeat(body_chars),
            tags: vec!["安心".to_string()],
        }
    }

    #[test]
    fn test_valid_draft_bounds() {
        assert!(validate_draft(&draft("穏やかな一日", 150)).is_ok());
        assert!(validate_draft(&draft("穏やかな一日", 250)).is_ok());
        assert!(validate_draft(&draft(&"題".repeat(20), 200)).is_ok());
    }

    #[test]
    fn test_long_body_reports_measured_length() {
        let err = validate_draft(&draft("穏やかな一日", 280)).unwrap_err();
        match err {
            PipelineError::ContractViolation {
                stage,
                field,
                measured,
                ..
            } => {
                assert_eq!(stage, Stage::Draft);
                assert_eq!(field, "body_md");
                assert_eq!(measured, 280);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_short_body_rejected() {
        let err = validate_draft(&draft("穏やかな一日", 149)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ContractViolation { measured: 149, .. }
        ));
    }

    #[test]
    fn test_title_limits() {
        let err = validate_draft(&draft(&"題".repeat(21), 200)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ContractViolation {
                field: "title",
                measured: 21,
                ..
            }
        ));

        let err = validate_draft(&draft("", 200)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::ContractViolation {
                field: "title",
                measured: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_multibyte_body_counted_in_chars() {
        // 200 chars, 600 bytes.
        let d = draft("穏やかな一日", 200);
        assert_eq!(d.body_md.len(), 600);
        assert!(validate_draft(&d).is_ok());
    }

    #[test]
    fn test_parse_draft_without_tags() {
        let body = "a".repeat(160);
        let content = format!("Sure!\n{{\"title\": \"Calm day\", \"body_md\": \"{body}\"}}");
        let parsed = parse_draft(&content).unwrap();
        assert_eq!(parsed.title, "Calm day");
        assert!(parsed.tags.is_empty());
    }

    #[test]
    fn test_parse_draft_missing_body_is_malformed() {
        let err = parse_draft("{\"title\": \"Calm day\"}").unwrap_err();
        assert_eq!(err.kind(), "malformed_response");
    }
}
