use chrono::{NaiveDate, Utc};
use opentelemetry::KeyValue;
use serde_json::json;
use uuid::Uuid;

use crate::db::Store;
use crate::error::PipelineError;
use crate::models::{NewShort, Short, ShortStatus, Stage};
use crate::revalidate::{AUTO_PUBLISHED_EVENT, Invalidator};
use crate::telemetry::metrics::{REVALIDATION_FAILURES, SHORTS_GENERATED};

use super::audit::{AuditResult, Recommendation};
use super::draft::ShortDraft;
use super::stage_log::StageRun;

/// Highest risk score that may still be published without review.
pub const AUTO_PUBLISH_MAX_RISK: u8 = 20;

/// Both signals must hold for a short to go live without review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishDecision {
    pub risk_within_limit: bool,
    pub auditor_approves: bool,
}

impl PublishDecision {
    pub fn evaluate(audit: &AuditResult) -> Self {
        Self {
            risk_within_limit: audit.pii_risk_score <= AUTO_PUBLISH_MAX_RISK,
            auditor_approves: audit.recommended_status == Recommendation::Published,
        }
    }

    pub fn status(&self) -> ShortStatus {
        if self.risk_within_limit && self.auditor_approves {
            ShortStatus::Published
        } else {
            ShortStatus::PendingReview
        }
    }
}

/// The corrected body wins over the draft body when the auditor sent one.
pub fn effective_body<'a>(draft: &'a ShortDraft, audit: &'a AuditResult) -> &'a str {
    audit.ok_version_md.as_deref().unwrap_or(&draft.body_md)
}

#[tracing::instrument(
    name = "pipeline_stage publish",
    skip(store, invalidator, draft, audit, source_report_ids),
    fields(
        pipeline.stage = "publish",
        short.id,
        short.status,
        short.daily_slot = ?daily_slot,
    )
)]
pub async fn publish_or_queue(
    store: &dyn Store,
    invalidator: &dyn Invalidator,
    draft: &ShortDraft,
    audit: &AuditResult,
    source_report_ids: &[Uuid],
    daily_slot: Option<NaiveDate>,
) -> Result<Short, PipelineError> {
    let decision = PublishDecision::evaluate(audit);
    let status = decision.status();

    let run = StageRun::start(store, Stage::Publish).with_input(json!({
        "pii_risk_score": audit.pii_risk_score,
        "recommended_status": audit.recommended_status,
        "risk_within_limit": decision.risk_within_limit,
        "auditor_approves": decision.auditor_approves,
        "source_report_ids": source_report_ids,
    }));

    let new_short = NewShort {
        title: draft.title.clone(),
        body_md: effective_body(draft, audit).to_string(),
        tags: draft.tags.clone(),
        status,
        pii_risk_score: i32::from(audit.pii_risk_score),
        source_report_ids: source_report_ids.to_vec(),
        daily_slot,
        published_at: (status == ShortStatus::Published).then(Utc::now),
    };

    let short = match store.insert_short(&new_short).await {
        Ok(short) => short,
        Err(source) => {
            let err = PipelineError::Persistence {
                stage: Stage::Publish,
                source,
            };
            return Err(run.fail(err, None).await);
        }
    };

    let span = tracing::Span::current();
    span.record("short.id", tracing::field::display(short.id));
    span.record("short.status", short.status.as_str());

    run.succeed(
        Some(short.id),
        Some(json!({
            "short_id": short.id,
            "status": short.status,
            "used_ok_version": audit.ok_version_md.is_some(),
        })),
    )
    .await;

    SHORTS_GENERATED.add(1, &[KeyValue::new("short.status", short.status.as_str())]);

    if short.status == ShortStatus::Published {
        notify_published(invalidator, AUTO_PUBLISHED_EVENT, short.id).await;
    }

    tracing::info!(
        short.id = %short.id,
        short.status = %short.status,
        pii_risk_score = short.pii_risk_score,
        "Short stored"
    );

    Ok(short)
}

/// Fires one invalidation call. A failure is logged and counted, never
/// returned.
pub async fn notify_published(invalidator: &dyn Invalidator, event: &str, short_id: Uuid) {
    if let Err(e) = invalidator.invalidate(event).await {
        tracing::warn!(
            short.id = %short_id,
            event,
            error = %e,
            "Cache invalidation failed"
        );
        REVALIDATION_FAILURES.add(1, &[KeyValue::new("event", event.to_string())]);
    }
}
