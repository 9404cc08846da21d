use std::future::Future;

use axum::{Json, extract::State, http::HeaderMap};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{Instrument, Span};
use uuid::Uuid;

use crate::AppState;
use crate::error::{AppError, AppResult, PipelineError};
use crate::models::ShortStatus;
use crate::pipeline::DailyOutcome;

use super::auth::{WEBHOOK_SECRET_HEADER, require_bearer, require_header};

#[derive(Debug, Default, Deserialize)]
pub struct ManualGenerateBody {
    #[serde(default)]
    pub report_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: DailyOutcome,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub table: String,
}

impl WebhookEvent {
    pub fn is_report_insert(&self) -> bool {
        self.event_type == "INSERT" && self.table == "daily_reports"
    }
}

/// Runs `work` on its own task so a dropped request only abandons the
/// response. The pipeline keeps going and still writes its log entries.
async fn run_detached<F, T>(work: F, span: Span) -> AppResult<T>
where
    F: Future<Output = Result<T, PipelineError>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(work.instrument(span))
        .await
        .map_err(|e| AppError::Internal(format!("generation task aborted: {e}")))?
        .map_err(AppError::from)
}

pub async fn cron_generate_daily(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<TriggerResponse>> {
    require_bearer(&headers, state.config.cron_secret.as_deref())?;

    tracing::info!("Daily generation triggered");
    let pipeline = state.pipeline.clone();
    let outcome = run_detached(
        async move { pipeline.generate_daily_short().await },
        tracing::info_span!("cron daily_short"),
    )
    .await?;
    tracing::info!(
        outcome.message = %outcome.message,
        short.id = ?outcome.short_id,
        "Daily generation finished"
    );

    Ok(Json(TriggerResponse {
        success: true,
        outcome,
    }))
}

pub async fn generate_manual(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<ManualGenerateBody>>,
) -> AppResult<Json<Value>> {
    require_bearer(&headers, state.config.cron_secret.as_deref())?;

    let body = body.map(|Json(body)| body).unwrap_or_default();
    let reports = match body.report_ids.filter(|ids| !ids.is_empty()) {
        Some(ids) => state.store.reports_by_ids(&ids).await?,
        None => {
            state
                .store
                .latest_reports(state.pipeline.settings().daily_batch_size)
                .await?
        }
    };

    if reports.is_empty() {
        return Err(AppError::Validation(
            "No reports found for generation".into(),
        ));
    }

    tracing::info!(report_count = reports.len(), "Manual generation triggered");
    let pipeline = state.pipeline.clone();
    let outcome = run_detached(
        async move { pipeline.generate_from_reports(&reports).await },
        tracing::info_span!("manual short"),
    )
    .await?;

    let message = if outcome.status == ShortStatus::Published {
        "Short published successfully"
    } else {
        "Short created for review successfully"
    };

    Ok(Json(json!({
        "success": true,
        "short_id": outcome.short_id,
        "status": outcome.status,
        "message": message,
    })))
}

/// Acknowledges immediately; generation continues in the background.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(event): Json<WebhookEvent>,
) -> AppResult<Json<Value>> {
    require_header(
        &headers,
        WEBHOOK_SECRET_HEADER,
        state.config.webhook_secret.as_deref(),
    )?;

    if !event.is_report_insert() {
        tracing::info!(
            webhook.type = %event.event_type,
            webhook.table = %event.table,
            "Webhook ignored"
        );
        return Ok(Json(json!({ "message": "Webhook ignored" })));
    }

    let pipeline = state.pipeline.clone();
    tokio::spawn(
        async move {
            match pipeline.generate_daily_short().await {
                Ok(outcome) => tracing::info!(
                    outcome.message = %outcome.message,
                    short.id = ?outcome.short_id,
                    "Webhook-triggered generation finished"
                ),
                Err(e) => tracing::error!(
                    error = %e,
                    error.kind = e.kind(),
                    "Webhook-triggered generation failed"
                ),
            }
        }
        .instrument(tracing::info_span!("webhook daily_short")),
    );

    Ok(Json(json!({
        "success": true,
        "message": "Generation triggered",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_body_defaults() {
        let body: ManualGenerateBody = serde_json::from_str("{}").unwrap();
        assert!(body.report_ids.is_none());

        let id = Uuid::new_v4();
        let body: ManualGenerateBody =
            serde_json::from_str(&format!("{{\"report_ids\": [\"{id}\"]}}")).unwrap();
        assert_eq!(body.report_ids, Some(vec![id]));
    }

    #[test]
    fn test_webhook_event_filter() {
        let insert: WebhookEvent =
            serde_json::from_str(r#"{"type": "INSERT", "table": "daily_reports", "record": {}}"#)
                .unwrap();
        assert!(insert.is_report_insert());

        let update: WebhookEvent =
            serde_json::from_str(r#"{"type": "UPDATE", "table": "daily_reports"}"#).unwrap();
        assert!(!update.is_report_insert());

        let other: WebhookEvent =
            serde_json::from_str(r#"{"type": "INSERT", "table": "shorts"}"#).unwrap();
        assert!(!other.is_report_insert());
    }

    #[test]
    fn test_trigger_response_flattens_outcome() {
        let response = TriggerResponse {
            success: true,
            outcome: DailyOutcome {
                message: "Today's short already exists".to_string(),
                short_id: None,
                status: Some(ShortStatus::Published),
            },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["message"], "Today's short already exists");
        assert_eq!(json["status"], "published");
        assert!(json.get("short_id").is_none());
    }
}
