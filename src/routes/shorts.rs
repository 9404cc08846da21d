use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{
    GenerationLogEntry, LogFilter, LogStatus, NewGenerationLog, Short, ShortStatus, Stage,
    StatusUpdate,
};
use crate::pipeline::publish::notify_published;
use crate::revalidate::MANUAL_PUBLISHED_EVENT;

use super::auth::require_bearer;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<ShortStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListQuery {
    fn page(&self) -> (i64, i64) {
        let limit = self
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

#[derive(Debug, Serialize)]
pub struct ShortWithLogs {
    #[serde(flatten)]
    pub short: Short,
    pub generation_logs: Vec<GenerationLogEntry>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusBody {
    pub status: ShortStatus,
}

pub async fn list_shorts(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListQuery>,
) -> AppResult<Json<Vec<Short>>> {
    require_bearer(&headers, state.config.admin_secret.as_deref())?;

    let (limit, offset) = params.page();
    let shorts = state.store.list_shorts(params.status, limit, offset).await?;

    Ok(Json(shorts))
}

pub async fn get_short(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ShortWithLogs>> {
    require_bearer(&headers, state.config.admin_secret.as_deref())?;

    let short = state
        .store
        .get_short(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Short {id} not found")))?;

    let generation_logs = state
        .store
        .list_generation_logs(&LogFilter::for_short(id))
        .await?;

    Ok(Json(ShortWithLogs {
        short,
        generation_logs,
    }))
}

/// Moderation transition. Only the closed set of moves allowed by
/// `ShortStatus::can_transition_to` is accepted.
pub async fn update_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateStatusBody>,
) -> AppResult<Json<Short>> {
    require_bearer(&headers, state.config.admin_secret.as_deref())?;

    let current = state
        .store
        .get_short(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Short {id} not found")))?;

    if !current.status.can_transition_to(body.status) {
        return Err(AppError::Conflict(format!(
            "cannot move short from {} to {}",
            current.status, body.status
        )));
    }

    let update = StatusUpdate::to(body.status, Utc::now());
    let updated = state
        .store
        .update_short_status(id, &update)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Short {id} not found")))?;

    let mut entry = NewGenerationLog::new(Stage::Publish, LogStatus::Success);
    entry.short_id = Some(id);
    entry.input_data = Some(json!({ "from": current.status, "to": updated.status }));
    entry.metadata = Some(json!({ "manual_update": true }));
    if let Err(e) = state.store.insert_generation_log(&entry).await {
        tracing::error!(error = %e, "Failed to log manual status change");
    }

    if updated.status == ShortStatus::Published {
        notify_published(state.invalidator.as_ref(), MANUAL_PUBLISHED_EVENT, id).await;
    }

    tracing::info!(
        short.id = %id,
        from = %current.status,
        to = %updated.status,
        "Short status updated"
    );

    Ok(Json(updated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_query_page_bounds() {
        let query: ListQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.page(), (20, 0));

        let query: ListQuery =
            serde_json::from_str(r#"{"limit": 500, "offset": -3, "status": "pending_review"}"#)
                .unwrap();
        assert_eq!(query.page(), (100, 0));
        assert_eq!(query.status, Some(ShortStatus::PendingReview));
    }

    #[test]
    fn test_update_body_rejects_unknown_status() {
        assert!(serde_json::from_str::<UpdateStatusBody>(r#"{"status": "archived"}"#).is_err());
        let body: UpdateStatusBody = serde_json::from_str(r#"{"status": "published"}"#).unwrap();
        assert_eq!(body.status, ShortStatus::Published);
    }
}
