use axum::{
    Json,
    extract::{Query, State},
    http::HeaderMap,
};
use serde::Serialize;

use crate::AppState;
use crate::error::AppResult;
use crate::models::{GenerationLogEntry, LogFilter, LogSummary};

use super::auth::require_bearer;

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<GenerationLogEntry>,
    pub summary: LogSummary,
}

pub async fn list_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(filter): Query<LogFilter>,
) -> AppResult<Json<LogsResponse>> {
    require_bearer(&headers, state.config.admin_secret.as_deref())?;

    let logs = state.store.list_generation_logs(&filter).await?;
    let summary = LogSummary::from_entries(&logs);

    Ok(Json(LogsResponse { logs, summary }))
}
