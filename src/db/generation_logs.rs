use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{StoreError, StoreResult};
use crate::models::{GenerationLogEntry, LogFilter, LogStatus, NewGenerationLog, Stage};

const LOG_COLUMNS: &str = "id, short_id, stage, status, elapsed_ms, model_name, \
     input_data, output_data, error_message, metadata, created_at";

#[derive(Debug, sqlx::FromRow)]
struct LogRow {
    id: Uuid,
    short_id: Option<Uuid>,
    stage: String,
    status: String,
    elapsed_ms: i64,
    model_name: Option<String>,
    input_data: Option<serde_json::Value>,
    output_data: Option<serde_json::Value>,
    error_message: Option<String>,
    metadata: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LogRow> for GenerationLogEntry {
    type Error = StoreError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        let stage = row
            .stage
            .parse::<Stage>()
            .map_err(|e| StoreError::Corrupt(format!("generation log {}: {e}", row.id)))?;
        let status = row
            .status
            .parse::<LogStatus>()
            .map_err(|e| StoreError::Corrupt(format!("generation log {}: {e}", row.id)))?;

        Ok(GenerationLogEntry {
            id: row.id,
            short_id: row.short_id,
            stage,
            status,
            elapsed_ms: row.elapsed_ms,
            model_name: row.model_name,
            input_data: row.input_data,
            output_data: row.output_data,
            error_message: row.error_message,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

#[tracing::instrument(
    name = "db.generation_logs.insert",
    skip_all,
    fields(log.stage = %entry.stage, log.status = %entry.status)
)]
pub async fn insert_log(pool: &PgPool, entry: &NewGenerationLog) -> StoreResult<GenerationLogEntry> {
    let row = sqlx::query_as::<_, LogRow>(&format!(
        "INSERT INTO generation_logs \
         (id, short_id, stage, status, elapsed_ms, model_name, \
          input_data, output_data, error_message, metadata) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         RETURNING {LOG_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(entry.short_id)
    .bind(entry.stage.as_str())
    .bind(entry.status.as_str())
    .bind(entry.elapsed_ms)
    .bind(entry.model_name.as_deref())
    .bind(&entry.input_data)
    .bind(&entry.output_data)
    .bind(entry.error_message.as_deref())
    .bind(&entry.metadata)
    .fetch_one(pool)
    .await?;

    row.try_into()
}

#[tracing::instrument(name = "db.generation_logs.list", skip(pool))]
pub async fn list_logs(pool: &PgPool, filter: &LogFilter) -> StoreResult<Vec<GenerationLogEntry>> {
    let rows = sqlx::query_as::<_, LogRow>(&format!(
        "SELECT {LOG_COLUMNS} FROM generation_logs \
         WHERE ($1::uuid IS NULL OR short_id = $1) \
           AND ($2::text IS NULL OR stage = $2) \
           AND ($3::text IS NULL OR status = $3) \
         ORDER BY created_at DESC \
         LIMIT $4"
    ))
    .bind(filter.short_id)
    .bind(filter.stage.map(|s| s.as_str()))
    .bind(filter.status.map(|s| s.as_str()))
    .bind(LogFilter::MAX_ENTRIES)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(GenerationLogEntry::try_from).collect()
}
