use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{StoreError, StoreResult};
use crate::models::{NewShort, Short, ShortStatus, StatusUpdate};

const SHORT_COLUMNS: &str = "id, title, body_md, tags, status, pii_risk_score, \
     source_report_ids, daily_slot, created_at, published_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct ShortRow {
    id: Uuid,
    title: String,
    body_md: String,
    tags: Vec<String>,
    status: String,
    pii_risk_score: i32,
    source_report_ids: Vec<Uuid>,
    daily_slot: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ShortRow> for Short {
    type Error = StoreError;

    fn try_from(row: ShortRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<ShortStatus>()
            .map_err(|e| StoreError::Corrupt(format!("short {}: {e}", row.id)))?;

        Ok(Short {
            id: row.id,
            title: row.title,
            body_md: row.body_md,
            tags: row.tags,
            status,
            pii_risk_score: row.pii_risk_score,
            source_report_ids: row.source_report_ids,
            daily_slot: row.daily_slot,
            created_at: row.created_at,
            published_at: row.published_at,
            updated_at: row.updated_at,
        })
    }
}

#[tracing::instrument(name = "db.shorts.insert", skip_all, fields(short.status = %short.status))]
pub async fn insert_short(pool: &PgPool, short: &NewShort) -> StoreResult<Short> {
    let result = sqlx::query_as::<_, ShortRow>(&format!(
        "INSERT INTO shorts \
         (id, title, body_md, tags, status, pii_risk_score, source_report_ids, \
          daily_slot, published_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING {SHORT_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(&short.title)
    .bind(&short.body_md)
    .bind(&short.tags)
    .bind(short.status.as_str())
    .bind(short.pii_risk_score)
    .bind(&short.source_report_ids)
    .bind(short.daily_slot)
    .bind(short.published_at)
    .fetch_one(pool)
    .await;

    match result {
        Ok(row) => row.try_into(),
        Err(e) => Err(map_insert_error(e, short.daily_slot)),
    }
}

fn map_insert_error(err: sqlx::Error, daily_slot: Option<NaiveDate>) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err
        && db_err.is_unique_violation()
        && let Some(slot) = daily_slot
    {
        tracing::warn!(
            daily_slot = %slot,
            constraint = ?db_err.constraint(),
            "Daily slot already taken"
        );
        return StoreError::DuplicateDailySlot(slot);
    }
    StoreError::Database(err)
}

#[tracing::instrument(name = "db.shorts.created_between", skip(pool))]
pub async fn find_created_between(
    pool: &PgPool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> StoreResult<Option<Short>> {
    let row = sqlx::query_as::<_, ShortRow>(&format!(
        "SELECT {SHORT_COLUMNS} FROM shorts \
         WHERE created_at >= $1 AND created_at < $2 \
         ORDER BY created_at ASC \
         LIMIT 1"
    ))
    .bind(start)
    .bind(end)
    .fetch_optional(pool)
    .await?;

    row.map(Short::try_from).transpose()
}

#[tracing::instrument(name = "db.shorts.get", skip(pool))]
pub async fn get_short(pool: &PgPool, id: Uuid) -> StoreResult<Option<Short>> {
    let row = sqlx::query_as::<_, ShortRow>(&format!(
        "SELECT {SHORT_COLUMNS} FROM shorts WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(Short::try_from).transpose()
}

#[tracing::instrument(name = "db.shorts.list", skip(pool))]
pub async fn list_shorts(
    pool: &PgPool,
    status: Option<ShortStatus>,
    limit: i64,
    offset: i64,
) -> StoreResult<Vec<Short>> {
    let rows = sqlx::query_as::<_, ShortRow>(&format!(
        "SELECT {SHORT_COLUMNS} FROM shorts \
         WHERE ($1::text IS NULL OR status = $1) \
         ORDER BY created_at DESC \
         LIMIT $2 OFFSET $3"
    ))
    .bind(status.map(|s| s.as_str()))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Short::try_from).collect()
}

#[tracing::instrument(name = "db.shorts.update_status", skip(pool))]
pub async fn update_status(
    pool: &PgPool,
    id: Uuid,
    update: &StatusUpdate,
) -> StoreResult<Option<Short>> {
    let row = sqlx::query_as::<_, ShortRow>(&format!(
        "UPDATE shorts \
         SET status = $2, \
             published_at = COALESCE($3, published_at), \
             updated_at = NOW() \
         WHERE id = $1 \
         RETURNING {SHORT_COLUMNS}"
    ))
    .bind(id)
    .bind(update.status.as_str())
    .bind(update.published_at)
    .fetch_optional(pool)
    .await?;

    row.map(Short::try_from).transpose()
}
