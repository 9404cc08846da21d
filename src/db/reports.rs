use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Report;

#[tracing::instrument(name = "db.daily_reports.latest", skip(pool))]
pub async fn latest_reports(pool: &PgPool, limit: i64) -> Result<Vec<Report>, sqlx::Error> {
    sqlx::query_as::<_, Report>(
        "SELECT id, title, content, report_date, created_at \
         FROM daily_reports \
         ORDER BY report_date DESC, created_at DESC \
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}

#[tracing::instrument(name = "db.daily_reports.by_ids", skip(pool), fields(report_count = ids.len()))]
pub async fn reports_by_ids(pool: &PgPool, ids: &[Uuid]) -> Result<Vec<Report>, sqlx::Error> {
    sqlx::query_as::<_, Report>(
        "SELECT id, title, content, report_date, created_at \
         FROM daily_reports \
         WHERE id = ANY($1) \
         ORDER BY report_date DESC, created_at DESC",
    )
    .bind(ids)
    .fetch_all(pool)
    .await
}
