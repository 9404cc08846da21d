use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A staff daily report. Owned by the record store; the pipeline only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Report {
    pub id: Uuid,
    pub title: Option<String>,
    pub content: String,
    pub report_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl Report {
    pub fn content_chars(&self) -> usize {
        self.content.chars().count()
    }
}
