use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortStatus {
    Draft,
    PendingReview,
    Published,
}

impl ShortStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShortStatus::Draft => "draft",
            ShortStatus::PendingReview => "pending_review",
            ShortStatus::Published => "published",
        }
    }

    /// Moderation transitions accepted for an existing short. The pipeline
    /// never uses this table; it only creates shorts as pending review or
    /// published.
    pub fn can_transition_to(self, next: ShortStatus) -> bool {
        matches!(
            (self, next),
            (ShortStatus::Draft, ShortStatus::Published)
                | (ShortStatus::PendingReview, ShortStatus::Published)
                | (ShortStatus::Published, ShortStatus::Draft)
        )
    }
}

impl fmt::Display for ShortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown short status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for ShortStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ShortStatus::Draft),
            "pending_review" => Ok(ShortStatus::PendingReview),
            "published" => Ok(ShortStatus::Published),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Short {
    pub id: Uuid,
    pub title: String,
    pub body_md: String,
    pub tags: Vec<String>,
    pub status: ShortStatus,
    pub pii_risk_score: i32,
    pub source_report_ids: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_slot: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload. `daily_slot` is set only for runs started by the daily
/// gate and is unique per calendar day in the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewShort {
    pub title: String,
    pub body_md: String,
    pub tags: Vec<String>,
    pub status: ShortStatus,
    pub pii_risk_score: i32,
    pub source_report_ids: Vec<Uuid>,
    pub daily_slot: Option<NaiveDate>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Status write issued by moderation. A move to `Published` always carries
/// its publish timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusUpdate {
    pub status: ShortStatus,
    pub published_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    pub fn to(status: ShortStatus, now: DateTime<Utc>) -> Self {
        let published_at = (status == ShortStatus::Published).then_some(now);
        Self {
            status,
            published_at,
        }
    }
}
