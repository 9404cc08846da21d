use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Sanitize,
    Draft,
    Audit,
    Publish,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Sanitize => "sanitize",
            Stage::Draft => "draft",
            Stage::Audit => "audit",
            Stage::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sanitize" => Ok(Stage::Sanitize),
            "draft" => Ok(Stage::Draft),
            "audit" => Ok(Stage::Audit),
            "publish" => Ok(Stage::Publish),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Success,
    Error,
    Retry,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Success => "success",
            LogStatus::Error => "error",
            LogStatus::Retry => "retry",
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(LogStatus::Success),
            "error" => Ok(LogStatus::Error),
            "retry" => Ok(LogStatus::Retry),
            other => Err(format!("unknown log status: {other}")),
        }
    }
}

/// Append-only record of one stage invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationLogEntry {
    pub id: Uuid,
    pub short_id: Option<Uuid>,
    pub stage: Stage,
    pub status: LogStatus,
    pub elapsed_ms: i64,
    pub model_name: Option<String>,
    pub input_data: Option<serde_json::Value>,
    pub output_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewGenerationLog {
    pub short_id: Option<Uuid>,
    pub stage: Stage,
    pub status: LogStatus,
    pub elapsed_ms: i64,
    pub model_name: Option<String>,
    pub input_data: Option<serde_json::Value>,
    pub output_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl NewGenerationLog {
    pub fn new(stage: Stage, status: LogStatus) -> Self {
        Self {
            short_id: None,
            stage,
            status,
            elapsed_ms: 0,
            model_name: None,
            input_data: None,
            output_data: None,
            error_message: None,
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LogFilter {
    pub short_id: Option<Uuid>,
    pub stage: Option<Stage>,
    pub status: Option<LogStatus>,
}

impl LogFilter {
    pub const MAX_ENTRIES: i64 = 100;

    pub fn for_short(short_id: Uuid) -> Self {
        Self {
            short_id: Some(short_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, entry: &GenerationLogEntry) -> bool {
        self.short_id.is_none_or(|id| entry.short_id == Some(id))
            && self.stage.is_none_or(|stage| entry.stage == stage)
            && self.status.is_none_or(|status| entry.status == status)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageCounts {
    pub sanitize: usize,
    pub draft: usize,
    pub audit: usize,
    pub publish: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogSummary {
    pub total: usize,
    pub success: usize,
    pub error: usize,
    pub retry: usize,
    pub stages: StageCounts,
    pub average_elapsed_ms: i64,
}

impl LogSummary {
    pub fn from_entries(entries: &[GenerationLogEntry]) -> Self {
        let mut summary = LogSummary {
            total: entries.len(),
            ..Self::default()
        };

        let mut elapsed_total: i64 = 0;
        for entry in entries {
            match entry.status {
                LogStatus::Success => summary.success += 1,
                LogStatus::Error => summary.error += 1,
                LogStatus::Retry => summary.retry += 1,
            }
            match entry.stage {
                Stage::Sanitize => summary.stages.sanitize += 1,
                Stage::Draft => summary.stages.draft += 1,
                Stage::Audit => summary.stages.audit += 1,
                Stage::Publish => summary.stages.publish += 1,
            }
            elapsed_total += entry.elapsed_ms;
        }

        if !entries.is_empty() {
            let avg = elapsed_total as f64 / entries.len() as f64;
            summary.average_elapsed_ms = avg.round() as i64;
        }

        summary
    }
}
