use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::db::{Store, StoreError};
use crate::error::PipelineError;
use crate::llm::LlmClient;
use crate::models::{Report, Short, ShortStatus};
use crate::revalidate::Invalidator;

use super::PipelineSettings;
use super::{audit, draft, publish, sanitize};

pub const ALREADY_EXISTS_MESSAGE: &str = "Today's short already exists";
pub const NO_REPORTS_MESSAGE: &str = "No daily reports available for generation";
pub const GENERATED_MESSAGE: &str = "Daily short generated successfully";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GenerationOutcome {
    pub short_id: Uuid,
    pub status: ShortStatus,
}

impl From<&Short> for GenerationOutcome {
    fn from(short: &Short) -> Self {
        Self {
            short_id: short.id,
            status: short.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyOutcome {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ShortStatus>,
}

impl DailyOutcome {
    fn existing(short: &Short) -> Self {
        Self {
            message: ALREADY_EXISTS_MESSAGE.to_string(),
            short_id: Some(short.id),
            status: Some(short.status),
        }
    }

    fn no_reports() -> Self {
        Self {
            message: NO_REPORTS_MESSAGE.to_string(),
            short_id: None,
            status: None,
        }
    }

    fn generated(short: &Short) -> Self {
        Self {
            message: GENERATED_MESSAGE.to_string(),
            short_id: Some(short.id),
            status: Some(short.status),
        }
    }

    pub fn is_new(&self) -> bool {
        self.message == GENERATED_MESSAGE
    }
}

/// One calendar day in some local time zone, as a half-open UTC range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub slot: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    pub fn containing<Tz: TimeZone>(instant: &DateTime<Tz>) -> Self {
        let tz = instant.timezone();
        let slot = instant.date_naive();
        let start = local_midnight(&tz, slot);
        let end = slot
            .succ_opt()
            .map(|next| local_midnight(&tz, next))
            .unwrap_or(start + TimeDelta::days(1));

        Self { slot, start, end }
    }

    /// Today on the host's local clock.
    pub fn today() -> Self {
        Self::containing(&Local::now())
    }
}

fn local_midnight<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        // Midnight skipped by a DST jump; the UTC reading is close enough.
        .unwrap_or_else(|| naive.and_utc())
}

fn is_duplicate_daily_slot(err: &PipelineError) -> bool {
    matches!(
        err,
        PipelineError::Persistence {
            source: StoreError::DuplicateDailySlot(_),
            ..
        }
    )
}

#[derive(Clone)]
pub struct ShortsPipeline {
    store: Arc<dyn Store>,
    llm: Arc<LlmClient>,
    invalidator: Arc<dyn Invalidator>,
    settings: PipelineSettings,
}

impl ShortsPipeline {
    pub fn new(
        store: Arc<dyn Store>,
        llm: Arc<LlmClient>,
        invalidator: Arc<dyn Invalidator>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            llm,
            invalidator,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Runs every stage in order. The first failure stops the run and is
    /// returned as is.
    pub async fn generate_from_reports(
        &self,
        reports: &[Report],
    ) -> Result<GenerationOutcome, PipelineError> {
        let short = self.run(reports, None).await?;
        Ok(GenerationOutcome::from(&short))
    }

    #[tracing::instrument(
        name = "pipeline short",
        skip_all,
        fields(
            pipeline.report_count = reports.len(),
            pipeline.daily_slot = ?daily_slot,
            short.id,
            short.status,
            pipeline.duration_ms,
        )
    )]
    async fn run(
        &self,
        reports: &[Report],
        daily_slot: Option<NaiveDate>,
    ) -> Result<Short, PipelineError> {
        let start = std::time::Instant::now();
        let store = self.store.as_ref();
        let model = self.settings.model.as_str();

        let summaries = sanitize::sanitize(&self.llm, store, model, reports).await?;
        let draft = draft::create_draft(&self.llm, store, model, &summaries).await?;
        let audit = audit::audit_draft(&self.llm, store, model, &draft).await?;

        let source_report_ids: Vec<Uuid> = reports.iter().map(|r| r.id).collect();
        let short = publish::publish_or_queue(
            store,
            self.invalidator.as_ref(),
            &draft,
            &audit,
            &source_report_ids,
            daily_slot,
        )
        .await?;

        let span = tracing::Span::current();
        span.record("short.id", tracing::field::display(short.id));
        span.record("short.status", short.status.as_str());
        span.record("pipeline.duration_ms", start.elapsed().as_millis() as i64);

        Ok(short)
    }

    pub async fn generate_daily_short(&self) -> Result<DailyOutcome, PipelineError> {
        self.generate_daily_short_at(DayWindow::today()).await
    }

    /// Produces at most one short for `window`. An existing short for the
    /// day is returned without calling any stage.
    #[tracing::instrument(
        name = "pipeline daily_short",
        skip(self),
        fields(pipeline.daily_slot = %window.slot)
    )]
    pub async fn generate_daily_short_at(
        &self,
        window: DayWindow,
    ) -> Result<DailyOutcome, PipelineError> {
        if let Some(existing) = self
            .store
            .short_created_between(window.start, window.end)
            .await?
        {
            tracing::info!(short.id = %existing.id, "Short for today already exists, skipping");
            return Ok(DailyOutcome::existing(&existing));
        }

        let reports = self
            .store
            .latest_reports(self.settings.daily_batch_size)
            .await?;
        if reports.is_empty() {
            tracing::info!("No daily reports available, nothing to generate");
            return Ok(DailyOutcome::no_reports());
        }

        match self.run(&reports, Some(window.slot)).await {
            Ok(short) => Ok(DailyOutcome::generated(&short)),
            Err(err) if is_duplicate_daily_slot(&err) => {
                // A concurrent run stored today's short first.
                match self
                    .store
                    .short_created_between(window.start, window.end)
                    .await?
                {
                    Some(existing) => {
                        tracing::info!(
                            short.id = %existing.id,
                            "Concurrent run already produced today's short"
                        );
                        Ok(DailyOutcome::existing(&existing))
                    }
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    #[test]
    fn test_day_window_uses_local_boundaries() {
        let jst = FixedOffset::east_opt(9 * 3600).unwrap();
        let instant = jst.with_ymd_and_hms(2025, 3, 10, 8, 30, 0).unwrap();
        let window = DayWindow::containing(&instant);

        assert_eq!(window.slot, NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
        assert_eq!(
            window.start,
            Utc.with_ymd_and_hms(2025, 3, 9, 15, 0, 0).unwrap()
        );
        assert_eq!(
            window.end,
            Utc.with_ymd_and_hms(2025, 3, 10, 15, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_day_window_contains_its_instant() {
        let instant = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap();
        let window = DayWindow::containing(&instant);
        let utc = instant.with_timezone(&Utc);
        assert!(window.start <= utc && utc < window.end);
        assert_eq!(window.end - window.start, TimeDelta::days(1));
    }

    #[test]
    fn test_duplicate_slot_detection() {
        let dup = PipelineError::Persistence {
            stage: crate::models::Stage::Publish,
            source: StoreError::DuplicateDailySlot(NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()),
        };
        assert!(is_duplicate_daily_slot(&dup));

        let other = PipelineError::Persistence {
            stage: crate::models::Stage::Publish,
            source: StoreError::Backend("down".to_string()),
        };
        assert!(!is_duplicate_daily_slot(&other));
    }

    #[test]
    fn test_daily_outcome_serialization() {
        let json = serde_json::to_value(DailyOutcome::no_reports()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "message": "No daily reports available for generation" })
        );
    }
}
