//! In-process store used by tests and by local runs without PostgreSQL.
//! Mirrors the constraints of `schema/init.sql`, including the unique
//! daily slot.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Store, StoreError, StoreResult};
use crate::models::{
    GenerationLogEntry, LogFilter, NewGenerationLog, NewShort, Report, Short, ShortStatus,
    StatusUpdate,
};

#[derive(Default)]
pub struct MemoryStore {
    reports: RwLock<Vec<Report>>,
    shorts: RwLock<Vec<Short>>,
    logs: RwLock<Vec<GenerationLogEntry>>,
    fail_short_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reports(reports: Vec<Report>) -> Self {
        Self {
            reports: RwLock::new(reports),
            ..Self::default()
        }
    }

    pub async fn add_report(&self, report: Report) {
        self.reports.write().await.push(report);
    }

    /// Makes every subsequent short insert fail with a backend error.
    pub fn fail_short_writes(&self, fail: bool) {
        self.fail_short_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn shorts(&self) -> Vec<Short> {
        self.shorts.read().await.clone()
    }

    pub async fn logs(&self) -> Vec<GenerationLogEntry> {
        self.logs.read().await.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn latest_reports(&self, limit: usize) -> StoreResult<Vec<Report>> {
        let mut reports = self.reports.read().await.clone();
        reports.sort_by(|a, b| {
            b.report_date
                .cmp(&a.report_date)
                .then(b.created_at.cmp(&a.created_at))
        });
        reports.truncate(limit);
        Ok(reports)
    }

    async fn reports_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Report>> {
        let mut reports: Vec<Report> = self
            .reports
            .read()
            .await
            .iter()
            .filter(|r| ids.contains(&r.id))
            .cloned()
            .collect();
        reports.sort_by(|a, b| b.report_date.cmp(&a.report_date));
        Ok(reports)
    }

    async fn short_created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Option<Short>> {
        Ok(self
            .shorts
            .read()
            .await
            .iter()
            .filter(|s| s.created_at >= start && s.created_at < end)
            .min_by_key(|s| s.created_at)
            .cloned())
    }

    async fn insert_short(&self, short: &NewShort) -> StoreResult<Short> {
        if self.fail_short_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("short insert rejected".to_string()));
        }

        let mut shorts = self.shorts.write().await;
        if let Some(slot) = short.daily_slot
            && shorts.iter().any(|s| s.daily_slot == Some(slot))
        {
            return Err(StoreError::DuplicateDailySlot(slot));
        }

        let now = Utc::now();
        let stored = Short {
            id: Uuid::new_v4(),
            title: short.title.clone(),
            body_md: short.body_md.clone(),
            tags: short.tags.clone(),
            status: short.status,
            pii_risk_score: short.pii_risk_score,
            source_report_ids: short.source_report_ids.clone(),
            daily_slot: short.daily_slot,
            created_at: now,
            published_at: short.published_at,
            updated_at: now,
        };
        shorts.push(stored.clone());
        Ok(stored)
    }

    async fn get_short(&self, id: Uuid) -> StoreResult<Option<Short>> {
        Ok(self.shorts.read().await.iter().find(|s| s.id == id).cloned())
    }

    async fn list_shorts(
        &self,
        status: Option<ShortStatus>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Short>> {
        let mut shorts: Vec<Short> = self
            .shorts
            .read()
            .await
            .iter()
            .filter(|s| status.is_none_or(|st| s.status == st))
            .cloned()
            .collect();
        shorts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(shorts
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn update_short_status(
        &self,
        id: Uuid,
        update: &StatusUpdate,
    ) -> StoreResult<Option<Short>> {
        let mut shorts = self.shorts.write().await;
        let Some(short) = shorts.iter_mut().find(|s| s.id == id) else {
            return Ok(None);
        };
        short.status = update.status;
        if update.published_at.is_some() {
            short.published_at = update.published_at;
        }
        short.updated_at = Utc::now();
        Ok(Some(short.clone()))
    }

    async fn insert_generation_log(
        &self,
        entry: &NewGenerationLog,
    ) -> StoreResult<GenerationLogEntry> {
        let stored = GenerationLogEntry {
            id: Uuid::new_v4(),
            short_id: entry.short_id,
            stage: entry.stage,
            status: entry.status,
            elapsed_ms: entry.elapsed_ms,
            model_name: entry.model_name.clone(),
            input_data: entry.input_data.clone(),
            output_data: entry.output_data.clone(),
            error_message: entry.error_message.clone(),
            metadata: entry.metadata.clone(),
            created_at: Utc::now(),
        };
        self.logs.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn list_generation_logs(
        &self,
        filter: &LogFilter,
    ) -> StoreResult<Vec<GenerationLogEntry>> {
        let mut logs: Vec<GenerationLogEntry> = self
            .logs
            .read()
            .await
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        logs.reverse();
        logs.truncate(LogFilter::MAX_ENTRIES as usize);
        Ok(logs)
    }
}
