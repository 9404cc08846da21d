pub mod generation_logs;
pub mod memory;
pub mod pool;
pub mod reports;
pub mod shorts;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    GenerationLogEntry, LogFilter, NewGenerationLog, NewShort, Report, Short, ShortStatus,
    StatusUpdate,
};

pub use memory::MemoryStore;
pub use pool::create_pool;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("a daily short already exists for {0}")]
    DuplicateDailySlot(NaiveDate),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Every read and write the pipeline and the moderation surface make
/// against the record store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Most recent reports ordered by report date, newest first.
    async fn latest_reports(&self, limit: usize) -> StoreResult<Vec<Report>>;

    async fn reports_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Report>>;

    /// A short created in `[start, end)`, if any.
    async fn short_created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Option<Short>>;

    async fn insert_short(&self, short: &NewShort) -> StoreResult<Short>;

    async fn get_short(&self, id: Uuid) -> StoreResult<Option<Short>>;

    async fn list_shorts(
        &self,
        status: Option<ShortStatus>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Short>>;

    async fn update_short_status(
        &self,
        id: Uuid,
        update: &StatusUpdate,
    ) -> StoreResult<Option<Short>>;

    async fn insert_generation_log(
        &self,
        entry: &NewGenerationLog,
    ) -> StoreResult<GenerationLogEntry>;

    async fn list_generation_logs(&self, filter: &LogFilter)
    -> StoreResult<Vec<GenerationLogEntry>>;
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn latest_reports(&self, limit: usize) -> StoreResult<Vec<Report>> {
        Ok(reports::latest_reports(&self.pool, limit as i64).await?)
    }

    async fn reports_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Report>> {
        Ok(reports::reports_by_ids(&self.pool, ids).await?)
    }

    async fn short_created_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Option<Short>> {
        shorts::find_created_between(&self.pool, start, end).await
    }

    async fn insert_short(&self, short: &NewShort) -> StoreResult<Short> {
        shorts::insert_short(&self.pool, short).await
    }

    async fn get_short(&self, id: Uuid) -> StoreResult<Option<Short>> {
        shorts::get_short(&self.pool, id).await
    }

    async fn list_shorts(
        &self,
        status: Option<ShortStatus>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Short>> {
        shorts::list_shorts(&self.pool, status, limit, offset).await
    }

    async fn update_short_status(
        &self,
        id: Uuid,
        update: &StatusUpdate,
    ) -> StoreResult<Option<Short>> {
        shorts::update_status(&self.pool, id, update).await
    }

    async fn insert_generation_log(
        &self,
        entry: &NewGenerationLog,
    ) -> StoreResult<GenerationLogEntry> {
        generation_logs::insert_log(&self.pool, entry).await
    }

    async fn list_generation_logs(
        &self,
        filter: &LogFilter,
    ) -> StoreResult<Vec<GenerationLogEntry>> {
        generation_logs::list_logs(&self.pool, filter).await
    }
}
