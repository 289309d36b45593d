use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use crate::core::time::primitive_now_utc;
use crate::db::types::ConversionResultKind;
use crate::repositories::{conversion_results, conversion_tasks};

/// Durable record of a conversion job, as seen by the poller and worker.
///
/// Every write only applies while the record is `IN_PROGRESS`; the returned
/// flag says whether it did.
#[async_trait]
pub(crate) trait TaskStore: Send + Sync {
    async fn update_progress(&self, task_id: &str, message: &str, attempt: u32) -> Result<bool>;

    async fn complete(&self, task_id: &str, payload: &str, message: &str) -> Result<bool>;

    async fn fail(&self, task_id: &str, message: &str) -> Result<bool>;

    /// Returns the record to the claim queue once `retry_after` has passed.
    async fn requeue(&self, task_id: &str, message: &str, retry_after: Duration) -> Result<bool>;
}

/// Results of finished conversions keyed by external reference and kind.
#[async_trait]
pub(crate) trait ResultCache: Send + Sync {
    async fn get(&self, external_ref: &str, kind: ConversionResultKind) -> Result<Option<String>>;

    async fn put(&self, external_ref: &str, kind: ConversionResultKind, payload: &str)
        -> Result<()>;
}

#[derive(Clone)]
pub(crate) struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn update_progress(&self, task_id: &str, message: &str, attempt: u32) -> Result<bool> {
        let attempts_made = i32::try_from(attempt).unwrap_or(i32::MAX);
        conversion_tasks::update_progress(
            &self.pool,
            task_id,
            message,
            attempts_made,
            primitive_now_utc(),
        )
        .await
        .context("Failed to update conversion progress")
    }

    async fn complete(&self, task_id: &str, payload: &str, message: &str) -> Result<bool> {
        conversion_tasks::mark_completed(&self.pool, task_id, payload, message, primitive_now_utc())
            .await
            .context("Failed to mark conversion completed")
    }

    async fn fail(&self, task_id: &str, message: &str) -> Result<bool> {
        conversion_tasks::mark_failed(&self.pool, task_id, message, primitive_now_utc())
            .await
            .context("Failed to mark conversion failed")
    }

    async fn requeue(&self, task_id: &str, message: &str, retry_after: Duration) -> Result<bool> {
        let now = primitive_now_utc();
        conversion_tasks::requeue(&self.pool, task_id, message, now + retry_after, now)
            .await
            .context("Failed to requeue conversion")
    }
}

#[derive(Clone)]
pub(crate) struct PgResultCache {
    pool: PgPool,
}

impl PgResultCache {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultCache for PgResultCache {
    async fn get(&self, external_ref: &str, kind: ConversionResultKind) -> Result<Option<String>> {
        let cached = conversion_results::find(&self.pool, external_ref, kind)
            .await
            .context("Failed to read cached conversion result")?;
        Ok(cached.map(|row| row.payload))
    }

    async fn put(
        &self,
        external_ref: &str,
        kind: ConversionResultKind,
        payload: &str,
    ) -> Result<()> {
        let inserted = conversion_results::insert_if_absent(
            &self.pool,
            external_ref,
            kind,
            payload,
            primitive_now_utc(),
        )
        .await
        .context("Failed to store conversion result")?;

        if !inserted {
            tracing::debug!(
                external_ref,
                result_kind = kind.as_str(),
                "Conversion result already cached"
            );
        }
        Ok(())
    }
}
