use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::db::types::ConversionJobKind;
use crate::services::task_store::TaskStore;
use crate::tasks::polling::{PollCanceller, ProgressReporter};

/// Writes "`label`... (attempt k/N)" onto the task record before each attempt.
///
/// Once the record has left `IN_PROGRESS` (recovered as stale, or resubmitted)
/// the poll is cancelled before the attempt reaches the provider.
pub(crate) struct TaskProgressReporter {
    store: Arc<dyn TaskStore>,
    task_id: String,
    job_kind: ConversionJobKind,
    canceller: PollCanceller,
}

impl TaskProgressReporter {
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        task_id: String,
        job_kind: ConversionJobKind,
        canceller: PollCanceller,
    ) -> Self {
        Self { store, task_id, job_kind, canceller }
    }
}

pub(crate) fn progress_message(
    job_kind: ConversionJobKind,
    attempt: u32,
    max_attempts: u32,
) -> String {
    format!("{}... (attempt {}/{})", job_kind.progress_label(), attempt, max_attempts)
}

pub(crate) fn completed_message(job_kind: ConversionJobKind) -> String {
    format!("{} finished", job_kind.progress_label())
}

pub(crate) fn exhausted_message(job_kind: ConversionJobKind, max_attempts: u32) -> String {
    format!("{} timed out after {} attempts", job_kind.progress_label(), max_attempts)
}

#[async_trait]
impl ProgressReporter for TaskProgressReporter {
    async fn report(&self, attempt: u32, max_attempts: u32) -> Result<()> {
        metrics::counter!("conversion_poll_attempts_total", "job_kind" => self.job_kind.as_str())
            .increment(1);

        let message = progress_message(self.job_kind, attempt, max_attempts);
        let updated = self.store.update_progress(&self.task_id, &message, attempt).await?;
        if !updated && !self.canceller.is_cancelled() {
            tracing::info!(
                task_id = %self.task_id,
                attempt,
                "Task is no longer in progress; cancelling poll"
            );
            self.canceller.cancel();
        }
        Ok(())
    }
}
