use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::core::config::lease_ttl;
use crate::core::redis::RedisHandle;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::ConversionTask;
use crate::db::types::ConversionJobKind;
use crate::repositories;
use crate::services::conversion_polling::{ConversionPoller, ConversionPollerParts};
use crate::services::conversion_progress::{completed_message, exhausted_message};
use crate::services::inline_images::{AssetStore, InlineImageMaterializer};
use crate::services::task_store::{PgResultCache, PgTaskStore, TaskStore};
use crate::tasks::polling::{PollError, PollPolicy, PollResult, PollerPool};

/// How a claimed task left the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskOutcome {
    Completed,
    Exhausted,
    Failed,
    Requeued,
    Duplicate,
}

impl TaskOutcome {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            TaskOutcome::Completed => "completed",
            TaskOutcome::Exhausted => "exhausted",
            TaskOutcome::Failed => "failed",
            TaskOutcome::Requeued => "requeued",
            TaskOutcome::Duplicate => "duplicate",
        }
    }
}

pub(crate) fn build_poller(state: &AppState) -> ConversionPoller {
    let polling = state.settings().polling().clone();
    let assets =
        state.storage().cloned().map(|storage| Arc::new(storage) as Arc<dyn AssetStore>);

    ConversionPoller::new(
        PollerPool::new(polling.workers),
        polling,
        ConversionPollerParts {
            store: Arc::new(PgTaskStore::new(state.db().clone())),
            cache: Arc::new(PgResultCache::new(state.db().clone())),
            documents: Arc::new(state.datalab().clone()),
            transcripts: Arc::new(state.speech().clone()),
            materializer: InlineImageMaterializer::new(assets),
        },
    )
}

pub(crate) async fn claim_next_task(pool: &PgPool) -> Result<Option<ConversionTask>> {
    repositories::conversion_tasks::claim_next(pool, primitive_now_utc())
        .await
        .context("Failed to claim conversion task")
}

pub(crate) fn lease_key(task: &ConversionTask) -> String {
    format!("conversion-lease:{}:{}", task.job_kind.as_str(), task.external_ref)
}

/// Polls one claimed task to a terminal outcome and records it.
pub(crate) async fn process_task(
    poller: &ConversionPoller,
    redis: &RedisHandle,
    worker_id: &str,
    task: ConversionTask,
) -> Result<TaskOutcome> {
    let policy = poller.policy_for(task.job_kind);
    let key = lease_key(&task);
    let started = Instant::now();

    match redis.try_acquire_lease(&key, worker_id, lease_ttl(policy)).await {
        Ok(true) => {}
        Ok(false) => {
            let outcome = defer_to_lease_holder(poller.store().as_ref(), &task, policy).await?;
            record_outcome(task.job_kind, outcome, started);
            return Ok(outcome);
        }
        Err(err) => {
            tracing::warn!(
                task_id = %task.id,
                error = %err,
                "Failed to take conversion lease; polling without it"
            );
        }
    }

    let result = poll_payload(poller, &task).await;
    let outcome = finalize(poller.store().as_ref(), &task, policy, result).await;

    if let Err(err) = redis.release_lease(&key, worker_id).await {
        tracing::warn!(task_id = %task.id, error = %err, "Failed to release conversion lease");
    }

    let outcome = outcome?;
    record_outcome(task.job_kind, outcome, started);
    Ok(outcome)
}

/// Puts a task back in the queue for one poll interval while another worker holds its lease.
pub(crate) async fn defer_to_lease_holder(
    store: &dyn TaskStore,
    task: &ConversionTask,
    policy: PollPolicy,
) -> Result<TaskOutcome> {
    let requeued = store
        .requeue(&task.id, "Another worker is polling this job; queued to retry", policy.delay())
        .await?;
    tracing::warn!(
        task_id = %task.id,
        external_ref = %task.external_ref,
        requeued,
        "Another worker is already polling this conversion"
    );
    Ok(TaskOutcome::Duplicate)
}

async fn poll_payload(poller: &ConversionPoller, task: &ConversionTask) -> PollResult<String> {
    match task.job_kind {
        ConversionJobKind::PdfToQuestions => poller.poll_document_html(task).await,
        ConversionJobKind::AudioToQuestions => poller.poll_transcript(task).await,
        ConversionJobKind::AudioTimedTranscript => {
            match poller.poll_detailed_transcript(task).await? {
                Some(transcript) => serde_json::to_string(&transcript)
                    .map(Some)
                    .map_err(|err| PollError::Probe(err.into())),
                None => Ok(None),
            }
        }
    }
}

/// Moves the task record to the state matching the poll result.
pub(crate) async fn finalize(
    store: &dyn TaskStore,
    task: &ConversionTask,
    policy: PollPolicy,
    result: PollResult<String>,
) -> Result<TaskOutcome> {
    let label = task.job_kind.progress_label();

    match result {
        Ok(Some(payload)) => {
            store.complete(&task.id, &payload, &completed_message(task.job_kind)).await?;
            tracing::info!(
                task_id = %task.id,
                job_kind = task.job_kind.as_str(),
                "Conversion completed"
            );
            Ok(TaskOutcome::Completed)
        }
        Ok(None) => {
            let message = exhausted_message(task.job_kind, policy.max_attempts());
            store.fail(&task.id, &message).await?;
            tracing::warn!(task_id = %task.id, job_kind = task.job_kind.as_str(), "{message}");
            Ok(TaskOutcome::Exhausted)
        }
        Err(PollError::Probe(err)) => {
            store.fail(&task.id, &format!("{label} failed: {err:#}")).await?;
            tracing::error!(
                task_id = %task.id,
                job_kind = task.job_kind.as_str(),
                error = %err,
                "Conversion failed"
            );
            Ok(TaskOutcome::Failed)
        }
        Err(err @ (PollError::Cancelled | PollError::ShutDown | PollError::Aborted)) => {
            let requeued = store
                .requeue(&task.id, "Polling interrupted; queued to resume", Duration::ZERO)
                .await?;
            tracing::info!(task_id = %task.id, requeued, reason = %err, "Conversion requeued");
            Ok(TaskOutcome::Requeued)
        }
    }
}

fn record_outcome(job_kind: ConversionJobKind, outcome: TaskOutcome, started: Instant) {
    metrics::counter!(
        "conversion_poll_outcomes_total",
        "job_kind" => job_kind.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    metrics::histogram!("conversion_poll_duration_seconds", "job_kind" => job_kind.as_str())
        .record(started.elapsed().as_secs_f64());
}
