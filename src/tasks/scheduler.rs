use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{interval, sleep, Duration};
use tokio_util::task::TaskTracker;
use tracing::Instrument;
use uuid::Uuid;

use crate::core::state::AppState;
use crate::services::conversion_polling::ConversionPoller;
use crate::tasks::conversions;

const CLAIM_IDLE_DELAY: Duration = Duration::from_secs(2);
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(300);

pub(crate) async fn run(state: AppState) -> Result<()> {
    let poller = conversions::build_poller(&state);
    let tracker = TaskTracker::new();
    let worker_id = format!("worker-{}", Uuid::new_v4());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tracing::info!(
        worker_id,
        pool_workers = poller.pool().workers(),
        "Conversion worker started"
    );

    let handles = vec![
        tokio::spawn(claim_loop(
            state.clone(),
            poller.clone(),
            tracker.clone(),
            worker_id.clone(),
            shutdown_rx.clone(),
        )),
        tokio::spawn(maintenance_loop(state.clone(), shutdown_rx.clone())),
    ];

    crate::core::shutdown::shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to background tasks");
    }

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task join failed");
        }
    }

    // Cancels every poll; each task then requeues its record before exiting.
    tracker.close();
    let drained = poller.pool().shutdown(state.settings().polling().shutdown_grace).await;
    tracker.wait().await;
    tracing::info!(drained, "Conversion worker stopped");

    Ok(())
}

async fn claim_loop(
    state: AppState,
    poller: ConversionPoller,
    tracker: TaskTracker,
    worker_id: String,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        match conversions::claim_next_task(state.db()).await {
            Ok(Some(task)) => {
                let span = tracing::info_span!(
                    "conversion_task",
                    task_id = %task.id,
                    job_kind = task.job_kind.as_str(),
                    external_ref = %task.external_ref
                );
                let poller = poller.clone();
                let redis = state.redis().clone();
                let worker_id = worker_id.clone();
                tracker.spawn(
                    async move {
                        let task_id = task.id.clone();
                        match conversions::process_task(&poller, &redis, &worker_id, task).await {
                            Ok(outcome) => {
                                tracing::debug!(outcome = outcome.as_str(), "Task finished");
                            }
                            Err(err) => tracing::error!(
                                task_id,
                                error = %err,
                                "Failed to record conversion outcome"
                            ),
                        }
                    }
                    .instrument(span),
                );
                continue;
            }
            Ok(None) => {}
            Err(err) => tracing::error!(error = %err, "Failed to claim conversion task"),
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(CLAIM_IDLE_DELAY) => {}
        }
    }
}

async fn maintenance_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let mut tick = interval(MAINTENANCE_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = conversions::recover_stale_tasks(&state).await {
                    tracing::error!(error = %err, "recover_stale_tasks failed");
                }
            }
        }
    }
}
