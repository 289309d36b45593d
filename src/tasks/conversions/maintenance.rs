use anyhow::{Context, Result};

use crate::core::state::AppState;
use crate::core::time::{primitive_before, primitive_now_utc};
use crate::repositories;

/// Requeues in-progress tasks whose worker stopped updating them.
pub(crate) async fn recover_stale_tasks(state: &AppState) -> Result<()> {
    let now = primitive_now_utc();
    let stale_after = state.settings().polling().stale_task_after;
    let cutoff = primitive_before(now, stale_after);

    let recovered = repositories::conversion_tasks::recover_stale(state.db(), cutoff, now)
        .await
        .context("Failed to recover stale conversion tasks")?;

    if recovered > 0 {
        tracing::warn!(
            recovered,
            stale_after_seconds = stale_after.as_secs(),
            "Requeued stale conversion tasks"
        );
        metrics::counter!("conversion_tasks_recovered_total").increment(recovered);
    }

    Ok(())
}
