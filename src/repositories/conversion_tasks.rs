use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::ConversionTask;
use crate::db::types::{ConversionJobKind, ConversionTaskStatus};

#[derive(Debug, Clone)]
pub(crate) struct NewConversionTask<'a> {
    pub(crate) id: &'a str,
    pub(crate) job_kind: ConversionJobKind,
    pub(crate) external_ref: &'a str,
    pub(crate) owner_scope: &'a str,
    pub(crate) status_message: &'a str,
}

pub(crate) async fn create(
    pool: &PgPool,
    task: NewConversionTask<'_>,
    now: PrimitiveDateTime,
) -> Result<ConversionTask, sqlx::Error> {
    sqlx::query_as::<_, ConversionTask>(
        "INSERT INTO conversion_tasks (
            id, job_kind, external_ref, owner_scope, status, result_payload, status_message,
            attempts_made, available_at, created_at, updated_at
         ) VALUES ($1,$2,$3,$4,$5,NULL,$6,0,$7,$7,$7)
         RETURNING id, job_kind, external_ref, owner_scope, status, result_payload, status_message,
                   attempts_made, created_at, updated_at",
    )
    .bind(task.id)
    .bind(task.job_kind)
    .bind(task.external_ref)
    .bind(task.owner_scope)
    .bind(ConversionTaskStatus::Init)
    .bind(task.status_message)
    .bind(now)
    .fetch_one(pool)
    .await
}

pub(crate) async fn find_by_id_for_owner(
    pool: &PgPool,
    owner_scope: &str,
    id: &str,
) -> Result<Option<ConversionTask>, sqlx::Error> {
    sqlx::query_as::<_, ConversionTask>(
        "SELECT id, job_kind, external_ref, owner_scope, status, result_payload, status_message,
                attempts_made, created_at, updated_at
         FROM conversion_tasks
         WHERE id = $1
           AND owner_scope = $2",
    )
    .bind(id)
    .bind(owner_scope)
    .fetch_optional(pool)
    .await
}

/// Non-terminal record already tracking this vendor job for the owner, if any.
pub(crate) async fn find_live_by_external_ref(
    pool: &PgPool,
    owner_scope: &str,
    job_kind: ConversionJobKind,
    external_ref: &str,
) -> Result<Option<ConversionTask>, sqlx::Error> {
    sqlx::query_as::<_, ConversionTask>(
        "SELECT id, job_kind, external_ref, owner_scope, status, result_payload, status_message,
                attempts_made, created_at, updated_at
         FROM conversion_tasks
         WHERE owner_scope = $1
           AND job_kind = $2
           AND external_ref = $3
           AND status IN ($4, $5)
         ORDER BY created_at DESC
         LIMIT 1",
    )
    .bind(owner_scope)
    .bind(job_kind)
    .bind(external_ref)
    .bind(ConversionTaskStatus::Init)
    .bind(ConversionTaskStatus::InProgress)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn update_progress(
    pool: &PgPool,
    id: &str,
    status_message: &str,
    attempts_made: i32,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE conversion_tasks
         SET status_message = $1,
             attempts_made = $2,
             updated_at = $3
         WHERE id = $4
           AND status = $5",
    )
    .bind(status_message)
    .bind(attempts_made)
    .bind(now)
    .bind(id)
    .bind(ConversionTaskStatus::InProgress)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn claim_next(
    pool: &PgPool,
    now: PrimitiveDateTime,
) -> Result<Option<ConversionTask>, sqlx::Error> {
    sqlx::query_as::<_, ConversionTask>(
        "WITH candidate AS (
            SELECT id
            FROM conversion_tasks
            WHERE status = $1
              AND available_at <= $4
            ORDER BY created_at
            FOR UPDATE SKIP LOCKED
            LIMIT 1
        )
        UPDATE conversion_tasks
        SET status = $2,
            status_message = $3,
            attempts_made = 0,
            updated_at = $4
        FROM candidate
        WHERE conversion_tasks.id = candidate.id
        RETURNING conversion_tasks.id, conversion_tasks.job_kind, conversion_tasks.external_ref,
                  conversion_tasks.owner_scope, conversion_tasks.status,
                  conversion_tasks.result_payload, conversion_tasks.status_message,
                  conversion_tasks.attempts_made, conversion_tasks.created_at,
                  conversion_tasks.updated_at",
    )
    .bind(ConversionTaskStatus::Init)
    .bind(ConversionTaskStatus::InProgress)
    .bind("Waiting for the first polling attempt")
    .bind(now)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn mark_completed(
    pool: &PgPool,
    id: &str,
    result_payload: &str,
    status_message: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE conversion_tasks
         SET status = $1,
             result_payload = $2,
             status_message = $3,
             updated_at = $4
         WHERE id = $5
           AND status = $6",
    )
    .bind(ConversionTaskStatus::Completed)
    .bind(result_payload)
    .bind(status_message)
    .bind(now)
    .bind(id)
    .bind(ConversionTaskStatus::InProgress)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn mark_failed(
    pool: &PgPool,
    id: &str,
    status_message: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE conversion_tasks
         SET status = $1,
             status_message = $2,
             updated_at = $3
         WHERE id = $4
           AND status = $5",
    )
    .bind(ConversionTaskStatus::Failed)
    .bind(status_message)
    .bind(now)
    .bind(id)
    .bind(ConversionTaskStatus::InProgress)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Hands a poll back to the claim queue; it is not claimable before `available_at`.
pub(crate) async fn requeue(
    pool: &PgPool,
    id: &str,
    status_message: &str,
    available_at: PrimitiveDateTime,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE conversion_tasks
         SET status = $1,
             status_message = $2,
             available_at = $3,
             updated_at = $4
         WHERE id = $5
           AND status = $6",
    )
    .bind(ConversionTaskStatus::Init)
    .bind(status_message)
    .bind(available_at)
    .bind(now)
    .bind(id)
    .bind(ConversionTaskStatus::InProgress)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Explicit resubmission: the only transition out of a terminal status.
pub(crate) async fn resubmit(
    pool: &PgPool,
    owner_scope: &str,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<Option<ConversionTask>, sqlx::Error> {
    sqlx::query_as::<_, ConversionTask>(
        "UPDATE conversion_tasks
         SET status = $1,
             status_message = $2,
             attempts_made = 0,
             available_at = $3,
             updated_at = $3
         WHERE id = $4
           AND owner_scope = $5
           AND status IN ($6, $7)
         RETURNING id, job_kind, external_ref, owner_scope, status, result_payload, status_message,
                   attempts_made, created_at, updated_at",
    )
    .bind(ConversionTaskStatus::Init)
    .bind("Resubmitted")
    .bind(now)
    .bind(id)
    .bind(owner_scope)
    .bind(ConversionTaskStatus::Completed)
    .bind(ConversionTaskStatus::Failed)
    .fetch_optional(pool)
    .await
}

/// Returns in-progress records nobody touched since `cutoff` to the queue.
pub(crate) async fn recover_stale(
    pool: &PgPool,
    cutoff: PrimitiveDateTime,
    now: PrimitiveDateTime,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE conversion_tasks
         SET status = $1,
             status_message = $2,
             available_at = $3,
             updated_at = $3
         WHERE status = $4
           AND updated_at < $5",
    )
    .bind(ConversionTaskStatus::Init)
    .bind("Polling stalled; queued to resume")
    .bind(now)
    .bind(ConversionTaskStatus::InProgress)
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::core::time::primitive_now_utc;
    use crate::test_support;

    async fn insert(
        pool: &PgPool,
        id: &str,
        job_kind: ConversionJobKind,
        owner_scope: &str,
        created_at: PrimitiveDateTime,
    ) -> ConversionTask {
        create(
            pool,
            NewConversionTask {
                id,
                job_kind,
                external_ref: &format!("ref-{id}"),
                owner_scope,
                status_message: "Queued for polling",
            },
            created_at,
        )
        .await
        .expect("create task")
    }

    async fn load(pool: &PgPool, id: &str) -> ConversionTask {
        find_by_id_for_owner(pool, "course-1", id).await.expect("load task").expect("task exists")
    }

    #[tokio::test]
    async fn claim_takes_oldest_queued_task_and_skips_locked_rows() {
        let Some(ctx) = test_support::setup_test_context().await else { return };
        let db = ctx.state.db();
        let now = primitive_now_utc();
        insert(db, "a", ConversionJobKind::PdfToQuestions, "course-1", now - Duration::minutes(2))
            .await;
        insert(db, "b", ConversionJobKind::AudioToQuestions, "course-1", now - Duration::minutes(1))
            .await;

        let mut tx = db.begin().await.expect("begin");
        sqlx::query("SELECT id FROM conversion_tasks WHERE id = $1 FOR UPDATE")
            .bind("a")
            .execute(&mut *tx)
            .await
            .expect("lock row");

        let claimed = claim_next(db, now).await.expect("claim").expect("claimable task");
        assert_eq!(claimed.id, "b");
        assert_eq!(claimed.status, ConversionTaskStatus::InProgress);
        assert_eq!(claimed.status_message, "Waiting for the first polling attempt");
        assert_eq!(claimed.attempts_made, 0);

        tx.rollback().await.expect("rollback");
        let claimed = claim_next(db, now).await.expect("claim").expect("claimable task");
        assert_eq!(claimed.id, "a");
        assert!(claim_next(db, now).await.expect("claim").is_none());
    }

    #[tokio::test]
    async fn writes_only_apply_while_in_progress() {
        let Some(ctx) = test_support::setup_test_context().await else { return };
        let db = ctx.state.db();
        let now = primitive_now_utc();
        insert(db, "a", ConversionJobKind::PdfToQuestions, "course-1", now).await;

        assert!(!update_progress(db, "a", "attempt 1", 1, now).await.expect("progress"));
        assert!(!mark_completed(db, "a", "<p>x</p>", "done", now).await.expect("complete"));
        assert!(!mark_failed(db, "a", "boom", now).await.expect("fail"));
        assert!(!requeue(db, "a", "again", now, now).await.expect("requeue"));
        assert_eq!(load(db, "a").await.status, ConversionTaskStatus::Init);

        claim_next(db, now).await.expect("claim").expect("claimable task");
        assert!(update_progress(db, "a", "attempt 1", 1, now).await.expect("progress"));
        assert!(mark_completed(db, "a", "<p>x</p>", "done", now).await.expect("complete"));
        assert!(!mark_failed(db, "a", "boom", now).await.expect("fail"));
        assert!(!requeue(db, "a", "again", now, now).await.expect("requeue"));

        let stored = load(db, "a").await;
        assert_eq!(stored.status, ConversionTaskStatus::Completed);
        assert_eq!(stored.result_payload.as_deref(), Some("<p>x</p>"));
        assert_eq!(stored.status_message, "done");
        assert_eq!(stored.attempts_made, 1);
    }

    #[tokio::test]
    async fn requeued_task_is_not_claimed_before_it_is_available() {
        let Some(ctx) = test_support::setup_test_context().await else { return };
        let db = ctx.state.db();
        let now = primitive_now_utc();
        insert(db, "a", ConversionJobKind::AudioTimedTranscript, "course-1", now).await;
        claim_next(db, now).await.expect("claim").expect("claimable task");

        let retry_at = now + Duration::seconds(30);
        assert!(requeue(db, "a", "Waiting for lease", retry_at, now).await.expect("requeue"));
        assert_eq!(load(db, "a").await.status, ConversionTaskStatus::Init);

        assert!(claim_next(db, now).await.expect("claim").is_none());
        let claimed = claim_next(db, retry_at).await.expect("claim").expect("claimable task");
        assert_eq!(claimed.id, "a");
    }

    #[tokio::test]
    async fn resubmit_only_restarts_terminal_tasks_of_the_owner() {
        let Some(ctx) = test_support::setup_test_context().await else { return };
        let db = ctx.state.db();
        let now = primitive_now_utc();
        insert(db, "a", ConversionJobKind::PdfToQuestions, "course-1", now).await;

        assert!(resubmit(db, "course-1", "a", now).await.expect("resubmit").is_none());
        claim_next(db, now).await.expect("claim").expect("claimable task");
        update_progress(db, "a", "attempt 4", 4, now).await.expect("progress");
        assert!(resubmit(db, "course-1", "a", now).await.expect("resubmit").is_none());

        mark_failed(db, "a", "timed out", now).await.expect("fail");
        assert!(resubmit(db, "course-2", "a", now).await.expect("resubmit").is_none());

        let restarted = resubmit(db, "course-1", "a", now).await.expect("resubmit").expect("task");
        assert_eq!(restarted.status, ConversionTaskStatus::Init);
        assert_eq!(restarted.status_message, "Resubmitted");
        assert_eq!(restarted.attempts_made, 0);
        let claimed = claim_next(db, now).await.expect("claim").expect("claimable task");
        assert_eq!(claimed.id, "a");
    }

    #[tokio::test]
    async fn stale_recovery_only_touches_tasks_older_than_cutoff() {
        let Some(ctx) = test_support::setup_test_context().await else { return };
        let db = ctx.state.db();
        let now = primitive_now_utc();
        let kind = ConversionJobKind::PdfToQuestions;
        insert(db, "old", kind, "course-1", now - Duration::minutes(30)).await;
        insert(db, "new", kind, "course-1", now - Duration::minutes(25)).await;
        claim_next(db, now - Duration::minutes(20)).await.expect("claim").expect("old task");
        claim_next(db, now).await.expect("claim").expect("new task");

        let recovered =
            recover_stale(db, now - Duration::minutes(15), now).await.expect("recover");

        assert_eq!(recovered, 1);
        let old = load(db, "old").await;
        assert_eq!(old.status, ConversionTaskStatus::Init);
        assert_eq!(old.status_message, "Polling stalled; queued to resume");
        assert_eq!(load(db, "new").await.status, ConversionTaskStatus::InProgress);
    }
}
