use std::time::{Duration, Instant};

use sqlx::PgPool;

/// Round-trip time of a trivial query.
pub(crate) async fn ping(pool: &PgPool) -> Result<Duration, sqlx::Error> {
    let started = Instant::now();
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(started.elapsed())
}
