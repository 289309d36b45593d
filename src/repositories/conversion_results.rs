use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::CachedConversionResult;
use crate::db::types::ConversionResultKind;

pub(crate) async fn find(
    pool: &PgPool,
    external_ref: &str,
    result_kind: ConversionResultKind,
) -> Result<Option<CachedConversionResult>, sqlx::Error> {
    sqlx::query_as::<_, CachedConversionResult>(
        "SELECT external_ref, result_kind, payload, created_at
         FROM conversion_results
         WHERE external_ref = $1
           AND result_kind = $2",
    )
    .bind(external_ref)
    .bind(result_kind)
    .fetch_optional(pool)
    .await
}

/// First stored result wins; later writes for the same key are ignored.
pub(crate) async fn insert_if_absent(
    pool: &PgPool,
    external_ref: &str,
    result_kind: ConversionResultKind,
    payload: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO conversion_results (external_ref, result_kind, payload, created_at)
         VALUES ($1,$2,$3,$4)
         ON CONFLICT (external_ref, result_kind) DO NOTHING",
    )
    .bind(external_ref)
    .bind(result_kind)
    .bind(payload)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}
