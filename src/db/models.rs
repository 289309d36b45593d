use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{ConversionJobKind, ConversionResultKind, ConversionTaskStatus};

/// Durable state of one external conversion job.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct ConversionTask {
    pub(crate) id: String,
    pub(crate) job_kind: ConversionJobKind,
    pub(crate) external_ref: String,
    pub(crate) owner_scope: String,
    pub(crate) status: ConversionTaskStatus,
    pub(crate) result_payload: Option<String>,
    pub(crate) status_message: String,
    pub(crate) attempts_made: i32,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct CachedConversionResult {
    pub(crate) external_ref: String,
    pub(crate) result_kind: ConversionResultKind,
    pub(crate) payload: String,
    pub(crate) created_at: PrimitiveDateTime,
}
