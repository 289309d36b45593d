use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{request::Parts, HeaderName};

use crate::api::errors::ApiError;

pub(crate) const OWNER_SCOPE_HEADER: HeaderName = HeaderName::from_static("x-owner-scope");

const MAX_OWNER_SCOPE_LEN: usize = 255;

/// Tenant that owns the conversion records touched by a request.
#[derive(Debug, Clone)]
pub(crate) struct OwnerScope(pub(crate) String);

#[async_trait]
impl<S> FromRequestParts<S> for OwnerScope
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let scope = parts
            .headers
            .get(&OWNER_SCOPE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(ApiError::Unauthorized("Missing owner scope"))?;

        if scope.len() > MAX_OWNER_SCOPE_LEN {
            return Err(ApiError::BadRequest("Owner scope is too long".to_string()));
        }

        Ok(OwnerScope(scope.to_string()))
    }
}
