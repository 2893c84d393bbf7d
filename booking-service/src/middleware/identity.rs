//! Identity extraction.
//!
//! Authentication happens upstream. The gateway in front of this service sets
//! `X-User-ID` and `X-User-Role` for the authenticated caller, and those
//! headers are trusted as-is.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

use crate::models::{Principal, Role};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("Missing X-User-ID header")))?;

        let role: Role = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::AuthError(anyhow::anyhow!("Missing X-User-Role header")))?
            .parse()
            .map_err(|e: String| AppError::AuthError(anyhow::anyhow!(e)))?;

        let span = tracing::Span::current();
        span.record("user_id", user_id);
        span.record("role", role.as_str());

        Ok(Principal::new(user_id.trim(), role))
    }
}
