//! Authenticated-identity extractor.
//!
//! The BFF authenticates the caller and forwards the verified identity
//! in request headers. Handlers receive it as an explicit value instead
//! of consulting ambient session state, so every authorization decision
//! is visible at the call site.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

/// Verified caller identity, threaded through request context.
#[derive(Debug, Clone, Copy)]
pub struct AuthContext {
    pub user_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("X-User-ID")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::AuthError(anyhow::anyhow!("Missing X-User-ID header (required from BFF)"))
            })?;

        let user_id = Uuid::parse_str(user_id)
            .map_err(|_| AppError::AuthError(anyhow::anyhow!("Malformed X-User-ID header")))?;

        let span = tracing::Span::current();
        span.record("user_id", user_id.to_string().as_str());

        Ok(AuthContext { user_id })
    }
}
