//! Acting user extracted from request headers.
//!
//! The headers are set by the gateway after it authenticates the caller.
//! Requests without `X-User-ID` are rejected with 401.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

pub const USER_ID_HEADER: &str = "X-User-ID";
pub const USER_ROLE_HEADER: &str = "X-User-Role";

#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: String,
    pub role: Option<String>,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role
            .as_deref()
            .is_some_and(|r| r.eq_ignore_ascii_case("admin"))
    }

    /// Fail with 403 unless the actor is an admin.
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden(anyhow::anyhow!(
                "This operation requires the admin role"
            )))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing {} header", USER_ID_HEADER))
            })?;

        let role = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        tracing::Span::current().record("user_id", user_id);

        Ok(Actor {
            user_id: user_id.to_string(),
            role,
        })
    }
}
