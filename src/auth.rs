use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json,
};

use crate::api::dto::ErrorResponse;
use crate::api::routes::AppState;
use crate::models::internal::{UserProfile, UserRole};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingCredentials,
    #[error("Invalid authorization format")]
    MalformedCredentials,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Identity service unavailable: {0}")]
    Upstream(String),
    #[error("User profile error: {0}")]
    Profile(String),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingCredentials
            | AuthError::MalformedCredentials
            | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AuthError::Profile(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The caller behind a verified bearer token.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedUser {
    pub id: String,
    pub email: Option<String>,
    pub role: UserRole,
    pub remaining_tokens: u64,
}

impl From<UserProfile> for AuthenticatedUser {
    fn from(profile: UserProfile) -> Self {
        Self {
            remaining_tokens: profile.remaining_tokens(),
            id: profile.id,
            email: profile.email,
            role: profile.role,
        }
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, AuthError>;
}

/// Pulls the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::MissingCredentials)?;
    let token = header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .ok_or(AuthError::MalformedCredentials)?;

    if token.is_empty() {
        return Err(AuthError::MalformedCredentials);
    }
    Ok(token)
}

/// Extractor that authenticates the request against the configured provider.
pub struct CurrentUser(pub AuthenticatedUser);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok());

        let reject = |e: AuthError| {
            let status = e.status();
            (
                status,
                Json(ErrorResponse {
                    error: e.to_string(),
                    code: status.as_u16() as u32,
                }),
            )
        };

        let token = bearer_token(header).map_err(reject)?;
        let user = state.auth.authenticate(token).await.map_err(|e| {
            tracing::debug!("Authentication rejected: {}", e);
            reject(e)
        })?;

        Ok(CurrentUser(user))
    }
}
