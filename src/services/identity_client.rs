use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;

use crate::auth::{AuthError, AuthProvider, AuthenticatedUser};
use crate::config::Config;
use crate::storage::repository::UserStore;

#[derive(Deserialize)]
struct IdentityUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// Verifies bearer tokens with the hosted identity provider and joins the
/// result with the locally stored profile (role, token ledger).
pub struct IdentityServiceAuth {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    users: Arc<dyn UserStore>,
}

impl IdentityServiceAuth {
    pub fn new(base_url: String, api_key: String, users: Arc<dyn UserStore>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            users,
        }
    }

    pub fn from_config(cfg: &Config, users: Arc<dyn UserStore>) -> Self {
        Self::new(cfg.identity_url.clone(), cfg.identity_api_key.clone(), users)
    }

    async fn verify_token(&self, token: &str) -> Result<IdentityUser, AuthError> {
        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::Upstream(e.to_string()))?;

        match response.status() {
            StatusCode::OK => response
                .json::<IdentityUser>()
                .await
                .map_err(|e| AuthError::Upstream(format!("invalid user payload: {}", e))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AuthError::InvalidToken),
            status => Err(AuthError::Upstream(format!(
                "identity service returned {}",
                status
            ))),
        }
    }
}

#[async_trait]
impl AuthProvider for IdentityServiceAuth {
    async fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let identity = self.verify_token(token).await?;

        let profile = self
            .users
            .find_or_create_profile(&identity.id, identity.email.as_deref())
            .await
            .map_err(|e| AuthError::Profile(e.to_string()))?;

        Ok(AuthenticatedUser::from(profile))
    }
}
