use async_trait::async_trait;
use octocrab::Octocrab;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::GitHubConfig;
use crate::error::{AppError, Result};
use crate::platform::types::CommitStatus;
use crate::platform::Platform;

use super::auth::generate_app_jwt;

pub struct GitHubPlatform {
    config: GitHubConfig,
    /// Cache of installation tokens: installation_id -> (token, expiry)
    token_cache: Arc<RwLock<std::collections::HashMap<u64, (String, chrono::DateTime<chrono::Utc>)>>>,
}

impl GitHubPlatform {
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        // Validate the private key exists
        if !config.private_key_path.exists() {
            return Err(AppError::Config(format!(
                "GitHub App private key not found at: {}",
                config.private_key_path.display()
            )));
        }

        Ok(Self {
            config: config.clone(),
            token_cache: Arc::new(RwLock::new(std::collections::HashMap::new())),
        })
    }

    /// Get an installation-scoped access token, refreshing the cache when
    /// the cached one is within five minutes of expiry.
    async fn access_token(&self, installation_id: u64) -> Result<String> {
        // Check cache
        {
            let cache = self.token_cache.read().await;
            if let Some((token, expiry)) = cache.get(&installation_id) {
                if *expiry > chrono::Utc::now() + chrono::Duration::minutes(5) {
                    return Ok(token.clone());
                }
            }
        }

        // Generate new token
        let jwt = generate_app_jwt(self.config.app_id, &self.config.private_key_path)?;

        let client = Octocrab::builder()
            .personal_token(jwt)
            .build()
            .map_err(|e| AppError::GitHubApi(format!("Failed to build JWT client: {e}")))?;

        let url = format!("/app/installations/{installation_id}/access_tokens");
        let response: serde_json::Value = client
            .post(&url, None::<&()>)
            .await
            .map_err(|e| AppError::GitHubApi(format!("Failed to create installation token: {e}")))?;

        let token = response["token"]
            .as_str()
            .ok_or_else(|| AppError::GitHubApi("No token in response".to_string()))?
            .to_string();

        let expires_at = response["expires_at"]
            .as_str()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|| chrono::Utc::now() + chrono::Duration::hours(1));

        // Cache the token
        let mut cache = self.token_cache.write().await;
        cache.insert(installation_id, (token.clone(), expires_at));

        Ok(token)
    }

    /// Get an octocrab instance authenticated as an installation.
    async fn installation_client(&self, installation_id: u64) -> Result<Octocrab> {
        let token = self.access_token(installation_id).await?;
        Octocrab::builder()
            .personal_token(token)
            .build()
            .map_err(|e| AppError::GitHubApi(format!("Failed to build octocrab client: {e}")))
    }
}

#[async_trait]
impl Platform for GitHubPlatform {
    async fn update_commit_status(
        &self,
        installation_id: u64,
        owner: &str,
        repo: &str,
        commit: &str,
        status: &CommitStatus,
    ) -> Result<()> {
        let client = self.installation_client(installation_id).await?;

        // octocrab has no typed commit-status API, use the route directly
        let url = format!("/repos/{owner}/{repo}/statuses/{commit}");
        let body = serde_json::json!({
            "state": status.state.to_string(),
            "description": status.description,
            "context": status.context,
            "target_url": status.target_url,
        });
        let _: serde_json::Value = client
            .post(&url, Some(&body))
            .await
            .map_err(|e| AppError::GitHubApi(format!("Failed to update commit status: {e}")))?;

        tracing::debug!(
            repo = %format!("{owner}/{repo}"),
            commit = commit,
            state = %status.state,
            "commit status updated"
        );

        Ok(())
    }
}
