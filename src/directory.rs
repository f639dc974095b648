use serde::Serialize;

use crate::config::DirectoryConfig;
use crate::error::{AppError, Result};

const API_PREFIX: &str = "/api/v1";

#[derive(Debug, Serialize)]
struct UserPayload<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct RepositoryPayload<'a> {
    username: &'a str,
    name: &'a str,
}

/// REST client for the user directory service.
///
/// The directory keeps accounts and their repositories in sync with what
/// the GitHub App is installed on.
pub struct DirectoryClient {
    http: reqwest::Client,
    base_url: String,
}

impl DirectoryClient {
    pub fn new(config: &DirectoryConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{API_PREFIX}{path}", self.base_url)
    }

    /// Create or refresh the directory record for an account.
    pub async fn sync_user(&self, username: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url("/user"))
            .json(&UserPayload { name: username })
            .send()
            .await?;

        Self::check(response, "sync user").await
    }

    pub async fn create_repository(&self, username: &str, name: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url("/repository"))
            .json(&RepositoryPayload { username, name })
            .send()
            .await?;

        Self::check(response, "create repository").await
    }

    pub async fn delete_repository(&self, username: &str, name: &str) -> Result<()> {
        let response = self
            .http
            .delete(self.url(&format!("/repository/{username}_{name}")))
            .send()
            .await?;

        Self::check(response, "delete repository").await
    }

    async fn check(response: reqwest::Response, action: &str) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(AppError::Directory(format!(
            "couldn't {action}, service returned {status}: {body}"
        )))
    }
}
