use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub github: GitHubConfig,
    pub dispatcher: DispatcherConfig,
    pub directory: DirectoryConfig,
    pub builder: BuilderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Deserialize, Clone)]
pub struct GitHubConfig {
    pub app_id: u64,
    pub private_key_path: PathBuf,
    pub webhook_secret: String,
    /// Branch whose pushes trigger builds.
    #[serde(default = "default_tracked_branch")]
    pub tracked_branch: String,
    /// Context string shown next to the commit status on GitHub.
    #[serde(default = "default_status_context")]
    pub status_context: String,
    /// Target URL attached to commit statuses.
    #[serde(default)]
    pub status_url: Option<String>,
}

// Manual Debug impl to avoid leaking the webhook secret
impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("app_id", &self.app_id)
            .field("private_key_path", &self.private_key_path)
            .field("webhook_secret", &"[REDACTED]")
            .field("tracked_branch", &self.tracked_branch)
            .field("status_context", &self.status_context)
            .field("status_url", &self.status_url)
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatcherConfig {
    /// Size of the worker pool; also the capacity of the hand-off channel.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Delay before a task deferred by a same-repository collision is
    /// re-submitted.
    #[serde(default = "default_reassign_delay_secs")]
    pub reassign_delay_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DirectoryConfig {
    #[serde(default = "default_directory_base_url")]
    pub base_url: String,
}

#[derive(Deserialize, Clone)]
pub struct BuilderConfig {
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,
    /// Host the clone URL is built from: https://{source_host}/{owner}/{repo}.git
    #[serde(default = "default_source_host")]
    pub source_host: String,
    #[serde(default = "default_test_command")]
    pub test_command: String,
    #[serde(default = "default_deploy_command")]
    pub deploy_command: String,
    /// Token used to clone private repositories.
    #[serde(default)]
    pub access_token: Option<String>,
}

// Manual Debug impl to avoid leaking the access token
impl std::fmt::Debug for BuilderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuilderConfig")
            .field("workspace_dir", &self.workspace_dir)
            .field("source_host", &self.source_host)
            .field("test_command", &self.test_command)
            .field("deploy_command", &self.deploy_command)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_tracked_branch() -> String {
    "master".to_string()
}

fn default_status_context() -> String {
    "gantry/cicd".to_string()
}

fn default_workers() -> usize {
    2
}

fn default_reassign_delay_secs() -> u64 {
    30
}

fn default_directory_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_workspace_dir() -> PathBuf {
    PathBuf::from("/tmp/gantry-workspaces")
}

fn default_source_host() -> String {
    "github.com".to_string()
}

fn default_test_command() -> String {
    "make test".to_string()
}

fn default_deploy_command() -> String {
    "make deploy".to_string()
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Load from file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            // Try default paths
            builder = builder.add_source(
                config::File::with_name("gantry")
                    .required(false),
            );
        }

        // Environment variable overrides with GANTRY_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("GANTRY")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))
    }

    pub fn webhook_secret(&self) -> &str {
        &self.github.webhook_secret
    }
}
