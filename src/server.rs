use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::builder::BuildProcessor;
use crate::config::AppConfig;
use crate::directory::DirectoryClient;
use crate::dispatch::Dispatcher;
use crate::platform::github::GitHubPlatform;
use crate::platform::Platform;

pub struct AppState {
    pub config: AppConfig,
    pub platform: Arc<dyn Platform>,
    pub directory: DirectoryClient,
    pub dispatcher: Dispatcher,
    /// Known installations: account login -> installation id, populated
    /// from webhook events. Needed to authenticate status updates.
    installations: RwLock<HashMap<String, u64>>,
}

impl AppState {
    pub fn new(config: AppConfig) -> crate::error::Result<Self> {
        let platform: Arc<dyn Platform> = Arc::new(GitHubPlatform::new(&config.github)?);
        let directory = DirectoryClient::new(&config.directory);
        let processor = Arc::new(BuildProcessor::new(&config.builder));
        let dispatcher = Dispatcher::new(
            processor,
            config.dispatcher.workers,
            Duration::from_secs(config.dispatcher.reassign_delay_secs),
        )?;

        Ok(Self {
            config,
            platform,
            directory,
            dispatcher,
            installations: RwLock::new(HashMap::new()),
        })
    }

    pub async fn record_installation(&self, owner: &str, installation_id: u64) {
        let mut installations = self.installations.write().await;
        installations.insert(owner.to_string(), installation_id);
    }

    pub async fn installation_for(&self, owner: &str) -> Option<u64> {
        let installations = self.installations.read().await;
        installations.get(owner).copied()
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhooks/github", post(crate::webhook::handler::handle_webhook))
        .route(
            "/builds",
            post(crate::builds::submit_build).get(crate::builds::list_builds),
        )
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}
