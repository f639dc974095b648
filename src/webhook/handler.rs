use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};

use crate::builds::{self, BuildSubmission};
use crate::dispatch::TaskKind;
use crate::error::AppError;
use crate::server::AppState;
use crate::webhook::events::{
    InstallationEvent, InstallationRepositoriesEvent, PushEvent, WebhookEvent,
};
use crate::webhook::signature::verify_signature;

pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    // Extract required headers
    let signature = match headers.get("x-hub-signature-256").and_then(|v| v.to_str().ok()) {
        Some(sig) => sig.to_string(),
        None => {
            tracing::warn!("Missing X-Hub-Signature-256 header");
            return StatusCode::UNAUTHORIZED;
        }
    };

    let event_type = match headers.get("x-github-event").and_then(|v| v.to_str().ok()) {
        Some(et) => et.to_string(),
        None => {
            tracing::warn!("Missing X-GitHub-Event header");
            return StatusCode::BAD_REQUEST;
        }
    };

    // Verify signature
    if let Err(e) = verify_signature(state.config.webhook_secret(), &body, &signature) {
        tracing::warn!(error = %e, "Webhook signature verification failed");
        return StatusCode::UNAUTHORIZED;
    }

    // Parse event
    let event = match WebhookEvent::parse(&event_type, &body) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, event_type = %event_type, "Failed to parse webhook event");
            return StatusCode::BAD_REQUEST;
        }
    };

    tracing::info!(event_type = %event_type, "Received webhook event");

    match event {
        WebhookEvent::Push(push_event) => handle_push_event(&state, push_event).await,
        WebhookEvent::Installation(installation_event) => {
            handle_installation_event(&state, installation_event).await
        }
        WebhookEvent::InstallationRepositories(repositories_event) => {
            handle_installation_repositories_event(&state, repositories_event).await
        }
        WebhookEvent::Ping => {
            tracing::info!("Received ping event");
            StatusCode::OK
        }
        WebhookEvent::Unsupported(event_type) => {
            tracing::debug!(event_type = %event_type, "Ignoring unsupported event");
            StatusCode::OK
        }
    }
}

/// A push to the tracked branch becomes a deploy-kind build task.
async fn handle_push_event(state: &Arc<AppState>, event: PushEvent) -> StatusCode {
    // Pushes carry the installation too; remember it for status updates.
    if let Some(installation) = &event.installation {
        if let Some(owner) = event.repository.owner.name() {
            state.record_installation(owner, installation.id).await;
        }
    }

    let Some(branch) = event.ref_name.strip_prefix("refs/heads/") else {
        tracing::debug!(git_ref = %event.ref_name, "Ignoring non-branch push");
        return StatusCode::OK;
    };

    if branch != state.config.github.tracked_branch {
        tracing::debug!(
            repo = %event.repository.full_name,
            branch = branch,
            "Ignoring push to untracked branch"
        );
        return StatusCode::OK;
    }

    let Some(head_commit) = event.head_commit else {
        tracing::debug!(
            repo = %event.repository.full_name,
            "Ignoring push without head commit"
        );
        return StatusCode::OK;
    };

    let Some(owner) = event.repository.owner.name() else {
        tracing::warn!(
            repo = %event.repository.full_name,
            "Push event without repository owner"
        );
        return StatusCode::BAD_REQUEST;
    };

    let submission = BuildSubmission {
        username: owner.to_string(),
        repository: event.repository.name.clone(),
        commit: head_commit.id,
        kind: TaskKind::Deploy,
        version: None,
    };

    match builds::enqueue_build(state, submission).await {
        Ok(id) => {
            tracing::info!(
                repo = %event.repository.full_name,
                id = %id,
                "Push enqueued for build"
            );
            StatusCode::ACCEPTED
        }
        Err(AppError::ShuttingDown) => StatusCode::SERVICE_UNAVAILABLE,
        Err(e) => {
            tracing::error!(
                repo = %event.repository.full_name,
                error = %e,
                "Failed to enqueue build for push"
            );
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// App installed or uninstalled: remember the installation and sync the
/// account into the user directory.
async fn handle_installation_event(state: &Arc<AppState>, event: InstallationEvent) -> StatusCode {
    let Some(account) = event.installation.account.as_ref() else {
        tracing::warn!("Installation event without account");
        return StatusCode::BAD_REQUEST;
    };

    tracing::info!(
        account = %account.login,
        installation_id = event.installation.id,
        action = %event.action,
        "Installation event"
    );

    state
        .record_installation(&account.login, event.installation.id)
        .await;

    if let Err(e) = state.directory.sync_user(&account.login).await {
        tracing::error!(account = %account.login, error = %e, "Failed to sync user to directory");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }

    StatusCode::OK
}

/// Repositories were added to or removed from an installation: mirror the
/// change in the user directory.
async fn handle_installation_repositories_event(
    state: &Arc<AppState>,
    event: InstallationRepositoriesEvent,
) -> StatusCode {
    if let Some(account) = event.installation.account.as_ref() {
        state
            .record_installation(&account.login, event.installation.id)
            .await;
    }

    for repo in &event.repositories_added {
        let Some((owner, name)) = repo.split() else {
            tracing::warn!(repo = %repo.full_name, "Unqualified repository name, skipping");
            continue;
        };
        if let Err(e) = state.directory.create_repository(owner, name).await {
            tracing::error!(repo = %repo.full_name, error = %e, "Failed to register repository");
        }
    }

    for repo in &event.repositories_removed {
        let Some((owner, name)) = repo.split() else {
            tracing::warn!(repo = %repo.full_name, "Unqualified repository name, skipping");
            continue;
        };
        if let Err(e) = state.directory.delete_repository(owner, name).await {
            tracing::error!(repo = %repo.full_name, error = %e, "Failed to remove repository");
        }
    }

    StatusCode::OK
}
