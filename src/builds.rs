use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::dispatch::{BuildStatus, BuildTask, QueueSnapshot, StatusCallback, TaskKind};
use crate::error::{AppError, Result};
use crate::platform::types::CommitStatus;
use crate::platform::Platform;
use crate::server::AppState;

/// A build request accepted on the REST surface.
#[derive(Debug, Deserialize)]
pub struct BuildRequest {
    pub username: String,
    pub repository: String,
    pub commit_hash: String,
    #[serde(default)]
    pub kind: Option<TaskKind>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Serialize)]
struct BuildAccepted {
    id: String,
}

/// Validated submission handed to the dispatcher, from the REST surface or
/// the webhook handler.
#[derive(Debug)]
pub struct BuildSubmission {
    pub username: String,
    pub repository: String,
    pub commit: String,
    pub kind: TaskKind,
    pub version: Option<String>,
}

/// Turn a submission into a dispatched task and return its id.
///
/// The task's callback forwards every status change to the platform as a
/// commit-status update; an initial `pending` status is reported as soon as
/// the task is queued.
pub async fn enqueue_build(state: &Arc<AppState>, submission: BuildSubmission) -> Result<String> {
    let id = uuid::Uuid::new_v4().to_string();

    let installation_id = state.installation_for(&submission.username).await;
    if installation_id.is_none() {
        tracing::warn!(
            user = %submission.username,
            "No installation known for user; commit statuses will not be reported"
        );
    }

    let callback = status_callback(
        Arc::clone(&state.platform),
        installation_id,
        state.config.github.status_context.clone(),
        state.config.github.status_url.clone(),
        submission.username.clone(),
        submission.repository.clone(),
        submission.commit.clone(),
    );

    let task = BuildTask::new(
        id.clone(),
        submission.kind,
        state.config.builder.source_host.clone(),
        submission.username,
        submission.repository,
        submission.commit,
        submission.version,
        callback,
    );

    task.report(BuildStatus::Pending, "queued, waiting for a worker");
    state.dispatcher.add_task(task).await?;

    Ok(id)
}

/// Build the status-forwarding callback for one task.
///
/// Each invocation spawns the REST call so callers (workers, the shutdown
/// drain) never wait on the platform.
fn status_callback(
    platform: Arc<dyn Platform>,
    installation_id: Option<u64>,
    context: String,
    target_url: Option<String>,
    owner: String,
    repository: String,
    commit: String,
) -> StatusCallback {
    Arc::new(move |task_id, status, description| {
        let Some(installation_id) = installation_id else {
            tracing::debug!(
                task = task_id,
                state = %status,
                "Skipping commit status update, no installation"
            );
            return;
        };

        let platform = Arc::clone(&platform);
        let update = CommitStatus {
            state: status,
            description: description.to_string(),
            context: context.clone(),
            target_url: target_url.clone(),
        };
        let owner = owner.clone();
        let repository = repository.clone();
        let commit = commit.clone();
        let task_id = task_id.to_string();

        tokio::spawn(async move {
            if let Err(e) = platform
                .update_commit_status(installation_id, &owner, &repository, &commit, &update)
                .await
            {
                tracing::error!(
                    task = %task_id,
                    repo = %format!("{owner}/{repository}"),
                    error = %e,
                    "Failed to update commit status"
                );
            }
        });
    })
}

fn validate(request: &BuildRequest) -> std::result::Result<(), &'static str> {
    if request.username.trim().is_empty() {
        return Err("username is required");
    }
    if request.repository.trim().is_empty() {
        return Err("repository is required");
    }
    if request.commit_hash.trim().is_empty() {
        return Err("commit_hash is required");
    }
    Ok(())
}

/// `POST /builds`: accept a build request and return its id immediately.
pub async fn submit_build(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BuildRequest>,
) -> Response {
    if let Err(reason) = validate(&request) {
        return (StatusCode::UNPROCESSABLE_ENTITY, reason).into_response();
    }

    let submission = BuildSubmission {
        username: request.username,
        repository: request.repository,
        commit: request.commit_hash,
        kind: request.kind.unwrap_or(TaskKind::Deploy),
        version: request.version,
    };

    match enqueue_build(&state, submission).await {
        Ok(id) => (StatusCode::ACCEPTED, Json(BuildAccepted { id })).into_response(),
        Err(AppError::ShuttingDown) => {
            (StatusCode::SERVICE_UNAVAILABLE, "service is shutting down").into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to enqueue build");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `GET /builds`: live view of the dispatcher queues.
pub async fn list_builds(State(state): State<Arc<AppState>>) -> Json<QueueSnapshot> {
    Json(state.dispatcher.snapshot().await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(username: &str, repository: &str, commit_hash: &str) -> BuildRequest {
        BuildRequest {
            username: username.to_string(),
            repository: repository.to_string(),
            commit_hash: commit_hash.to_string(),
            kind: None,
            version: None,
        }
    }

    #[test]
    fn test_validate_accepts_complete_request() {
        assert!(validate(&request("octocat", "hello", "deadbeef")).is_ok());
    }

    #[test]
    fn test_validate_rejects_blank_fields() {
        assert!(validate(&request("", "hello", "deadbeef")).is_err());
        assert!(validate(&request("octocat", "  ", "deadbeef")).is_err());
        assert!(validate(&request("octocat", "hello", "")).is_err());
    }

    #[test]
    fn test_build_request_kind_parses_lowercase() {
        let request: BuildRequest = serde_json::from_value(serde_json::json!({
            "username": "octocat",
            "repository": "hello",
            "commit_hash": "deadbeef",
            "kind": "test",
            "version": "v1.0.0"
        }))
        .unwrap();
        assert_eq!(request.kind, Some(TaskKind::Test));
        assert_eq!(request.version.as_deref(), Some("v1.0.0"));
    }
}
