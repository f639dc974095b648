pub mod workspace;

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::BuilderConfig;
use crate::dispatch::{BuildStatus, BuildTask, Processor, TaskKind};
use crate::error::{AppError, Result};

use workspace::WorkspaceManager;

/// How a build pipeline ended, before mapping to a commit status.
enum BuildOutcome {
    Passed,
    TestsFailed(i32),
    DeployFailed(i32),
}

/// Runs build tasks: checkout, test command, optional deploy command.
///
/// All outcomes are reported through the task's own callback; nothing
/// escapes to the worker that called us.
pub struct BuildProcessor {
    config: BuilderConfig,
    workspaces: WorkspaceManager,
}

impl BuildProcessor {
    pub fn new(config: &BuilderConfig) -> Self {
        Self {
            config: config.clone(),
            workspaces: WorkspaceManager::new(config.workspace_dir.clone()),
        }
    }

    async fn run_pipeline(&self, task: &BuildTask) -> Result<BuildOutcome> {
        let workspace = self
            .workspaces
            .checkout(
                task.host(),
                task.owner(),
                task.repository(),
                task.commit(),
                self.config.access_token.as_deref(),
            )
            .await?;

        task.report(BuildStatus::Pending, "running tests");
        let tests = run_command(&self.config.test_command, &workspace.path, task).await?;

        let outcome = if !tests.success() {
            BuildOutcome::TestsFailed(tests.code().unwrap_or(-1))
        } else if task.kind() == TaskKind::Deploy {
            task.report(BuildStatus::Pending, "tests passed, deploying");
            let deploy = run_command(&self.config.deploy_command, &workspace.path, task).await?;
            if deploy.success() {
                BuildOutcome::Passed
            } else {
                BuildOutcome::DeployFailed(deploy.code().unwrap_or(-1))
            }
        } else {
            BuildOutcome::Passed
        };

        self.workspaces.cleanup(&workspace).await?;
        Ok(outcome)
    }
}

#[async_trait]
impl Processor for BuildProcessor {
    async fn process(&self, task: &BuildTask) {
        task.report(BuildStatus::Pending, "fetching source");

        match self.run_pipeline(task).await {
            Ok(BuildOutcome::Passed) => {
                let description = match task.kind() {
                    TaskKind::Test => "all tests passed",
                    TaskKind::Deploy => "tests passed, deploy finished",
                };
                task.report(BuildStatus::Success, description);
            }
            Ok(BuildOutcome::TestsFailed(code)) => {
                task.report(
                    BuildStatus::Failure,
                    &format!("tests failed with exit code {code}"),
                );
            }
            Ok(BuildOutcome::DeployFailed(code)) => {
                task.report(
                    BuildStatus::Error,
                    &format!("deploy failed with exit code {code}"),
                );
            }
            Err(e) => {
                tracing::error!(
                    repo = task.repository(),
                    id = task.id(),
                    error = %e,
                    "build pipeline error"
                );
                task.report(BuildStatus::Error, &format!("build error: {e}"));
            }
        }
    }
}

/// Exit status of one build step.
struct StepStatus {
    status: std::process::ExitStatus,
}

impl StepStatus {
    fn success(&self) -> bool {
        self.status.success()
    }

    fn code(&self) -> Option<i32> {
        self.status.code()
    }
}

/// Run one build step through the shell in the workspace directory.
///
/// The task's coordinates are exported so build scripts can reference
/// them (e.g. a deploy command tagging an image with `GANTRY_VERSION`).
async fn run_command(command: &str, dir: &Path, task: &BuildTask) -> Result<StepStatus> {
    tracing::info!(
        repo = task.repository(),
        id = task.id(),
        cmd = command,
        "running build step"
    );

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(dir)
        .env("GANTRY_OWNER", task.owner())
        .env("GANTRY_REPOSITORY", task.repository())
        .env("GANTRY_COMMIT", task.commit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(version) = task.version() {
        cmd.env("GANTRY_VERSION", version);
    }

    let output = cmd
        .output()
        .await
        .map_err(|e| AppError::Build(format!("failed to run '{command}': {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::debug!(
            repo = task.repository(),
            id = task.id(),
            exit_code = output.status.code().unwrap_or(-1),
            stderr = %stderr.trim_end(),
            "build step failed"
        );
    }

    Ok(StepStatus {
        status: output.status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn step_task() -> BuildTask {
        BuildTask::new(
            "step-test".to_string(),
            TaskKind::Deploy,
            "github.com".to_string(),
            "acme".to_string(),
            "widgets".to_string(),
            "deadbeef".to_string(),
            Some("v0.3.0".to_string()),
            Arc::new(|_, _, _| {}),
        )
    }

    #[tokio::test]
    async fn test_run_command_reports_success() {
        let tmp = tempfile::tempdir().unwrap();
        let status = run_command("true", tmp.path(), &step_task()).await.unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_run_command_reports_exit_code() {
        let tmp = tempfile::tempdir().unwrap();
        let status = run_command("exit 3", tmp.path(), &step_task()).await.unwrap();
        assert!(!status.success());
        assert_eq!(status.code(), Some(3));
    }

    #[tokio::test]
    async fn test_run_command_exports_task_env() {
        let tmp = tempfile::tempdir().unwrap();
        let status = run_command(
            r#"test "$GANTRY_OWNER/$GANTRY_REPOSITORY" = acme/widgets \
               && test "$GANTRY_COMMIT" = deadbeef \
               && test "$GANTRY_VERSION" = v0.3.0"#,
            tmp.path(),
            &step_task(),
        )
        .await
        .unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_run_command_runs_in_workspace_dir() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("marker"), "here").unwrap();
        let status = run_command("test -f marker", tmp.path(), &step_task())
            .await
            .unwrap();
        assert!(status.success());
    }
}
