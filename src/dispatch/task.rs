use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Callback a task carries to report status changes: `(task id, status,
/// description)`. Invoked zero or more times with `Pending` while the build
/// progresses and exactly once with a terminal status.
pub type StatusCallback = Arc<dyn Fn(&str, BuildStatus, &str) + Send + Sync>;

/// Commit-status values understood by the source-control platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    /// Queued or running, not yet resolved.
    Pending,
    Success,
    /// The build itself failed, e.g. tests did not pass.
    Failure,
    /// Infrastructure or processing failure.
    Error,
}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BuildStatus::Pending)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Success => "success",
            BuildStatus::Failure => "failure",
            BuildStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// What a build task should do once the source is checked out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Run the test command only.
    Test,
    /// Run the test command, then the deploy command if tests pass.
    Deploy,
}

/// One unit of build work submitted to the dispatcher.
///
/// Read-only once constructed; clones share the status callback.
#[derive(Clone)]
pub struct BuildTask {
    id: String,
    kind: TaskKind,
    host: String,
    owner: String,
    repository: String,
    commit: String,
    version: Option<String>,
    callback: StatusCallback,
}

impl BuildTask {
    pub fn new(
        id: String,
        kind: TaskKind,
        host: String,
        owner: String,
        repository: String,
        commit: String,
        version: Option<String>,
        callback: StatusCallback,
    ) -> Self {
        Self {
            id,
            kind,
            host,
            owner,
            repository,
            commit,
            version,
            callback,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Repository name; also the mutual-exclusion key for scheduling.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn commit(&self) -> &str {
        &self.commit
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Invoke the status callback on behalf of this task.
    pub fn report(&self, status: BuildStatus, description: &str) {
        (self.callback)(&self.id, status, description);
    }

    /// Human-readable queue key used by introspection.
    pub fn display_key(&self) -> String {
        format!("{}/{}: {}", self.owner, self.repository, self.id)
    }
}

// Manual Debug impl: the callback is opaque.
impl fmt::Debug for BuildTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildTask")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("owner", &self.owner)
            .field("repository", &self.repository)
            .field("commit", &self.commit)
            .field("version", &self.version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_callback() -> StatusCallback {
        Arc::new(|_, _, _| {})
    }

    #[test]
    fn test_display_key_format() {
        let task = BuildTask::new(
            "42".to_string(),
            TaskKind::Test,
            "github.com".to_string(),
            "k8s-community".to_string(),
            "cicd".to_string(),
            "abc123".to_string(),
            None,
            noop_callback(),
        );
        assert_eq!(task.display_key(), "k8s-community/cicd: 42");
    }

    #[test]
    fn test_status_strings_match_platform_states() {
        assert_eq!(BuildStatus::Pending.to_string(), "pending");
        assert_eq!(BuildStatus::Success.to_string(), "success");
        assert_eq!(BuildStatus::Failure.to_string(), "failure");
        assert_eq!(BuildStatus::Error.to_string(), "error");
    }

    #[test]
    fn test_only_pending_is_non_terminal() {
        assert!(!BuildStatus::Pending.is_terminal());
        assert!(BuildStatus::Success.is_terminal());
        assert!(BuildStatus::Failure.is_terminal());
        assert!(BuildStatus::Error.is_terminal());
    }

    #[test]
    fn test_report_passes_task_id() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: StatusCallback = Arc::new(move |id, status, description| {
            sink.lock()
                .unwrap()
                .push((id.to_string(), status, description.to_string()));
        });

        let task = BuildTask::new(
            "task-1".to_string(),
            TaskKind::Deploy,
            "github.com".to_string(),
            "owner".to_string(),
            "repo".to_string(),
            "deadbeef".to_string(),
            Some("v1.2.3".to_string()),
            callback,
        );
        task.report(BuildStatus::Pending, "queued");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "task-1");
        assert_eq!(seen[0].1, BuildStatus::Pending);
        assert_eq!(seen[0].2, "queued");
    }
}
