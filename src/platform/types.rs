use serde::Serialize;

use crate::dispatch::BuildStatus;

/// A commit-status update as the platform expects it.
#[derive(Debug, Clone, Serialize)]
pub struct CommitStatus {
    pub state: BuildStatus,
    pub description: String,
    /// Context string distinguishing this status from other checks.
    pub context: String,
    pub target_url: Option<String>,
}
