pub mod github;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
use types::CommitStatus;

/// The source-control platform a task's callback reports to.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Update the commit status shown next to `commit` on the platform.
    async fn update_commit_status(
        &self,
        installation_id: u64,
        owner: &str,
        repo: &str,
        commit: &str,
        status: &CommitStatus,
    ) -> Result<()>;
}
