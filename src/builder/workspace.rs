use std::path::{Path, PathBuf};

use git2::{build::RepoBuilder, Cred, FetchOptions, RemoteCallbacks, Repository};

use crate::error::{AppError, Result};

/// Validate a commit ref to prevent argument injection.
/// Rejects empty refs and refs starting with `-` as defence in depth.
fn validate_ref(commit: &str) -> Result<()> {
    if commit.is_empty() {
        return Err(AppError::Workspace("Empty commit ref".to_string()));
    }
    if commit.starts_with('-') {
        return Err(AppError::Workspace(format!(
            "Invalid commit ref (starts with '-'): {commit}"
        )));
    }
    Ok(())
}

/// Build `FetchOptions` that authenticate via credential callback when a
/// token is configured. The token is captured by the closure and never
/// written to disk.
fn make_fetch_options(token: Option<String>) -> FetchOptions<'static> {
    let mut opts = FetchOptions::new();
    if let Some(token) = token {
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |_url, _username_from_url, _allowed_types| {
            Cred::userpass_plaintext("x-access-token", &token)
        });
        opts.remote_callbacks(callbacks);
    }
    opts
}

/// Clone a repository into the target directory.
///
/// The remote URL stored in `.git/config` is the **plain** URL (no
/// credentials); authentication is handled via credential callback only.
async fn clone(url: &str, target: &Path, token: Option<&str>) -> Result<()> {
    if !url.starts_with("https://") {
        return Err(AppError::Git(format!(
            "Expected HTTPS clone URL, got: {url}"
        )));
    }

    let url = url.to_string();
    let target = target.to_path_buf();
    let token = token.map(str::to_string);

    tokio::task::spawn_blocking(move || {
        let fetch_opts = make_fetch_options(token);
        RepoBuilder::new()
            .fetch_options(fetch_opts)
            .clone(&url, &target)?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Clone task panicked: {e}")))?
}

/// Check out a commit with a detached HEAD.
async fn checkout_commit(dir: &Path, commit: &str) -> Result<()> {
    validate_ref(commit)?;

    let dir = dir.to_path_buf();
    let commit = commit.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let obj = repo.revparse_single(&commit)?;
        repo.checkout_tree(&obj, None)?;
        repo.set_head_detached(obj.id())?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Checkout task panicked: {e}")))?
}

/// Manages the checkout directories builds run in.
pub struct WorkspaceManager {
    base_dir: PathBuf,
}

/// A checked-out source tree ready for build commands.
pub struct Workspace {
    pub path: PathBuf,
}

impl WorkspaceManager {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Clean up an existing workspace directory and ensure its parent exists.
    async fn prepare_dir(path: &Path) -> Result<()> {
        if path.exists() {
            tokio::fs::remove_dir_all(path)
                .await
                .map_err(|e| AppError::Workspace(format!("Failed to clean workspace: {e}")))?;
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Workspace(format!("Failed to create workspace dir: {e}")))?;
        }
        Ok(())
    }

    /// Clone the repository and check out the requested commit.
    pub async fn checkout(
        &self,
        host: &str,
        owner: &str,
        repo: &str,
        commit: &str,
        token: Option<&str>,
    ) -> Result<Workspace> {
        validate_ref(commit)?;

        let path = self.workspace_path(owner, repo);
        Self::prepare_dir(&path).await?;

        let url = format!("https://{host}/{owner}/{repo}.git");
        clone(&url, &path, token).await?;
        checkout_commit(&path, commit).await?;

        Ok(Workspace { path })
    }

    /// Clean up a workspace directory.
    pub async fn cleanup(&self, workspace: &Workspace) -> Result<()> {
        if workspace.path.exists() {
            tokio::fs::remove_dir_all(&workspace.path)
                .await
                .map_err(|e| AppError::Workspace(format!("Failed to cleanup workspace: {e}")))?;
        }
        Ok(())
    }

    // Per-repository scheduling means a repository occupies at most one
    // worker, so the directory cannot be used by two builds at once.
    fn workspace_path(&self, owner: &str, repo: &str) -> PathBuf {
        self.base_dir.join(format!("{owner}__{repo}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use std::fs;

    #[test]
    fn test_validate_ref_rejects_dash_prefix() {
        assert!(validate_ref("-evil").is_err());
        assert!(validate_ref("--upload-pack").is_err());
    }

    #[test]
    fn test_validate_ref_rejects_empty() {
        assert!(validate_ref("").is_err());
    }

    #[test]
    fn test_validate_ref_accepts_commit_hashes() {
        assert!(validate_ref("deadbeef").is_ok());
        assert!(validate_ref("a94a8fe5ccb19ba61c4c0873d391e987982fbbd3").is_ok());
    }

    #[test]
    fn test_workspace_path_is_per_repository() {
        let manager = WorkspaceManager::new(PathBuf::from("/tmp/ws"));
        assert_eq!(
            manager.workspace_path("acme", "widgets"),
            PathBuf::from("/tmp/ws/acme__widgets")
        );
    }

    #[test]
    fn test_clone_rejects_non_https() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = rt.block_on(clone(
            "git@github.com:owner/repo.git",
            Path::new("/tmp/test"),
            None,
        ));
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Expected HTTPS clone URL"));
    }

    #[test]
    fn test_checkout_commit_detaches_head() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();

        // One commit to point HEAD at.
        fs::write(tmp.path().join("hello.txt"), "world").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("hello.txt")).unwrap();
        index.write().unwrap();
        let tree_oid = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_oid).unwrap();
        let sig = Signature::now("Test", "test@example.com").unwrap();
        let oid = repo
            .commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();
        drop(tree);

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(checkout_commit(tmp.path(), &oid.to_string()))
            .unwrap();

        let repo = Repository::open(tmp.path()).unwrap();
        assert!(repo.head_detached().unwrap());
        assert_eq!(repo.head().unwrap().target(), Some(oid));
    }
}
