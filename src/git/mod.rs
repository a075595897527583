pub mod branch;
pub mod commits;
pub mod repository;
pub mod worktree;

pub use commits::CommitInfo;
pub use repository::{discover_root, get_default_branch, open};

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Git plumbing the lifecycle managers depend on.
///
/// Worktree paths double as the handle for a branch's checkout: commit listing,
/// resets and commits all run inside the branch's own worktree.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GitService: Send + Sync {
    /// Create `branch` from `base_branch` and check it out at `worktree_path`
    async fn create_worktree(
        &self,
        repo_path: &Path,
        branch: &str,
        base_branch: &str,
        worktree_path: &Path,
    ) -> Result<()>;

    /// Remove the worktree and the local branch it had checked out
    async fn remove_worktree(&self, repo_path: &Path, worktree_path: &Path, branch: &str) -> Result<()>;

    /// Commits on the branch that are not on `base_branch`, newest first
    async fn list_commits(&self, worktree_path: &Path, base_branch: &str) -> Result<Vec<CommitInfo>>;

    /// Hard reset the worktree's branch to a revision (`<sha>~1` works)
    async fn reset_to_commit(&self, worktree_path: &Path, rev: &str) -> Result<()>;

    /// Commit everything in the worktree; `None` when it is clean
    async fn commit_all(&self, worktree_path: &Path, message: &str) -> Result<Option<String>>;

    async fn head_sha(&self, worktree_path: &Path) -> Result<Option<String>>;

    async fn detect_default_branch(&self, repo_path: &Path) -> Result<String>;
}

/// `GitService` backed by libgit2. Every call runs on the blocking pool
/// because `git2::Repository` is not `Send`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Git2Service;

impl Git2Service {
    pub fn new() -> Self {
        Self
    }
}

async fn blocking<T, F>(what: &'static str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::git(format!("{} task failed: {}", what, e)))?
}

#[async_trait]
impl GitService for Git2Service {
    async fn create_worktree(
        &self,
        repo_path: &Path,
        branch: &str,
        base_branch: &str,
        worktree_path: &Path,
    ) -> Result<()> {
        let repo_path = repo_path.to_path_buf();
        let branch = branch.to_string();
        let base_branch = base_branch.to_string();
        let worktree_path = worktree_path.to_path_buf();
        blocking("Worktree creation", move || {
            worktree::create_worktree(&repo_path, &branch, &base_branch, &worktree_path)
        })
        .await
    }

    async fn remove_worktree(&self, repo_path: &Path, worktree_path: &Path, branch: &str) -> Result<()> {
        let repo_path = repo_path.to_path_buf();
        let worktree_path = worktree_path.to_path_buf();
        let branch = branch.to_string();
        blocking("Worktree removal", move || {
            worktree::remove_worktree(&repo_path, &worktree_path, &branch)
        })
        .await
    }

    async fn list_commits(&self, worktree_path: &Path, base_branch: &str) -> Result<Vec<CommitInfo>> {
        let worktree_path = worktree_path.to_path_buf();
        let base_branch = base_branch.to_string();
        blocking("Commit listing", move || {
            commits::list_commits(&open(&worktree_path)?, &base_branch)
        })
        .await
    }

    async fn reset_to_commit(&self, worktree_path: &Path, rev: &str) -> Result<()> {
        let worktree_path = worktree_path.to_path_buf();
        let rev = rev.to_string();
        blocking("Reset", move || commits::reset_to(&open(&worktree_path)?, &rev)).await
    }

    async fn commit_all(&self, worktree_path: &Path, message: &str) -> Result<Option<String>> {
        let worktree_path = worktree_path.to_path_buf();
        let message = message.to_string();
        blocking("Commit", move || commits::commit_all(&open(&worktree_path)?, &message)).await
    }

    async fn head_sha(&self, worktree_path: &Path) -> Result<Option<String>> {
        let worktree_path: PathBuf = worktree_path.to_path_buf();
        blocking("Head lookup", move || Ok(repository::head_sha(&open(&worktree_path)?))).await
    }

    async fn detect_default_branch(&self, repo_path: &Path) -> Result<String> {
        let repo_path = repo_path.to_path_buf();
        blocking("Default branch detection", move || {
            get_default_branch(&open(&repo_path)?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Repository;
    use tempfile::TempDir;

    /// Repository with one commit on its default branch
    async fn seeded_repo() -> (TempDir, PathBuf, String) {
        let dir = TempDir::new().unwrap();
        let repo_path = dir.path().join("repo");
        let repo = Repository::init(&repo_path).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();
        std::fs::write(repo_path.join("README.md"), "hello\n").unwrap();

        let git = Git2Service::new();
        git.commit_all(&repo_path, "Initial commit").await.unwrap().unwrap();
        let base = git.detect_default_branch(&repo_path).await.unwrap();

        (dir, repo_path, base)
    }

    #[tokio::test]
    async fn worktree_commits_are_listed_newest_first_and_reset() {
        let (dir, repo_path, base) = seeded_repo().await;
        let git = Git2Service::new();
        let wt = dir.path().join("worktrees").join("feat");

        git.create_worktree(&repo_path, "feat", &base, &wt).await.unwrap();
        assert!(git.list_commits(&wt, &base).await.unwrap().is_empty());

        std::fs::write(wt.join("a.txt"), "a").unwrap();
        let first = git.commit_all(&wt, "Add a").await.unwrap().unwrap();
        std::fs::write(wt.join("b.txt"), "b").unwrap();
        let second = git.commit_all(&wt, "Add b").await.unwrap().unwrap();

        let commits = git.list_commits(&wt, &base).await.unwrap();
        let shas: Vec<&str> = commits.iter().map(|c| c.sha.as_str()).collect();
        assert_eq!(shas, vec![second.as_str(), first.as_str()]);
        assert_eq!(commits[0].subject, "Add b");
        assert_eq!(commits[0].short_sha.len(), 7);

        // Clean tree produces no commit
        assert!(git.commit_all(&wt, "Nothing").await.unwrap().is_none());
        assert_eq!(git.head_sha(&wt).await.unwrap(), Some(second.clone()));

        git.reset_to_commit(&wt, &format!("{}~1", second)).await.unwrap();
        let commits = git.list_commits(&wt, &base).await.unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].sha, first);
        assert!(!wt.join("b.txt").exists());
    }

    #[tokio::test]
    async fn existing_branch_is_a_name_conflict() {
        let (dir, repo_path, base) = seeded_repo().await;
        let git = Git2Service::new();

        git.create_worktree(&repo_path, "feat", &base, &dir.path().join("wt-1"))
            .await
            .unwrap();
        let err = git
            .create_worktree(&repo_path, "feat", &base, &dir.path().join("wt-2"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::BranchNameConflict { .. }));
    }

    #[tokio::test]
    async fn unknown_base_fails_creation_without_leaving_a_branch() {
        let (dir, repo_path, _base) = seeded_repo().await;
        let git = Git2Service::new();

        let err = git
            .create_worktree(&repo_path, "feat", "no-such-base", &dir.path().join("wt"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WorktreeCreationFailed { .. }));

        let repo = Repository::open(&repo_path).unwrap();
        assert!(!branch::branch_exists_local(&repo, "feat"));
    }

    #[tokio::test]
    async fn removing_a_worktree_deletes_directory_and_branch() {
        let (dir, repo_path, base) = seeded_repo().await;
        let git = Git2Service::new();
        let wt = dir.path().join("wt");

        git.create_worktree(&repo_path, "feat", &base, &wt).await.unwrap();
        git.remove_worktree(&repo_path, &wt, "feat").await.unwrap();

        assert!(!wt.exists());
        let repo = Repository::open(&repo_path).unwrap();
        assert!(!branch::branch_exists_local(&repo, "feat"));

        // The name is free again
        git.create_worktree(&repo_path, "feat", &base, &wt).await.unwrap();
    }
}
