use crate::error::{Error, Result};
use git2::Repository;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Open an existing repository (a linked worktree path works too)
pub fn open(path: &Path) -> Result<Repository> {
    Repository::open(path).map_err(|e| Error::GitError {
        message: format!("Failed to open repository at {}: {}", path.display(), e),
    })
}

/// Detect the default branch of a repository.
///
/// Prefers the remote's HEAD, then a local `main` or `master`, then whatever
/// HEAD currently points at.
pub fn get_default_branch(repo: &Repository) -> Result<String> {
    if let Ok(remote_head) = repo.find_reference("refs/remotes/origin/HEAD") {
        if let Some(target) = remote_head.symbolic_target() {
            if let Some(name) = target.strip_prefix("refs/remotes/origin/") {
                debug!(branch = %name, "Default branch from origin/HEAD");
                return Ok(name.to_string());
            }
        }
    }

    for candidate in ["main", "master"] {
        if repo.find_reference(&format!("refs/heads/{}", candidate)).is_ok() {
            return Ok(candidate.to_string());
        }
    }

    let head = repo.head().map_err(|e| Error::GitError {
        message: format!("Failed to find default branch: {}", e),
    })?;

    head.shorthand()
        .map(|s| s.to_string())
        .ok_or_else(|| Error::GitError {
            message: "Could not determine default branch".to_string(),
        })
}

/// Sha of the current HEAD commit, `None` on an unborn branch
pub fn head_sha(repo: &Repository) -> Option<String> {
    repo.head()
        .ok()
        .and_then(|head| head.target())
        .map(|oid| oid.to_string())
}

/// Root of the main checkout containing `path`, also when `path` is inside a linked worktree
pub fn discover_root(path: &Path) -> Result<PathBuf> {
    let repo = Repository::discover(path).map_err(|e| Error::GitError {
        message: format!("Not inside a git repository ({}): {}", path.display(), e),
    })?;

    let root = match repo.commondir().parent() {
        Some(parent) if !repo.is_bare() => parent.to_path_buf(),
        _ => repo.path().to_path_buf(),
    };

    Ok(root.canonicalize()?)
}
