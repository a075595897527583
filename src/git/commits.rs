use super::branch::resolve_base;
use crate::error::{Error, Result};
use git2::{IndexAddOption, Repository, ResetType, Signature, Sort};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One commit on a branch, as shown in the timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub short_sha: String,
    pub subject: String,
    pub timestamp_seconds: i64,
}

impl CommitInfo {
    pub fn new(sha: impl Into<String>, subject: impl Into<String>, timestamp_seconds: i64) -> Self {
        let sha = sha.into();
        let short_sha = sha.chars().take(7).collect();
        Self {
            sha,
            short_sha,
            subject: subject.into(),
            timestamp_seconds,
        }
    }
}

/// Commits reachable from HEAD but not from `base_branch`, newest first
pub fn list_commits(repo: &Repository, base_branch: &str) -> Result<Vec<CommitInfo>> {
    let mut walk = repo
        .revwalk()
        .map_err(|e| Error::git(format!("Failed to walk history: {}", e)))?;
    walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)
        .map_err(|e| Error::git(e.to_string()))?;

    if walk.push_head().is_err() {
        // Unborn HEAD, nothing committed yet
        return Ok(Vec::new());
    }

    match resolve_base(repo, base_branch) {
        Ok(base) => walk
            .hide(base.id())
            .map_err(|e| Error::git(format!("Failed to hide base {}: {}", base_branch, e)))?,
        Err(e) => warn!(base = %base_branch, error = %e, "Base branch missing, listing full history"),
    }

    let mut commits = Vec::new();
    for oid in walk {
        let oid = oid.map_err(|e| Error::git(e.to_string()))?;
        let commit = repo
            .find_commit(oid)
            .map_err(|e| Error::git(format!("Failed to read commit {}: {}", oid, e)))?;
        commits.push(CommitInfo::new(
            oid.to_string(),
            commit.summary().unwrap_or_default(),
            commit.time().seconds(),
        ));
    }

    Ok(commits)
}

/// Hard reset the checked-out branch to `rev`
pub fn reset_to(repo: &Repository, rev: &str) -> Result<()> {
    let target = repo
        .revparse_single(rev)
        .and_then(|object| object.peel_to_commit())
        .map_err(|e| Error::git(format!("Failed to resolve {}: {}", rev, e)))?;

    debug!(rev = %rev, target = %target.id(), "Resetting branch");

    repo.reset(target.as_object(), ResetType::Hard, None)
        .map_err(|e| Error::git(format!("Failed to reset to {}: {}", rev, e)))
}

/// Stage every change and commit it. Returns `None` when there is nothing to commit.
pub fn commit_all(repo: &Repository, message: &str) -> Result<Option<String>> {
    let mut index = repo
        .index()
        .map_err(|e| Error::git(format!("Failed to open index: {}", e)))?;
    let staged = |e: git2::Error| Error::git(format!("Failed to stage changes: {}", e));
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .map_err(staged)?;
    index.update_all(["*"].iter(), None).map_err(staged)?;
    index.write().map_err(staged)?;

    let tree_id = index
        .write_tree()
        .map_err(|e| Error::git(format!("Failed to write tree: {}", e)))?;

    let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
    if parent.as_ref().is_some_and(|p| p.tree_id() == tree_id) {
        return Ok(None);
    }

    let tree = repo
        .find_tree(tree_id)
        .map_err(|e| Error::git(e.to_string()))?;
    let signature = repo
        .signature()
        .or_else(|_| Signature::now("branchwork", "branchwork@localhost"))
        .map_err(|e| Error::git(format!("Failed to build signature: {}", e)))?;
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

    let oid = repo
        .commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
        .map_err(|e| Error::git(format!("Failed to commit: {}", e)))?;

    Ok(Some(oid.to_string()))
}
