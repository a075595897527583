use super::branch::{branch_exists_local, delete_local_branch, resolve_base};
use crate::error::{Error, Result};
use git2::{Repository, WorktreeAddOptions, WorktreePruneOptions};
use std::path::Path;
use tracing::{debug, warn};

/// Worktree administrative name derived from the checkout directory
fn worktree_name(path: &Path, branch: &str) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| branch.replace('/', "-"))
}

/// Create a new branch from `base_branch` and check it out into a new worktree
pub fn create_worktree(
    repo_path: &Path,
    branch: &str,
    base_branch: &str,
    path: &Path,
) -> Result<()> {
    debug!(branch = %branch, base = %base_branch, path = %path.display(), "Creating worktree");

    let failed = |message: String| Error::WorktreeCreationFailed {
        branch: branch.to_string(),
        message,
    };

    let repo = Repository::open(repo_path)
        .map_err(|e| failed(format!("Failed to open repository: {}", e)))?;

    if branch_exists_local(&repo, branch) {
        return Err(Error::BranchNameConflict {
            branch: branch.to_string(),
        });
    }

    if path.exists() {
        return Err(failed(format!("{} already exists", path.display())));
    }

    let base = resolve_base(&repo, base_branch).map_err(|e| failed(e.to_string()))?;

    let created = repo
        .branch(branch, &base, false)
        .map_err(|e| failed(format!("Failed to create branch: {}", e)))?;
    let reference = created.into_reference();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut opts = WorktreeAddOptions::new();
    opts.reference(Some(&reference));

    // Don't return the Worktree object as it's not Send
    let added = repo.worktree(&worktree_name(path, branch), path, Some(&opts));
    drop(opts);
    drop(reference);

    if let Err(e) = added {
        // Roll the branch back so a retry does not hit a name conflict
        if let Err(rollback) = delete_local_branch(&repo, branch) {
            warn!(branch = %branch, error = %rollback, "Failed to roll back branch");
        }
        return Err(failed(format!(
            "Failed to create worktree at {}: {}",
            path.display(),
            e
        )));
    }

    Ok(())
}

fn same_path(a: &Path, b: &Path) -> bool {
    let canon = |p: &Path| p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
    canon(a) == canon(b)
}

/// Remove a worktree directory, prune its metadata and delete its branch
pub fn remove_worktree(repo_path: &Path, worktree_path: &Path, branch: &str) -> Result<()> {
    debug!(worktree_path = %worktree_path.display(), "Removing worktree");

    let failed = |message: String| Error::WorktreeRemovalFailed {
        path: worktree_path.to_path_buf(),
        message,
    };

    let repo = Repository::open(repo_path)
        .map_err(|e| failed(format!("Failed to open repository: {}", e)))?;

    let names: Vec<String> = repo
        .worktrees()
        .map_err(|e| failed(format!("Failed to list worktrees: {}", e)))?
        .iter()
        .flatten()
        .map(|s| s.to_string())
        .collect();

    let mut registered = false;
    for name in names {
        let wt = match repo.find_worktree(&name) {
            Ok(wt) => wt,
            Err(e) => {
                warn!(worktree = %name, error = %e, "Skipping unreadable worktree");
                continue;
            }
        };

        if same_path(wt.path(), worktree_path) {
            registered = true;

            if worktree_path.exists() {
                std::fs::remove_dir_all(worktree_path)
                    .map_err(|e| failed(format!("Failed to remove directory: {}", e)))?;
            }

            let mut prune = WorktreePruneOptions::new();
            prune.valid(true).working_tree(true);
            wt.prune(Some(&mut prune))
                .map_err(|e| failed(format!("Failed to prune worktree {}: {}", name, e)))?;
            break;
        }
    }

    // If not registered with git, just remove the directory
    if !registered && worktree_path.exists() {
        std::fs::remove_dir_all(worktree_path)
            .map_err(|e| failed(format!("Failed to remove directory: {}", e)))?;
    }

    delete_local_branch(&repo, branch).map_err(|e| failed(e.to_string()))
}
