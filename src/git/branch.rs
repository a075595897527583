use crate::error::{Error, Result};
use git2::{BranchType, Commit, Repository};
use tracing::debug;

/// Check if a branch exists locally
pub fn branch_exists_local(repo: &Repository, branch: &str) -> bool {
    repo.find_branch(branch, BranchType::Local).is_ok()
}

/// Resolve a base branch to its tip commit, falling back to the origin copy
pub fn resolve_base<'r>(repo: &'r Repository, base: &str) -> Result<Commit<'r>> {
    let object = repo
        .revparse_single(base)
        .or_else(|_| repo.revparse_single(&format!("origin/{}", base)))
        .map_err(|e| Error::git(format!("Base branch {} not found: {}", base, e)))?;

    object
        .peel_to_commit()
        .map_err(|e| Error::git(format!("Base {} does not point at a commit: {}", base, e)))
}

/// Delete a local branch; a branch that is already gone is not an error
pub fn delete_local_branch(repo: &Repository, branch: &str) -> Result<()> {
    match repo.find_branch(branch, BranchType::Local) {
        Ok(mut found) => found
            .delete()
            .map_err(|e| Error::git(format!("Failed to delete branch {}: {}", branch, e))),
        Err(_) => {
            debug!(branch = %branch, "Branch already deleted");
            Ok(())
        }
    }
}
