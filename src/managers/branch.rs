use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{BranchEvent, EventBus};
use crate::git::GitService;
use crate::store::models::{Branch, CreateBranch, GitProject};
use crate::store::{self, Store};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, instrument, warn};

/// A branch creation that has been requested but not resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBranch {
    pub project_id: i64,
    pub branch_name: String,
    /// `None` until the project's default branch has been detected
    pub base_branch: Option<String>,
}

/// Deletion progress of a persisted branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionState {
    Idle,
    Deleting,
    /// Last attempt failed; the branch is still usable
    Failed(String),
}

/// One entry of a project's branch list as the UI should show it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchSlot {
    Pending(PendingBranch),
    Committed { branch: Branch, deletion: DeletionState },
    Failed { pending: PendingBranch, error: String },
}

impl BranchSlot {
    pub fn branch_name(&self) -> &str {
        match self {
            BranchSlot::Pending(pending) | BranchSlot::Failed { pending, .. } => &pending.branch_name,
            BranchSlot::Committed { branch, .. } => &branch.branch_name,
        }
    }
}

type CreationKey = (i64, String);

enum Creation {
    InFlight(PendingBranch),
    Failed { pending: PendingBranch, error: String },
}

/// Transient client-side state. A branch id is in `deletions` at most once, so
/// "deleting" and "delete failed" can never hold at the same time.
#[derive(Default)]
struct BranchBoard {
    creations: BTreeMap<CreationKey, Creation>,
    deletions: HashMap<i64, DeletionState>,
}

pub struct BranchManager {
    store: Store,
    git: Arc<dyn GitService>,
    config: Config,
    bus: EventBus,
    board: Mutex<BranchBoard>,
}

impl BranchManager {
    pub fn new(store: Store, git: Arc<dyn GitService>, config: Config, bus: EventBus) -> Self {
        Self {
            store,
            git,
            config,
            bus,
            board: Mutex::new(BranchBoard::default()),
        }
    }

    fn board(&self) -> MutexGuard<'_, BranchBoard> {
        self.board.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Directory name for a branch's worktree, unique per project and branch
    pub fn worktree_dir_name(project_id: i64, branch: &str) -> String {
        let branch_slug = branch
            .replace('/', "-")
            .chars()
            .take(40)
            .collect::<String>();

        let hash_input = format!("{}:{}", project_id, branch);
        let hash = Sha256::digest(hash_input.as_bytes());
        let hash_suffix = hex::encode(&hash[..2]); // 4 hex chars

        format!("{}-{}", branch_slug, hash_suffix)
    }

    fn worktree_path_for(&self, project: &GitProject, branch: &str) -> PathBuf {
        let repo_name = project
            .repo_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("project-{}", project.id));

        self.config
            .worktrees_dir()
            .join(repo_name)
            .join(Self::worktree_dir_name(project.id, branch))
    }

    #[instrument(skip(self), fields(project_id, branch = %branch_name))]
    pub async fn create_branch(
        &self,
        project_id: i64,
        branch_name: &str,
        base_branch: Option<&str>,
    ) -> Result<Branch> {
        let key: CreationKey = (project_id, branch_name.to_string());
        let pending = PendingBranch {
            project_id,
            branch_name: branch_name.to_string(),
            base_branch: base_branch.map(str::to_string),
        };

        {
            let mut board = self.board();
            if let Some(Creation::InFlight(_)) = board.creations.get(&key) {
                return Err(Error::CreationInProgress {
                    branch: branch_name.to_string(),
                });
            }
            // A retry replaces an earlier failure
            board.creations.insert(key.clone(), Creation::InFlight(pending.clone()));
        }
        self.bus.publish(BranchEvent::BranchesChanged { project_id });

        let result = self.allocate(project_id, branch_name, base_branch).await;

        {
            let mut board = self.board();
            match &result {
                Ok(branch) => {
                    board.creations.remove(&key);
                    info!(branch_id = branch.id, "Branch created");
                }
                Err(e) => {
                    warn!(error = %e, "Branch creation failed");
                    board.creations.insert(
                        key,
                        Creation::Failed {
                            pending,
                            error: e.to_string(),
                        },
                    );
                }
            }
        }
        self.bus.publish(BranchEvent::BranchesChanged { project_id });

        result
    }

    async fn allocate(
        &self,
        project_id: i64,
        branch_name: &str,
        base_branch: Option<&str>,
    ) -> Result<Branch> {
        if branch_name.trim().is_empty() {
            return Err(Error::WorktreeCreationFailed {
                branch: branch_name.to_string(),
                message: "Branch name must not be empty".to_string(),
            });
        }

        if store::get_branch_by_name(self.store.pool(), project_id, branch_name)
            .await?
            .is_some()
        {
            return Err(Error::BranchNameConflict {
                branch: branch_name.to_string(),
            });
        }

        let project = store::get_project(self.store.pool(), project_id).await?;

        let base = match base_branch {
            Some(base) => base.to_string(),
            None => {
                let detected = self.git.detect_default_branch(&project.repo_path).await?;
                debug!(base = %detected, "Using detected default branch");
                if let Some(Creation::InFlight(pending)) = self
                    .board()
                    .creations
                    .get_mut(&(project_id, branch_name.to_string()))
                {
                    pending.base_branch = Some(detected.clone());
                }
                detected
            }
        };

        let worktree_path = self.worktree_path_for(&project, branch_name);

        self.git
            .create_worktree(&project.repo_path, branch_name, &base, &worktree_path)
            .await
            .map_err(|e| match e {
                Error::BranchNameConflict { .. } | Error::WorktreeCreationFailed { .. } => e,
                other => Error::WorktreeCreationFailed {
                    branch: branch_name.to_string(),
                    message: other.to_string(),
                },
            })?;

        let created = store::create_branch(
            self.store.pool(),
            CreateBranch {
                project_id,
                branch_name: branch_name.to_string(),
                base_branch: base,
                worktree_path: worktree_path.clone(),
            },
        )
        .await;

        if created.is_err() {
            if let Err(e) = self
                .git
                .remove_worktree(&project.repo_path, &worktree_path, branch_name)
                .await
            {
                warn!(error = %e, "Failed to roll back worktree after store error");
            }
        }

        created
    }

    /// Remove the worktree, then the branch record.
    ///
    /// A failure leaves the branch in place with a dismissible error.
    #[instrument(skip(self))]
    pub async fn delete_branch(&self, branch_id: i64) -> Result<()> {
        let branch = store::get_branch(self.store.pool(), branch_id).await?;

        {
            let mut board = self.board();
            if let Some(DeletionState::Deleting) = board.deletions.get(&branch_id) {
                return Err(Error::DeleteInProgress { branch_id });
            }
            board.deletions.insert(branch_id, DeletionState::Deleting);
        }
        self.bus.publish(BranchEvent::BranchesChanged {
            project_id: branch.project_id,
        });

        let result = self.remove(&branch).await;

        {
            let mut board = self.board();
            match &result {
                Ok(()) => {
                    board.deletions.remove(&branch_id);
                    info!(branch = %branch.branch_name, "Branch deleted");
                }
                Err(e) => {
                    warn!(error = %e, "Branch deletion failed");
                    board
                        .deletions
                        .insert(branch_id, DeletionState::Failed(e.to_string()));
                }
            }
        }
        self.bus.publish(BranchEvent::BranchesChanged {
            project_id: branch.project_id,
        });

        result
    }

    /// The record is deleted inside a transaction that only commits once the
    /// worktree is gone, so a failed removal leaves both in place.
    async fn remove(&self, branch: &Branch) -> Result<()> {
        let project = store::get_project(self.store.pool(), branch.project_id).await?;

        let mut tx = self.store.pool().begin().await?;
        store::delete_branch(&mut *tx, branch.id).await?;

        let removed = self
            .git
            .remove_worktree(&project.repo_path, &branch.worktree_path, &branch.branch_name)
            .await
            .map_err(|e| match e {
                Error::WorktreeRemovalFailed { .. } => e,
                other => Error::WorktreeRemovalFailed {
                    path: branch.worktree_path.clone(),
                    message: other.to_string(),
                },
            });

        match removed {
            Ok(()) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Failed to roll back branch deletion");
                }
                Err(e)
            }
        }
    }

    /// Repoint the base branch. Commit lists cached for the branch are stale afterwards.
    #[instrument(skip(self))]
    pub async fn set_base_branch(&self, branch_id: i64, new_base: &str) -> Result<Branch> {
        let branch = store::update_base_branch(self.store.pool(), branch_id, new_base).await?;
        self.bus.publish(BranchEvent::BaseBranchChanged { branch_id });
        Ok(branch)
    }

    pub async fn get(&self, branch_id: i64) -> Result<Branch> {
        store::get_branch(self.store.pool(), branch_id).await
    }

    pub async fn list(&self, project_id: i64) -> Result<Vec<Branch>> {
        store::list_branches(self.store.pool(), project_id).await
    }

    /// Persisted branches merged with in-flight and failed creations.
    ///
    /// A pending entry is dropped as soon as a branch with the same name is
    /// persisted, so the two are never visible together. Failed creations
    /// always show until dismissed, including a name conflict with a branch
    /// that already exists.
    pub async fn list_visible(&self, project_id: i64) -> Result<Vec<BranchSlot>> {
        let branches = self.list(project_id).await?;
        let board = self.board();

        let persisted: HashSet<&str> = branches.iter().map(|b| b.branch_name.as_str()).collect();

        let mut slots: Vec<BranchSlot> = branches
            .iter()
            .map(|branch| BranchSlot::Committed {
                branch: branch.clone(),
                deletion: board
                    .deletions
                    .get(&branch.id)
                    .cloned()
                    .unwrap_or(DeletionState::Idle),
            })
            .collect();

        for ((pid, name), creation) in &board.creations {
            if *pid != project_id {
                continue;
            }
            match creation {
                Creation::InFlight(_) if persisted.contains(name.as_str()) => {}
                Creation::InFlight(pending) => slots.push(BranchSlot::Pending(pending.clone())),
                Creation::Failed { pending, error } => slots.push(BranchSlot::Failed {
                    pending: pending.clone(),
                    error: error.clone(),
                }),
            }
        }

        Ok(slots)
    }

    pub fn deleting_ids(&self) -> HashSet<i64> {
        self.board()
            .deletions
            .iter()
            .filter(|(_, state)| matches!(state, DeletionState::Deleting))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn delete_errors(&self) -> HashMap<i64, String> {
        self.board()
            .deletions
            .iter()
            .filter_map(|(id, state)| match state {
                DeletionState::Failed(message) => Some((*id, message.clone())),
                _ => None,
            })
            .collect()
    }

    /// Drop a failed creation card. Returns false if there was none.
    pub fn dismiss_failed_creation(&self, project_id: i64, branch_name: &str) -> bool {
        let key = (project_id, branch_name.to_string());
        let mut board = self.board();
        if let Some(Creation::Failed { .. }) = board.creations.get(&key) {
            board.creations.remove(&key);
            drop(board);
            self.bus.publish(BranchEvent::BranchesChanged { project_id });
            return true;
        }
        false
    }

    /// Clear the error left by a failed deletion
    pub fn dismiss_delete_error(&self, branch_id: i64) -> bool {
        let mut board = self.board();
        if let Some(DeletionState::Failed(_)) = board.deletions.get(&branch_id) {
            board.deletions.remove(&branch_id);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::MockGitService;
    use crate::store::models::{CreateProject, CreateSession};
    use tokio::sync::oneshot;

    async fn setup(git: MockGitService) -> (BranchManager, GitProject) {
        let store = Store::open_in_memory().await.unwrap();
        let project = store::create_project(
            store.pool(),
            CreateProject {
                repo_path: PathBuf::from("/tmp/repo"),
                subpath: None,
            },
        )
        .await
        .unwrap();

        let manager = BranchManager::new(store, Arc::new(git), Config::default(), EventBus::new());
        (manager, project)
    }

    #[tokio::test]
    async fn successful_creation_replaces_pending_entry() {
        let mut git = MockGitService::new();
        git.expect_create_worktree()
            .times(1)
            .returning(|_, branch, base, _| {
                assert_eq!(branch, "feat");
                assert_eq!(base, "main");
                Ok(())
            });
        let (manager, project) = setup(git).await;

        let branch = manager.create_branch(project.id, "feat", Some("main")).await.unwrap();

        let slots = manager.list_visible(project.id).await.unwrap();
        assert_eq!(slots.len(), 1);
        assert!(matches!(
            &slots[0],
            BranchSlot::Committed { branch: b, deletion: DeletionState::Idle } if b.id == branch.id
        ));
        assert!(branch.worktree_path.ends_with(BranchManager::worktree_dir_name(project.id, "feat")));
    }

    #[tokio::test]
    async fn omitted_base_uses_detected_default_branch() {
        let mut git = MockGitService::new();
        git.expect_detect_default_branch()
            .times(1)
            .returning(|_| Ok("trunk".to_string()));
        git.expect_create_worktree()
            .returning(|_, _, base, _| {
                assert_eq!(base, "trunk");
                Ok(())
            });
        let (manager, project) = setup(git).await;

        let branch = manager.create_branch(project.id, "feat", None).await.unwrap();

        assert_eq!(branch.base_branch, "trunk");
    }

    #[tokio::test]
    async fn failed_creation_is_kept_until_dismissed() {
        let mut git = MockGitService::new();
        git.expect_create_worktree().returning(|_, branch, _, _| {
            Err(Error::WorktreeCreationFailed {
                branch: branch.to_string(),
                message: "disk full".to_string(),
            })
        });
        let (manager, project) = setup(git).await;

        let err = manager.create_branch(project.id, "feat", Some("main")).await.unwrap_err();
        assert!(matches!(err, Error::WorktreeCreationFailed { .. }));

        let slots = manager.list_visible(project.id).await.unwrap();
        assert!(matches!(
            &slots[..],
            [BranchSlot::Failed { error, .. }] if error.contains("disk full")
        ));

        assert!(manager.dismiss_failed_creation(project.id, "feat"));
        assert!(manager.list_visible(project.id).await.unwrap().is_empty());
        assert!(!manager.dismiss_failed_creation(project.id, "feat"));
    }

    #[tokio::test]
    async fn existing_branch_name_conflicts_without_touching_git() {
        let mut git = MockGitService::new();
        git.expect_create_worktree().times(1).returning(|_, _, _, _| Ok(()));
        let (manager, project) = setup(git).await;

        let branch = manager.create_branch(project.id, "feat", Some("main")).await.unwrap();
        let err = manager.create_branch(project.id, "feat", Some("main")).await.unwrap_err();
        assert!(matches!(err, Error::BranchNameConflict { .. }));

        // The existing branch and the failed attempt are both shown
        let slots = manager.list_visible(project.id).await.unwrap();
        assert_eq!(slots.len(), 2);
        assert!(matches!(&slots[0], BranchSlot::Committed { branch: b, .. } if b.id == branch.id));
        assert!(matches!(
            &slots[1],
            BranchSlot::Failed { pending, error }
                if pending.branch_name == "feat" && error.contains("already exists")
        ));

        assert!(manager.dismiss_failed_creation(project.id, "feat"));
        assert!(matches!(
            &manager.list_visible(project.id).await.unwrap()[..],
            [BranchSlot::Committed { .. }]
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn in_flight_creation_shows_pending_then_the_branch() {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let mut entered_tx = Some(entered_tx);
        let mut git = MockGitService::new();
        git.expect_create_worktree()
            .times(1)
            .returning(move |_, _, _, _| {
                if let Some(tx) = entered_tx.take() {
                    let _ = tx.send(());
                }
                release_rx.recv().unwrap();
                Ok(())
            });
        let (manager, project) = setup(git).await;
        let manager = Arc::new(manager);
        let project_id = project.id;

        let creating = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.create_branch(project_id, "feat", Some("main")).await }
        });
        entered_rx.await.unwrap();

        let slots = manager.list_visible(project_id).await.unwrap();
        assert!(matches!(
            &slots[..],
            [BranchSlot::Pending(pending)]
                if pending.branch_name == "feat" && pending.base_branch.as_deref() == Some("main")
        ));
        let err = manager.create_branch(project_id, "feat", Some("main")).await.unwrap_err();
        assert!(matches!(err, Error::CreationInProgress { .. }));

        release_tx.send(()).unwrap();
        let branch = creating.await.unwrap().unwrap();

        let slots = manager.list_visible(project_id).await.unwrap();
        assert!(matches!(
            &slots[..],
            [BranchSlot::Committed { branch: b, deletion: DeletionState::Idle }] if b.id == branch.id
        ));
    }

    #[tokio::test]
    async fn failed_deletion_keeps_branch_and_records_error() {
        let mut git = MockGitService::new();
        git.expect_create_worktree().returning(|_, _, _, _| Ok(()));
        let mut attempts = 0;
        git.expect_remove_worktree()
            .times(2)
            .returning(move |_, path, _| {
                attempts += 1;
                if attempts == 1 {
                    Err(Error::WorktreeRemovalFailed {
                        path: path.to_path_buf(),
                        message: "busy".to_string(),
                    })
                } else {
                    Ok(())
                }
            });
        let (manager, project) = setup(git).await;
        let branch = manager.create_branch(project.id, "feat", Some("main")).await.unwrap();
        let session = store::create_session(
            manager.store.pool(),
            CreateSession {
                branch_id: branch.id,
                ai_session_id: "ai-1".to_string(),
                prompt: "work".to_string(),
                base_sha: None,
            },
        )
        .await
        .unwrap();

        let err = manager.delete_branch(branch.id).await.unwrap_err();
        assert!(matches!(err, Error::WorktreeRemovalFailed { .. }));

        assert!(!manager.deleting_ids().contains(&branch.id));
        assert!(manager.delete_errors().contains_key(&branch.id));
        assert_eq!(manager.get(branch.id).await.unwrap(), branch);
        // The cascade was rolled back with the record
        assert_eq!(store::get_session(manager.store.pool(), session.id).await.unwrap(), session);

        // Retrying clears the error and removes the branch
        manager.delete_branch(branch.id).await.unwrap();
        assert!(manager.delete_errors().is_empty());
        assert!(matches!(manager.get(branch.id).await, Err(Error::BranchNotFound { .. })));
        assert!(manager.list_visible(project.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_is_rejected_while_one_is_in_flight() {
        let mut git = MockGitService::new();
        git.expect_create_worktree().returning(|_, _, _, _| Ok(()));
        git.expect_remove_worktree().never();
        let (manager, project) = setup(git).await;
        let branch = manager.create_branch(project.id, "feat", Some("main")).await.unwrap();

        manager.board().deletions.insert(branch.id, DeletionState::Deleting);

        let err = manager.delete_branch(branch.id).await.unwrap_err();
        assert!(matches!(err, Error::DeleteInProgress { .. }));
        assert!(manager.deleting_ids().contains(&branch.id));
    }

    #[tokio::test]
    async fn set_base_branch_signals_commit_invalidation() {
        let mut git = MockGitService::new();
        git.expect_create_worktree().returning(|_, _, _, _| Ok(()));
        let (manager, project) = setup(git).await;
        let branch = manager.create_branch(project.id, "feat", Some("main")).await.unwrap();
        let mut events = manager.bus.subscribe();

        let updated = manager.set_base_branch(branch.id, "develop").await.unwrap();

        assert_eq!(updated.base_branch, "develop");
        assert_eq!(
            events.recv().await.unwrap(),
            BranchEvent::BaseBranchChanged { branch_id: branch.id }
        );
    }
}
