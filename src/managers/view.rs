use crate::error::Result;
use crate::events::{BranchEvent, EventBus};
use crate::git::{CommitInfo, GitService};
use crate::recovery::{BranchActivity, RecoveryCoordinator, StatusListener};
use crate::store::models::Branch;
use crate::store::{self, Store};
use crate::timeline::{reconcile, TimelineItem};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, instrument, warn};

/// Commit lists per branch, dropped whenever the branch's history or base moves
#[derive(Default)]
pub struct CommitCache {
    entries: Mutex<HashMap<i64, Vec<CommitInfo>>>,
}

impl CommitCache {
    fn entries(&self) -> MutexGuard<'_, HashMap<i64, Vec<CommitInfo>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, branch_id: i64) -> Option<Vec<CommitInfo>> {
        self.entries().get(&branch_id).cloned()
    }

    pub fn insert(&self, branch_id: i64, commits: Vec<CommitInfo>) {
        self.entries().insert(branch_id, commits);
    }

    pub fn invalidate(&self, branch_id: i64) {
        if self.entries().remove(&branch_id).is_some() {
            debug!(branch_id, "Commit cache invalidated");
        }
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn apply(&self, event: &BranchEvent) {
        match event {
            BranchEvent::CommitsChanged { branch_id } | BranchEvent::BaseBranchChanged { branch_id } => {
                self.invalidate(*branch_id)
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchView {
    pub branch: Branch,
    pub activity: BranchActivity,
    pub timeline: Vec<TimelineItem>,
}

/// Builds what a branch screen shows when it opens.
///
/// Subscribed to the [`EventBus`] from construction; pending refresh signals
/// are applied to the commit cache before it is read.
pub struct BranchViewLoader {
    store: Store,
    git: Arc<dyn GitService>,
    coordinator: Arc<RecoveryCoordinator>,
    listener: Arc<StatusListener>,
    cache: CommitCache,
    events: Mutex<broadcast::Receiver<BranchEvent>>,
}

impl BranchViewLoader {
    pub fn new(
        store: Store,
        git: Arc<dyn GitService>,
        coordinator: Arc<RecoveryCoordinator>,
        listener: Arc<StatusListener>,
        bus: &EventBus,
    ) -> Self {
        Self {
            store,
            git,
            coordinator,
            listener,
            cache: CommitCache::default(),
            events: Mutex::new(bus.subscribe()),
        }
    }

    fn sync_cache(&self) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match events.try_recv() {
                Ok(event) => self.cache.apply(&event),
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(missed, "Missed refresh signals, dropping all cached commits");
                    self.cache.clear();
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    /// Newest-first commits of the branch, from the cache when possible
    pub async fn commits(&self, branch: &Branch) -> Result<Vec<CommitInfo>> {
        self.sync_cache();
        if let Some(commits) = self.cache.get(branch.id) {
            return Ok(commits);
        }

        let commits = self
            .git
            .list_commits(&branch.worktree_path, &branch.base_branch)
            .await?;
        self.cache.insert(branch.id, commits.clone());
        Ok(commits)
    }

    #[instrument(skip(self))]
    pub async fn open(&self, branch_id: i64) -> Result<BranchView> {
        self.listener.ensure_started(Arc::clone(&self.coordinator));

        let branch = store::get_branch(self.store.pool(), branch_id).await?;
        let activity = self.coordinator.recover_branch(branch_id).await?;
        let commits = self.commits(&branch).await?;
        let notes = store::list_branch_notes(self.store.pool(), branch_id).await?;

        let timeline = reconcile(
            &commits,
            &notes,
            activity.session.record(),
            activity.note.record(),
        );

        Ok(BranchView {
            branch,
            activity,
            timeline,
        })
    }
}
