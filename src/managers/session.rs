use crate::backends::traits::{first_line, AgentBackend, TranscriptOutcome};
use crate::error::{Error, Result};
use crate::events::{BranchEvent, EventBus};
use crate::git::GitService;
use crate::managers::{Liveness, Recovery};
use crate::store::models::{BranchSession, CreateSession, SessionOutcome, SessionStatus};
use crate::store::{self, Store};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Drives `BranchSession`s through `running → {completed, failed, discarded}`.
///
/// Every transition re-reads the persisted status under the store's transition
/// lock, and the store only moves rows that are still `running`, so the event
/// stream and the liveness path can both call into recovery without
/// double-applying it.
pub struct SessionManager {
    store: Store,
    git: Arc<dyn GitService>,
    agent: Arc<dyn AgentBackend>,
    bus: EventBus,
    fallback_message: String,
}

impl SessionManager {
    pub fn new(
        store: Store,
        git: Arc<dyn GitService>,
        agent: Arc<dyn AgentBackend>,
        bus: EventBus,
        fallback_message: impl Into<String>,
    ) -> Self {
        Self {
            store,
            git,
            agent,
            bus,
            fallback_message: fallback_message.into(),
        }
    }

    fn changed(&self, session: &BranchSession) {
        self.bus.publish(BranchEvent::SessionChanged {
            branch_id: session.branch_id,
            session_id: session.id,
        });
    }

    #[instrument(skip(self, prompt))]
    pub async fn start_session(&self, branch_id: i64, prompt: &str) -> Result<BranchSession> {
        let _guard = self.store.transitions().await;

        let branch = store::get_branch(self.store.pool(), branch_id).await?;
        if store::get_running_session(self.store.pool(), branch_id)
            .await?
            .is_some()
        {
            return Err(Error::SessionAlreadyRunning { branch_id });
        }
        if store::get_generating_note(self.store.pool(), branch_id)
            .await?
            .is_some()
        {
            return Err(Error::NoteAlreadyGenerating { branch_id });
        }

        let base_sha = self.git.head_sha(&branch.worktree_path).await?;
        let ai_session_id = self.agent.start(prompt, &branch.worktree_path).await?;
        debug!(ai_session_id = %ai_session_id, "Agent session started");

        let created = store::create_session(
            self.store.pool(),
            CreateSession {
                branch_id,
                ai_session_id: ai_session_id.clone(),
                prompt: prompt.to_string(),
                base_sha,
            },
        )
        .await;

        let session = match created {
            Ok(session) => session,
            Err(e) => {
                if let Err(stop_err) = self.agent.stop(&ai_session_id).await {
                    warn!(error = %stop_err, "Failed to stop agent after store error");
                }
                return Err(e);
            }
        };

        info!(session_id = session.id, "Session started");
        self.changed(&session);
        Ok(session)
    }

    /// Discard a running (or stuck) session and stop its agent
    #[instrument(skip(self))]
    pub async fn cancel_session(&self, session_id: i64) -> Result<BranchSession> {
        let _guard = self.store.transitions().await;

        let session = store::get_session(self.store.pool(), session_id).await?;
        if session.status != SessionStatus::Running
            || !store::finish_session(self.store.pool(), session_id, &SessionOutcome::Discarded).await?
        {
            return Err(Error::InvalidTransition {
                entity: "session",
                id: session_id,
                status: session.status.to_string(),
                action: "cancel",
            });
        }

        if let Err(e) = self.agent.stop(&session.ai_session_id).await {
            warn!(ai_session_id = %session.ai_session_id, error = %e, "Failed to stop agent");
        }

        info!("Session discarded");
        let session = store::get_session(self.store.pool(), session_id).await?;
        self.changed(&session);
        Ok(session)
    }

    /// Start a fresh agent for a stuck session, keeping the record's id.
    ///
    /// The stored prompt is reused unless `prompt` overrides it.
    #[instrument(skip(self, prompt))]
    pub async fn restart_session(&self, session_id: i64, prompt: Option<&str>) -> Result<BranchSession> {
        let _guard = self.store.transitions().await;

        let session = store::get_session(self.store.pool(), session_id).await?;
        let stuck = session.status == SessionStatus::Running
            && !self.agent_alive(&session.ai_session_id).await;
        if !stuck {
            return Err(Error::InvalidTransition {
                entity: "session",
                id: session_id,
                status: session.status.to_string(),
                action: "restart",
            });
        }

        let branch = store::get_branch(self.store.pool(), session.branch_id).await?;
        let prompt = prompt.unwrap_or(&session.prompt);
        let ai_session_id = self.agent.start(prompt, &branch.worktree_path).await?;

        if !store::restart_session(self.store.pool(), session_id, &ai_session_id, prompt).await? {
            if let Err(e) = self.agent.stop(&ai_session_id).await {
                warn!(error = %e, "Failed to stop replacement agent");
            }
            return Err(Error::InvalidTransition {
                entity: "session",
                id: session_id,
                status: SessionStatus::Running.to_string(),
                action: "restart",
            });
        }

        info!(ai_session_id = %ai_session_id, "Session restarted");
        let session = store::get_session(self.store.pool(), session_id).await?;
        self.changed(&session);
        Ok(session)
    }

    /// Remove a completed session's commit together with everything newer
    #[instrument(skip(self))]
    pub async fn delete_commit_and_session(&self, session_id: i64) -> Result<usize> {
        let session = store::get_session(self.store.pool(), session_id).await?;
        match (&session.status, &session.commit_sha) {
            (SessionStatus::Completed, Some(sha)) => self.delete_commit(session.branch_id, sha).await,
            _ => Err(Error::InvalidTransition {
                entity: "session",
                id: session_id,
                status: session.status.to_string(),
                action: "delete the commit of",
            }),
        }
    }

    /// Reset the branch to the parent of `sha`, discarding the sessions of
    /// every removed commit. Returns how many commits were removed.
    ///
    /// Views must reload commits afterwards; a `CommitsChanged` event is published.
    #[instrument(skip(self))]
    pub async fn delete_commit(&self, branch_id: i64, sha: &str) -> Result<usize> {
        let _guard = self.store.transitions().await;

        let branch = store::get_branch(self.store.pool(), branch_id).await?;
        if store::get_running_session(self.store.pool(), branch_id)
            .await?
            .is_some()
        {
            return Err(Error::SessionAlreadyRunning { branch_id });
        }

        let commits = self
            .git
            .list_commits(&branch.worktree_path, &branch.base_branch)
            .await?;
        let position = commits
            .iter()
            .position(|c| c.sha == sha)
            .ok_or_else(|| Error::CommitNotFound {
                branch_id,
                sha: sha.to_string(),
            })?;

        self.git
            .reset_to_commit(&branch.worktree_path, &format!("{}~1", sha))
            .await?;

        for commit in &commits[..=position] {
            let Some(session) =
                store::get_session_for_commit(self.store.pool(), branch_id, &commit.sha).await?
            else {
                continue;
            };
            if store::discard_completed_session(self.store.pool(), session.id).await? {
                debug!(session_id = session.id, sha = %commit.short_sha, "Discarded session of removed commit");
                self.changed(&session);
            }
        }

        info!(removed = position + 1, "Commits deleted");
        self.bus.publish(BranchEvent::CommitsChanged { branch_id });
        Ok(position + 1)
    }

    /// Finalize the branch's running session from its agent transcript.
    ///
    /// Safe to call any number of times; only the first call that sees a
    /// finished transcript changes anything.
    #[instrument(skip(self))]
    pub async fn recover_orphaned(&self, branch_id: i64) -> Result<Recovery<BranchSession>> {
        let _guard = self.store.transitions().await;

        match store::get_running_session(self.store.pool(), branch_id).await? {
            Some(session) => self.finalize(session).await,
            None => Ok(Recovery::AlreadyTerminal),
        }
    }

    /// Recovery entry for the status stream. `None` when no session owns `ai_session_id`.
    #[instrument(skip(self))]
    pub async fn recover_for_agent(&self, ai_session_id: &str) -> Result<Option<Recovery<BranchSession>>> {
        let _guard = self.store.transitions().await;

        let Some(session) =
            store::get_branch_session_by_ai_session(self.store.pool(), ai_session_id).await?
        else {
            return Ok(None);
        };

        if session.status.is_terminal() {
            debug!(session_id = session.id, status = %session.status, "Session already finalized");
            return Ok(Some(Recovery::AlreadyTerminal));
        }

        self.finalize(session).await.map(Some)
    }

    async fn finalize(&self, session: BranchSession) -> Result<Recovery<BranchSession>> {
        let transcript = self.agent.transcript(&session.ai_session_id).await?;

        let outcome = match transcript.outcome {
            TranscriptOutcome::Running => return Ok(Recovery::NotReady),
            TranscriptOutcome::Failed { ref message } => SessionOutcome::Failed {
                message: message.clone(),
            },
            TranscriptOutcome::Finished => {
                let message = transcript
                    .commit_subject()
                    .or_else(|| first_line(&session.prompt))
                    .unwrap_or_else(|| self.fallback_message.clone());
                match self.produced_commit(&session, &message).await? {
                    Some(commit_sha) => SessionOutcome::Completed { commit_sha },
                    None => SessionOutcome::Failed {
                        message: "Agent finished without producing a commit".to_string(),
                    },
                }
            }
        };

        if !store::finish_session(self.store.pool(), session.id, &outcome).await? {
            return Ok(Recovery::AlreadyTerminal);
        }

        let session = store::get_session(self.store.pool(), session.id).await?;
        info!(session_id = session.id, status = %session.status, "Session finalized");
        self.changed(&session);
        if session.commit_sha.is_some() {
            self.bus.publish(BranchEvent::CommitsChanged {
                branch_id: session.branch_id,
            });
        }

        Ok(Recovery::Finalized(session))
    }

    /// Commit leftover changes, or take HEAD if the agent committed itself
    async fn produced_commit(&self, session: &BranchSession, message: &str) -> Result<Option<String>> {
        let branch = store::get_branch(self.store.pool(), session.branch_id).await?;

        if let Some(sha) = self.git.commit_all(&branch.worktree_path, message).await? {
            return Ok(Some(sha));
        }

        let head = self.git.head_sha(&branch.worktree_path).await?;
        Ok(head.filter(|sha| session.base_sha.as_deref() != Some(sha.as_str())))
    }

    async fn agent_alive(&self, ai_session_id: &str) -> bool {
        match self.agent.is_alive(ai_session_id).await {
            Ok(alive) => alive,
            Err(e) => {
                let e = Error::LivenessCheckFailed {
                    ai_session_id: ai_session_id.to_string(),
                    message: e.to_string(),
                };
                warn!(error = %e, "Treating session as gone");
                false
            }
        }
    }

    /// Running session of the branch, marked stuck when its agent is gone
    #[instrument(skip(self))]
    pub async fn check_liveness(&self, branch_id: i64) -> Result<Liveness<BranchSession>> {
        let Some(session) = store::get_running_session(self.store.pool(), branch_id).await? else {
            return Ok(Liveness::Idle);
        };

        if self.agent_alive(&session.ai_session_id).await {
            Ok(Liveness::Active(session))
        } else {
            debug!(session_id = session.id, "Session is stuck");
            Ok(Liveness::Stuck(session))
        }
    }

    pub async fn running_session(&self, branch_id: i64) -> Result<Option<BranchSession>> {
        store::get_running_session(self.store.pool(), branch_id).await
    }

    pub async fn list(&self, branch_id: i64) -> Result<Vec<BranchSession>> {
        store::list_sessions(self.store.pool(), branch_id).await
    }

    pub async fn get(&self, session_id: i64) -> Result<BranchSession> {
        store::get_session(self.store.pool(), session_id).await
    }
}
