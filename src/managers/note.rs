use crate::backends::traits::{AgentBackend, TranscriptOutcome};
use crate::error::{Error, Result};
use crate::events::{BranchEvent, EventBus};
use crate::managers::{Liveness, Recovery};
use crate::store::models::{BranchNote, CreateNote, NoteOutcome, NoteStatus};
use crate::store::{self, Store};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Drives `BranchNote`s through `generating → {complete, error}`.
/// Notes never touch the worktree's history, so there is no commit handling here.
pub struct NoteManager {
    store: Store,
    agent: Arc<dyn AgentBackend>,
    bus: EventBus,
}

impl NoteManager {
    pub fn new(store: Store, agent: Arc<dyn AgentBackend>, bus: EventBus) -> Self {
        Self {
            store,
            agent,
            bus,
        }
    }

    fn changed(&self, branch_id: i64, note_id: i64) {
        self.bus.publish(BranchEvent::NoteChanged { branch_id, note_id });
    }

    #[instrument(skip(self, prompt))]
    pub async fn start_note(&self, branch_id: i64, title: &str, prompt: &str) -> Result<BranchNote> {
        let _guard = self.store.transitions().await;

        let branch = store::get_branch(self.store.pool(), branch_id).await?;
        if store::get_generating_note(self.store.pool(), branch_id)
            .await?
            .is_some()
        {
            return Err(Error::NoteAlreadyGenerating { branch_id });
        }
        if store::get_running_session(self.store.pool(), branch_id)
            .await?
            .is_some()
        {
            return Err(Error::SessionAlreadyRunning { branch_id });
        }

        let ai_session_id = self.agent.start(prompt, &branch.worktree_path).await?;

        let created = store::create_note(
            self.store.pool(),
            CreateNote {
                branch_id,
                ai_session_id: ai_session_id.clone(),
                title: title.to_string(),
            },
        )
        .await;

        let note = match created {
            Ok(note) => note,
            Err(e) => {
                if let Err(stop_err) = self.agent.stop(&ai_session_id).await {
                    warn!(error = %stop_err, "Failed to stop agent after store error");
                }
                return Err(e);
            }
        };

        info!(note_id = note.id, ai_session_id = %ai_session_id, "Note generation started");
        self.changed(branch_id, note.id);
        Ok(note)
    }

    /// Abandon a generating (or stuck) note: stop its agent and drop the record
    #[instrument(skip(self))]
    pub async fn discard_note(&self, note_id: i64) -> Result<()> {
        let _guard = self.store.transitions().await;

        let note = store::get_note(self.store.pool(), note_id).await?;
        if note.status != NoteStatus::Generating {
            return Err(Error::InvalidTransition {
                entity: "note",
                id: note_id,
                status: note.status.to_string(),
                action: "discard",
            });
        }

        if let Err(e) = self.agent.stop(&note.ai_session_id).await {
            warn!(ai_session_id = %note.ai_session_id, error = %e, "Failed to stop agent");
        }

        store::delete_note(self.store.pool(), note_id).await?;
        info!("Note discarded");
        self.changed(note.branch_id, note_id);
        Ok(())
    }

    /// Delete a finished note from the timeline
    #[instrument(skip(self))]
    pub async fn delete_note(&self, note_id: i64) -> Result<()> {
        let _guard = self.store.transitions().await;

        let note = store::get_note(self.store.pool(), note_id).await?;
        if note.status == NoteStatus::Generating {
            return Err(Error::InvalidTransition {
                entity: "note",
                id: note_id,
                status: note.status.to_string(),
                action: "delete",
            });
        }

        store::delete_note(self.store.pool(), note_id).await?;
        self.changed(note.branch_id, note_id);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn recover_orphaned(&self, branch_id: i64) -> Result<Recovery<BranchNote>> {
        let _guard = self.store.transitions().await;

        match store::get_generating_note(self.store.pool(), branch_id).await? {
            Some(note) => self.finalize(note).await,
            None => Ok(Recovery::AlreadyTerminal),
        }
    }

    /// Recovery entry for the status stream. `None` when no note owns `ai_session_id`.
    #[instrument(skip(self))]
    pub async fn recover_for_agent(&self, ai_session_id: &str) -> Result<Option<Recovery<BranchNote>>> {
        let _guard = self.store.transitions().await;

        let Some(note) = store::get_branch_note_by_ai_session(self.store.pool(), ai_session_id).await?
        else {
            return Ok(None);
        };

        if note.status != NoteStatus::Generating {
            return Ok(Some(Recovery::AlreadyTerminal));
        }

        self.finalize(note).await.map(Some)
    }

    async fn finalize(&self, note: BranchNote) -> Result<Recovery<BranchNote>> {
        let transcript = self.agent.transcript(&note.ai_session_id).await?;

        let outcome = match transcript.outcome {
            TranscriptOutcome::Running => return Ok(Recovery::NotReady),
            TranscriptOutcome::Failed { message } => NoteOutcome::Error { message },
            TranscriptOutcome::Finished if transcript.output.trim().is_empty() => NoteOutcome::Error {
                message: "Agent returned an empty note".to_string(),
            },
            TranscriptOutcome::Finished => NoteOutcome::Complete {
                content: transcript.output.trim().to_string(),
            },
        };

        if !store::finish_note(self.store.pool(), note.id, &outcome).await? {
            return Ok(Recovery::AlreadyTerminal);
        }

        let note = store::get_note(self.store.pool(), note.id).await?;
        info!(note_id = note.id, status = %note.status, "Note finalized");
        self.changed(note.branch_id, note.id);
        Ok(Recovery::Finalized(note))
    }

    #[instrument(skip(self))]
    pub async fn check_liveness(&self, branch_id: i64) -> Result<Liveness<BranchNote>> {
        let Some(note) = store::get_generating_note(self.store.pool(), branch_id).await? else {
            return Ok(Liveness::Idle);
        };

        let alive = match self.agent.is_alive(&note.ai_session_id).await {
            Ok(alive) => alive,
            Err(e) => {
                warn!(ai_session_id = %note.ai_session_id, error = %e, "Liveness check failed");
                false
            }
        };

        if alive {
            Ok(Liveness::Active(note))
        } else {
            debug!(note_id = note.id, "Note is stuck");
            Ok(Liveness::Stuck(note))
        }
    }

    pub async fn list(&self, branch_id: i64) -> Result<Vec<BranchNote>> {
        store::list_branch_notes(self.store.pool(), branch_id).await
    }

    pub async fn get(&self, note_id: i64) -> Result<BranchNote> {
        store::get_note(self.store.pool(), note_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::traits::{MockAgentBackend, Transcript};
    use crate::managers::testing::seed_branch;
    use crate::store::models::Branch;

    async fn setup(agent: MockAgentBackend) -> (NoteManager, Branch) {
        let store = Store::open_in_memory().await.unwrap();
        let branch = seed_branch(&store).await;
        (NoteManager::new(store, Arc::new(agent), EventBus::new()), branch)
    }

    fn starting(agent: &mut MockAgentBackend) {
        let mut n = 0;
        agent.expect_start().returning(move |_, _| {
            n += 1;
            Ok(format!("note-ai-{}", n))
        });
    }

    #[tokio::test]
    async fn only_one_note_generates_per_branch() {
        let mut agent = MockAgentBackend::new();
        starting(&mut agent);
        let (manager, branch) = setup(agent).await;

        let note = manager.start_note(branch.id, "Summary", "summarize").await.unwrap();
        assert_eq!(note.status, NoteStatus::Generating);

        let err = manager.start_note(branch.id, "Again", "summarize").await.unwrap_err();
        assert!(matches!(err, Error::NoteAlreadyGenerating { .. }));
    }

    #[tokio::test]
    async fn finished_transcript_completes_note_once() {
        let mut agent = MockAgentBackend::new();
        starting(&mut agent);
        agent
            .expect_transcript()
            .times(1)
            .returning(|_| Ok(Transcript::finished("  The branch adds a greeting.\n")));
        let (manager, branch) = setup(agent).await;
        let note = manager.start_note(branch.id, "Summary", "summarize").await.unwrap();

        let Some(Recovery::Finalized(done)) = manager.recover_for_agent(&note.ai_session_id).await.unwrap()
        else {
            panic!("expected finalized");
        };
        assert_eq!(done.status, NoteStatus::Complete);
        assert_eq!(done.content, "The branch adds a greeting.");

        assert_eq!(
            manager.recover_for_agent(&note.ai_session_id).await.unwrap(),
            Some(Recovery::AlreadyTerminal)
        );
        assert_eq!(manager.recover_orphaned(branch.id).await.unwrap(), Recovery::AlreadyTerminal);
    }

    #[tokio::test]
    async fn failed_transcript_records_error() {
        let mut agent = MockAgentBackend::new();
        starting(&mut agent);
        agent
            .expect_transcript()
            .returning(|_| Ok(Transcript::failed("context too long")));
        let (manager, branch) = setup(agent).await;
        manager.start_note(branch.id, "Summary", "summarize").await.unwrap();

        let Recovery::Finalized(note) = manager.recover_orphaned(branch.id).await.unwrap() else {
            panic!("expected finalized");
        };

        assert_eq!(note.status, NoteStatus::Error);
        assert_eq!(note.error_message.as_deref(), Some("context too long"));
        // A new note may start once the previous one is terminal
        manager.start_note(branch.id, "Retry", "summarize").await.unwrap();
    }

    #[tokio::test]
    async fn discard_and_delete_respect_status() {
        let mut agent = MockAgentBackend::new();
        starting(&mut agent);
        agent.expect_stop().times(1).returning(|_| Ok(()));
        agent
            .expect_transcript()
            .returning(|_| Ok(Transcript::finished("done")));
        let (manager, branch) = setup(agent).await;

        let generating = manager.start_note(branch.id, "First", "p").await.unwrap();
        let err = manager.delete_note(generating.id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { action: "delete", .. }));

        manager.discard_note(generating.id).await.unwrap();
        assert!(matches!(manager.get(generating.id).await, Err(Error::NoteNotFound { .. })));

        let note = manager.start_note(branch.id, "Second", "p").await.unwrap();
        manager.recover_orphaned(branch.id).await.unwrap();
        let err = manager.discard_note(note.id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { action: "discard", .. }));

        manager.delete_note(note.id).await.unwrap();
        assert!(manager.list(branch.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_agent_session_is_stuck() {
        let mut agent = MockAgentBackend::new();
        starting(&mut agent);
        agent.expect_is_alive().returning(|_| Ok(false));
        let (manager, branch) = setup(agent).await;
        let note = manager.start_note(branch.id, "Summary", "p").await.unwrap();

        let liveness = manager.check_liveness(branch.id).await.unwrap();

        assert!(liveness.is_stuck());
        assert_eq!(liveness.record(), Some(&note));
    }
}
