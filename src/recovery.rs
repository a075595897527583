//! Finalizes sessions and notes whose agent went idle.
//!
//! Two paths lead here: the agent runner's status stream (one subscription for
//! the whole process) and [`RecoveryCoordinator::recover_branch`], run when a
//! branch view opens. Both end in the managers' idempotent recovery entry
//! points.

use crate::backends::traits::{AgentBackend, AgentStatus, StatusEvent};
use crate::error::Result;
use crate::managers::{Liveness, NoteManager, Recovery, SessionManager};
use crate::store::models::{BranchNote, BranchSession};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Not an idle event
    Ignored,
    /// Idle event for an agent session this process does not track
    Unrelated,
    Session(Recovery<BranchSession>),
    Note(Recovery<BranchNote>),
}

/// Liveness of everything in flight on one branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchActivity {
    pub session: Liveness<BranchSession>,
    pub note: Liveness<BranchNote>,
}

impl BranchActivity {
    pub fn is_idle(&self) -> bool {
        matches!(
            (&self.session, &self.note),
            (Liveness::Idle, Liveness::Idle)
        )
    }
}

pub struct RecoveryCoordinator {
    sessions: Arc<SessionManager>,
    notes: Arc<NoteManager>,
    agent: Arc<dyn AgentBackend>,
}

impl RecoveryCoordinator {
    pub fn new(sessions: Arc<SessionManager>, notes: Arc<NoteManager>, agent: Arc<dyn AgentBackend>) -> Self {
        Self {
            sessions,
            notes,
            agent,
        }
    }

    pub async fn handle_event(&self, event: &StatusEvent) -> Result<RecoveryOutcome> {
        if event.status != AgentStatus::Idle {
            return Ok(RecoveryOutcome::Ignored);
        }

        if let Some(recovery) = self.sessions.recover_for_agent(&event.session_id).await? {
            return Ok(RecoveryOutcome::Session(recovery));
        }

        if let Some(recovery) = self.notes.recover_for_agent(&event.session_id).await? {
            return Ok(RecoveryOutcome::Note(recovery));
        }

        Ok(RecoveryOutcome::Unrelated)
    }

    /// Consume status events until the stream closes. Per-event failures are
    /// logged and never end the loop.
    pub async fn run(&self, mut events: broadcast::Receiver<StatusEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => match self.handle_event(&event).await {
                    Ok(RecoveryOutcome::Ignored) | Ok(RecoveryOutcome::Unrelated) => {}
                    Ok(outcome) => {
                        debug!(ai_session_id = %event.session_id, ?outcome, "Handled idle event")
                    }
                    Err(e) => {
                        error!(ai_session_id = %event.session_id, error = %e, "Recovery failed")
                    }
                },
                Err(RecvError::Lagged(missed)) => {
                    // recover_branch on view open picks up anything dropped here
                    warn!(missed, "Status listener lagged behind");
                }
                Err(RecvError::Closed) => {
                    info!("Status stream closed");
                    break;
                }
            }
        }
    }

    /// Liveness of the branch's running session and generating note
    pub async fn check_branch_liveness(&self, branch_id: i64) -> Result<BranchActivity> {
        Ok(BranchActivity {
            session: self.sessions.check_liveness(branch_id).await?,
            note: self.notes.check_liveness(branch_id).await?,
        })
    }

    /// Liveness check that also finalizes work whose idle event never
    /// reached the listener.
    ///
    /// Records whose agent is still known get a recovery attempt; an agent
    /// that is still running makes it a no-op. Stuck records are left for
    /// the user to restart or discard.
    pub async fn recover_branch(&self, branch_id: i64) -> Result<BranchActivity> {
        let activity = self.check_branch_liveness(branch_id).await?;
        let mut finalized = false;

        if let Liveness::Active(session) = &activity.session {
            match self.sessions.recover_orphaned(branch_id).await {
                Ok(Recovery::Finalized(_)) => {
                    info!(session_id = session.id, "Finalized session on liveness check");
                    finalized = true;
                }
                Ok(_) => {}
                Err(e) => warn!(session_id = session.id, error = %e, "Session recovery failed"),
            }
        }

        if let Liveness::Active(note) = &activity.note {
            match self.notes.recover_orphaned(branch_id).await {
                Ok(Recovery::Finalized(_)) => {
                    info!(note_id = note.id, "Finalized note on liveness check");
                    finalized = true;
                }
                Ok(_) => {}
                Err(e) => warn!(note_id = note.id, error = %e, "Note recovery failed"),
            }
        }

        if finalized {
            self.check_branch_liveness(branch_id).await
        } else {
            Ok(activity)
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.agent.subscribe()
    }
}

/// The single process-wide subscription to the agent status stream.
///
/// Started on first use and torn down with [`StatusListener::shutdown`].
#[derive(Default)]
pub struct StatusListener {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StatusListener {
    pub fn new() -> Self {
        Self::default()
    }

    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe once. Returns false when a listener is already running.
    pub fn ensure_started(&self, coordinator: Arc<RecoveryCoordinator>) -> bool {
        let mut task = self.task();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        let events = coordinator.subscribe();
        *task = Some(tokio::spawn(async move { coordinator.run(events).await }));
        debug!("Status listener started");
        true
    }

    pub fn is_running(&self) -> bool {
        self.task().as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub async fn shutdown(&self) {
        let handle = self.task().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
            debug!("Status listener stopped");
        }
    }
}
