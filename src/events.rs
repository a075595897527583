//! Refresh signals published by the managers after they change persisted state.

use tokio::sync::broadcast;
use tracing::trace;

const BUS_CAPACITY: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchEvent {
    /// Branch list of a project changed (created, deleted, failed, dismissed)
    BranchesChanged { project_id: i64 },
    CommitsChanged { branch_id: i64 },
    BaseBranchChanged { branch_id: i64 },
    SessionChanged { branch_id: i64, session_id: i64 },
    NoteChanged { branch_id: i64, note_id: i64 },
}

impl BranchEvent {
    pub fn branch_id(&self) -> Option<i64> {
        match self {
            BranchEvent::BranchesChanged { .. } => None,
            BranchEvent::CommitsChanged { branch_id }
            | BranchEvent::BaseBranchChanged { branch_id }
            | BranchEvent::SessionChanged { branch_id, .. }
            | BranchEvent::NoteChanged { branch_id, .. } => Some(*branch_id),
        }
    }
}

/// Fan-out of [`BranchEvent`]s to every open view
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BranchEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: BranchEvent) {
        trace!(?event, "Publishing branch event");
        // No open views is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BranchEvent> {
        self.sender.subscribe()
    }
}
