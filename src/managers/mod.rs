pub mod branch;
pub mod note;
pub mod session;
pub mod view;

pub use branch::*;
pub use note::*;
pub use session::*;
pub use view::*;

/// Result of an idempotent recovery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery<T> {
    /// The record moved to a terminal status during this call
    Finalized(T),
    /// Nothing left to do; another path already finished it
    AlreadyTerminal,
    /// The agent has not finished yet
    NotReady,
}

/// Activity of a branch's in-flight record as the UI should show it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liveness<T> {
    Idle,
    Active(T),
    /// Persisted as active but the agent no longer knows the session
    Stuck(T),
}

impl<T> Liveness<T> {
    pub fn record(&self) -> Option<&T> {
        match self {
            Liveness::Idle => None,
            Liveness::Active(record) | Liveness::Stuck(record) => Some(record),
        }
    }

    pub fn is_stuck(&self) -> bool {
        matches!(self, Liveness::Stuck(_))
    }
}
