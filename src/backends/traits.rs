use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;
use tokio::sync::broadcast;

/// Status reported by the agent runner's out-of-band event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentStatus {
    Running,
    Idle,
    Other(String),
}

impl AgentStatus {
    pub fn from_str(s: &str) -> Self {
        match s {
            "running" | "busy" => AgentStatus::Running,
            "idle" => AgentStatus::Idle,
            other => AgentStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AgentStatus::Running => "running",
            AgentStatus::Idle => "idle",
            AgentStatus::Other(s) => s,
        }
    }
}

/// One status change for an opaque agent session id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub session_id: String,
    pub status: AgentStatus,
}

impl StatusEvent {
    pub fn idle(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            status: AgentStatus::Idle,
        }
    }

    pub fn running(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            status: AgentStatus::Running,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptOutcome {
    /// Agent has not finished yet
    Running,
    Finished,
    Failed { message: String },
}

/// What an agent session produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub outcome: TranscriptOutcome,
    pub output: String,
}

/// Longest commit subject taken from a transcript
const SUBJECT_MAX_CHARS: usize = 72;

impl Transcript {
    pub fn finished(output: impl Into<String>) -> Self {
        Self {
            outcome: TranscriptOutcome::Finished,
            output: output.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            outcome: TranscriptOutcome::Failed {
                message: message.into(),
            },
            output: String::new(),
        }
    }

    /// First non-empty output line, trimmed to a commit subject
    pub fn commit_subject(&self) -> Option<String> {
        first_line(&self.output)
    }
}

pub(crate) fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.chars().take(SUBJECT_MAX_CHARS).collect())
}

/// External runner for AI sessions, addressed by opaque session id
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Start a session for `prompt` inside `working_dir`, returning its id
    async fn start(&self, prompt: &str, working_dir: &Path) -> Result<String>;

    /// Output and outcome of a session
    async fn transcript(&self, session_id: &str) -> Result<Transcript>;

    /// Whether the runner still knows this session
    async fn is_alive(&self, session_id: &str) -> Result<bool>;

    /// Ask the runner to stop a session; unknown ids are ignored
    async fn stop(&self, session_id: &str) -> Result<()>;

    /// Subscribe to the status event stream
    fn subscribe(&self) -> broadcast::Receiver<StatusEvent>;
}
