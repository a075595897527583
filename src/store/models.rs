use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitProject {
    pub id: i64,
    pub repo_path: PathBuf,
    /// Directory inside a monorepo the project is scoped to
    pub subpath: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct CreateProject {
    pub repo_path: PathBuf,
    pub subpath: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: i64,
    pub project_id: i64,
    pub branch_name: String,
    pub base_branch: String,
    pub worktree_path: PathBuf,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct CreateBranch {
    pub project_id: i64,
    pub branch_name: String,
    pub base_branch: String,
    pub worktree_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Running,
    Completed,
    Discarded,
    /// Finished without producing a commit, or the agent reported failure
    Failed,
}

impl SessionStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(SessionStatus::Running),
            "completed" => Some(SessionStatus::Completed),
            "discarded" => Some(SessionStatus::Discarded),
            "failed" => Some(SessionStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Discarded => "discarded",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSession {
    pub id: i64,
    pub branch_id: i64,
    pub ai_session_id: String,
    pub prompt: String,
    pub status: SessionStatus,
    pub commit_sha: Option<String>,
    /// HEAD of the worktree when the session was started
    pub base_sha: Option<String>,
    pub error_message: Option<String>,
    /// Unix milliseconds
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct CreateSession {
    pub branch_id: i64,
    pub ai_session_id: String,
    pub prompt: String,
    pub base_sha: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteStatus {
    Generating,
    Complete,
    Error,
}

impl NoteStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "generating" => Some(NoteStatus::Generating),
            "complete" => Some(NoteStatus::Complete),
            "error" => Some(NoteStatus::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NoteStatus::Generating => "generating",
            NoteStatus::Complete => "complete",
            NoteStatus::Error => "error",
        }
    }
}

impl fmt::Display for NoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchNote {
    pub id: i64,
    pub branch_id: i64,
    pub ai_session_id: String,
    pub title: String,
    pub content: String,
    pub status: NoteStatus,
    /// Unix milliseconds
    pub created_at: i64,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateNote {
    pub branch_id: i64,
    pub ai_session_id: String,
    pub title: String,
}

/// Terminal outcome written by a guarded status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Completed { commit_sha: String },
    Failed { message: String },
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteOutcome {
    Complete { content: String },
    Error { message: String },
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
