use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Project not found: {id}. List available projects with: branchwork project list")]
    ProjectNotFound { id: i64 },

    #[error("No project registered for {path}. Add it with: branchwork project add {path}")]
    ProjectNotRegistered { path: PathBuf },

    #[error("Branch not found: {id}")]
    BranchNotFound { id: i64 },

    #[error("No branch named '{name}' in this project. List branches with: branchwork branch list")]
    BranchNameNotFound { name: String },

    #[error("Branch '{branch}' already exists in this project")]
    BranchNameConflict { branch: String },

    #[error("Failed to create worktree for '{branch}': {message}")]
    WorktreeCreationFailed { branch: String, message: String },

    #[error("Failed to remove worktree {path}: {message}")]
    WorktreeRemovalFailed { path: PathBuf, message: String },

    #[error("Branch '{branch}' is already being created")]
    CreationInProgress { branch: String },

    #[error("Branch {branch_id} is already being deleted")]
    DeleteInProgress { branch_id: i64 },

    #[error("A session is already running on branch {branch_id}. Discard it or wait for it to finish")]
    SessionAlreadyRunning { branch_id: i64 },

    #[error("A note is already being generated on branch {branch_id}")]
    NoteAlreadyGenerating { branch_id: i64 },

    #[error("Session {id} not found")]
    SessionNotFound { id: i64 },

    #[error("Note {id} not found")]
    NoteNotFound { id: i64 },

    #[error("Commit {sha} is not on branch {branch_id}")]
    CommitNotFound { branch_id: i64, sha: String },

    #[error("Cannot {action} {entity} {id} while it is {status}")]
    InvalidTransition {
        entity: &'static str,
        id: i64,
        status: String,
        action: &'static str,
    },

    #[error("Liveness check failed for agent session {ai_session_id}: {message}")]
    LivenessCheckFailed { ai_session_id: String, message: String },

    #[error("Agent error: {message}")]
    AgentError { message: String },

    #[error("Git operation failed: {message}")]
    GitError { message: String },

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Database corrupted: {path}. {suggestion}")]
    DatabaseCorrupted { path: PathBuf, suggestion: String },

    #[error("Failed to open database: {path}")]
    DatabaseOpen { path: PathBuf, source: sqlx::Error },

    #[error("Migration failed: {0}")]
    MigrationFailed(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Anyhow error: {0}")]
    AnyhowError(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn git(message: impl Into<String>) -> Self {
        Error::GitError {
            message: message.into(),
        }
    }

    pub(crate) fn agent(message: impl Into<String>) -> Self {
        Error::AgentError {
            message: message.into(),
        }
    }

    /// True when a sqlite unique constraint rejected the write.
    pub(crate) fn is_unique_violation(&self) -> bool {
        match self {
            Error::DatabaseError(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }

    /// True when a trigger aborted the write with `message`.
    pub(crate) fn is_aborted_with(&self, message: &str) -> bool {
        match self {
            Error::DatabaseError(sqlx::Error::Database(db)) => db.message().contains(message),
            _ => false,
        }
    }
}
