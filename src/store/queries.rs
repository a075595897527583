use super::models::*;
use crate::error::{Error, Result};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::path::{Path, PathBuf};

// Raised by the triggers keeping sessions and notes exclusive per branch
const GENERATING_NOTE_ABORT: &str = "branch has a generating note";
const RUNNING_SESSION_ABORT: &str = "branch has a running session";

fn decode_error(message: String) -> Error {
    Error::DatabaseError(sqlx::Error::Decode(message.into()))
}

impl GitProject {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            repo_path: PathBuf::from(row.try_get::<String, _>("repo_path")?),
            subpath: row.try_get("subpath")?,
            created_at: row.try_get("created_at")?,
        })
    }

    /// Directory the project's tooling runs in (repo root joined with the subpath)
    pub fn working_root(&self) -> PathBuf {
        match &self.subpath {
            Some(sub) => self.repo_path.join(sub),
            None => self.repo_path.clone(),
        }
    }
}

impl Branch {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            branch_name: row.try_get("branch_name")?,
            base_branch: row.try_get("base_branch")?,
            worktree_path: PathBuf::from(row.try_get::<String, _>("worktree_path")?),
            created_at: row.try_get("created_at")?,
        })
    }
}

impl BranchSession {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            branch_id: row.try_get("branch_id")?,
            ai_session_id: row.try_get("ai_session_id")?,
            prompt: row.try_get("prompt")?,
            status: SessionStatus::from_str(&status)
                .ok_or_else(|| decode_error(format!("unknown session status '{}'", status)))?,
            commit_sha: row.try_get("commit_sha")?,
            base_sha: row.try_get("base_sha")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl BranchNote {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            branch_id: row.try_get("branch_id")?,
            ai_session_id: row.try_get("ai_session_id")?,
            title: row.try_get("title")?,
            content: row.try_get("content")?,
            status: NoteStatus::from_str(&status)
                .ok_or_else(|| decode_error(format!("unknown note status '{}'", status)))?,
            created_at: row.try_get("created_at")?,
            error_message: row.try_get("error_message")?,
        })
    }
}

// Projects

pub async fn create_project(pool: &SqlitePool, project: CreateProject) -> Result<GitProject> {
    let id = sqlx::query("INSERT INTO projects (repo_path, subpath) VALUES (?1, ?2)")
        .bind(project.repo_path.to_string_lossy().into_owned())
        .bind(project.subpath)
        .execute(pool)
        .await?
        .last_insert_rowid();

    get_project(pool, id).await
}

pub async fn get_project(pool: &SqlitePool, id: i64) -> Result<GitProject> {
    let row = sqlx::query("SELECT * FROM projects WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(Error::ProjectNotFound { id })?;

    GitProject::from_row(&row)
}

pub async fn find_project(
    pool: &SqlitePool,
    repo_path: &Path,
    subpath: Option<&str>,
) -> Result<Option<GitProject>> {
    let row = sqlx::query(
        "SELECT * FROM projects WHERE repo_path = ?1 AND COALESCE(subpath, '') = COALESCE(?2, '')",
    )
    .bind(repo_path.to_string_lossy().into_owned())
    .bind(subpath)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(GitProject::from_row).transpose()
}

pub async fn list_projects(pool: &SqlitePool) -> Result<Vec<GitProject>> {
    let rows = sqlx::query("SELECT * FROM projects ORDER BY repo_path, subpath")
        .fetch_all(pool)
        .await?;

    rows.iter().map(GitProject::from_row).collect()
}

// Branches

pub async fn create_branch(pool: &SqlitePool, branch: CreateBranch) -> Result<Branch> {
    let id = sqlx::query(
        r#"
        INSERT INTO branches (project_id, branch_name, base_branch, worktree_path)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(branch.project_id)
    .bind(&branch.branch_name)
    .bind(&branch.base_branch)
    .bind(branch.worktree_path.to_string_lossy().into_owned())
    .execute(pool)
    .await
    .map_err(Error::from)
    .map_err(|e| {
        if e.is_unique_violation() {
            Error::BranchNameConflict {
                branch: branch.branch_name.clone(),
            }
        } else {
            e
        }
    })?
    .last_insert_rowid();

    get_branch(pool, id).await
}

pub async fn get_branch(pool: &SqlitePool, id: i64) -> Result<Branch> {
    let row = sqlx::query("SELECT * FROM branches WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(Error::BranchNotFound { id })?;

    Branch::from_row(&row)
}

pub async fn get_branch_by_name(
    pool: &SqlitePool,
    project_id: i64,
    branch_name: &str,
) -> Result<Option<Branch>> {
    let row = sqlx::query("SELECT * FROM branches WHERE project_id = ?1 AND branch_name = ?2")
        .bind(project_id)
        .bind(branch_name)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(Branch::from_row).transpose()
}

pub async fn list_branches(pool: &SqlitePool, project_id: i64) -> Result<Vec<Branch>> {
    let rows = sqlx::query("SELECT * FROM branches WHERE project_id = ?1 ORDER BY branch_name")
        .bind(project_id)
        .fetch_all(pool)
        .await?;

    rows.iter().map(Branch::from_row).collect()
}

pub async fn update_base_branch(pool: &SqlitePool, id: i64, base_branch: &str) -> Result<Branch> {
    let affected = sqlx::query("UPDATE branches SET base_branch = ?1 WHERE id = ?2")
        .bind(base_branch)
        .bind(id)
        .execute(pool)
        .await?
        .rows_affected();

    if affected == 0 {
        return Err(Error::BranchNotFound { id });
    }

    get_branch(pool, id).await
}

/// Accepts a pool or an open transaction
pub async fn delete_branch<'e, E>(executor: E, id: i64) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    // Sessions and notes go with it through ON DELETE CASCADE
    sqlx::query("DELETE FROM branches WHERE id = ?1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

// Sessions

pub async fn create_session(pool: &SqlitePool, session: CreateSession) -> Result<BranchSession> {
    let id = sqlx::query(
        r#"
        INSERT INTO branch_sessions (branch_id, ai_session_id, prompt, status, base_sha, created_at)
        VALUES (?1, ?2, ?3, 'running', ?4, ?5)
        "#,
    )
    .bind(session.branch_id)
    .bind(&session.ai_session_id)
    .bind(&session.prompt)
    .bind(&session.base_sha)
    .bind(now_millis())
    .execute(pool)
    .await
    .map_err(Error::from)
    .map_err(|e| {
        if e.is_unique_violation() {
            Error::SessionAlreadyRunning {
                branch_id: session.branch_id,
            }
        } else if e.is_aborted_with(GENERATING_NOTE_ABORT) {
            Error::NoteAlreadyGenerating {
                branch_id: session.branch_id,
            }
        } else {
            e
        }
    })?
    .last_insert_rowid();

    get_session(pool, id).await
}

pub async fn get_session(pool: &SqlitePool, id: i64) -> Result<BranchSession> {
    let row = sqlx::query("SELECT * FROM branch_sessions WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(Error::SessionNotFound { id })?;

    BranchSession::from_row(&row)
}

pub async fn get_running_session(pool: &SqlitePool, branch_id: i64) -> Result<Option<BranchSession>> {
    let row = sqlx::query(
        "SELECT * FROM branch_sessions WHERE branch_id = ?1 AND status = 'running'",
    )
    .bind(branch_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(BranchSession::from_row).transpose()
}

pub async fn get_session_for_commit(
    pool: &SqlitePool,
    branch_id: i64,
    sha: &str,
) -> Result<Option<BranchSession>> {
    let row = sqlx::query(
        r#"
        SELECT * FROM branch_sessions
        WHERE branch_id = ?1 AND commit_sha = ?2
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .bind(branch_id)
    .bind(sha)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(BranchSession::from_row).transpose()
}

pub async fn get_branch_session_by_ai_session(
    pool: &SqlitePool,
    ai_session_id: &str,
) -> Result<Option<BranchSession>> {
    let row = sqlx::query(
        "SELECT * FROM branch_sessions WHERE ai_session_id = ?1 ORDER BY id DESC LIMIT 1",
    )
    .bind(ai_session_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(BranchSession::from_row).transpose()
}

pub async fn list_sessions(pool: &SqlitePool, branch_id: i64) -> Result<Vec<BranchSession>> {
    let rows = sqlx::query("SELECT * FROM branch_sessions WHERE branch_id = ?1 ORDER BY id")
        .bind(branch_id)
        .fetch_all(pool)
        .await?;

    rows.iter().map(BranchSession::from_row).collect()
}

/// Moves a running session to a terminal status. Returns false when the
/// session was no longer running, leaving the row untouched.
pub async fn finish_session(pool: &SqlitePool, id: i64, outcome: &SessionOutcome) -> Result<bool> {
    let (status, commit_sha, error_message) = match outcome {
        SessionOutcome::Completed { commit_sha } => {
            (SessionStatus::Completed, Some(commit_sha.as_str()), None)
        }
        SessionOutcome::Failed { message } => (SessionStatus::Failed, None, Some(message.as_str())),
        SessionOutcome::Discarded => (SessionStatus::Discarded, None, None),
    };

    let affected = sqlx::query(
        r#"
        UPDATE branch_sessions
        SET status = ?1, commit_sha = ?2, error_message = ?3
        WHERE id = ?4 AND status = 'running'
        "#,
    )
    .bind(status.as_str())
    .bind(commit_sha)
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(affected == 1)
}

/// Discards a completed session whose commit was removed from the branch.
pub async fn discard_completed_session(pool: &SqlitePool, id: i64) -> Result<bool> {
    let affected = sqlx::query(
        "UPDATE branch_sessions SET status = 'discarded' WHERE id = ?1 AND status = 'completed'",
    )
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(affected == 1)
}

/// Points a running session at a fresh agent session.
pub async fn restart_session(
    pool: &SqlitePool,
    id: i64,
    ai_session_id: &str,
    prompt: &str,
) -> Result<bool> {
    let affected = sqlx::query(
        r#"
        UPDATE branch_sessions
        SET ai_session_id = ?1, prompt = ?2, error_message = NULL
        WHERE id = ?3 AND status = 'running'
        "#,
    )
    .bind(ai_session_id)
    .bind(prompt)
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(affected == 1)
}

// Notes

pub async fn create_note(pool: &SqlitePool, note: CreateNote) -> Result<BranchNote> {
    let id = sqlx::query(
        r#"
        INSERT INTO branch_notes (branch_id, ai_session_id, title, status, created_at)
        VALUES (?1, ?2, ?3, 'generating', ?4)
        "#,
    )
    .bind(note.branch_id)
    .bind(&note.ai_session_id)
    .bind(&note.title)
    .bind(now_millis())
    .execute(pool)
    .await
    .map_err(Error::from)
    .map_err(|e| {
        if e.is_unique_violation() {
            Error::NoteAlreadyGenerating {
                branch_id: note.branch_id,
            }
        } else if e.is_aborted_with(RUNNING_SESSION_ABORT) {
            Error::SessionAlreadyRunning {
                branch_id: note.branch_id,
            }
        } else {
            e
        }
    })?
    .last_insert_rowid();

    get_note(pool, id).await
}

pub async fn get_note(pool: &SqlitePool, id: i64) -> Result<BranchNote> {
    let row = sqlx::query("SELECT * FROM branch_notes WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(Error::NoteNotFound { id })?;

    BranchNote::from_row(&row)
}

pub async fn get_generating_note(pool: &SqlitePool, branch_id: i64) -> Result<Option<BranchNote>> {
    let row = sqlx::query(
        "SELECT * FROM branch_notes WHERE branch_id = ?1 AND status = 'generating'",
    )
    .bind(branch_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(BranchNote::from_row).transpose()
}

pub async fn list_branch_notes(pool: &SqlitePool, branch_id: i64) -> Result<Vec<BranchNote>> {
    let rows = sqlx::query(
        "SELECT * FROM branch_notes WHERE branch_id = ?1 ORDER BY created_at, id",
    )
    .bind(branch_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(BranchNote::from_row).collect()
}

pub async fn get_branch_note_by_ai_session(
    pool: &SqlitePool,
    ai_session_id: &str,
) -> Result<Option<BranchNote>> {
    let row = sqlx::query(
        "SELECT * FROM branch_notes WHERE ai_session_id = ?1 ORDER BY id DESC LIMIT 1",
    )
    .bind(ai_session_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(BranchNote::from_row).transpose()
}

/// Moves a generating note to a terminal status. Returns false when the note
/// was no longer generating.
pub async fn finish_note(pool: &SqlitePool, id: i64, outcome: &NoteOutcome) -> Result<bool> {
    let (status, content, error_message) = match outcome {
        NoteOutcome::Complete { content } => (NoteStatus::Complete, content.as_str(), None),
        NoteOutcome::Error { message } => (NoteStatus::Error, "", Some(message.as_str())),
    };

    let affected = sqlx::query(
        r#"
        UPDATE branch_notes
        SET status = ?1, content = ?2, error_message = ?3
        WHERE id = ?4 AND status = 'generating'
        "#,
    )
    .bind(status.as_str())
    .bind(content)
    .bind(error_message)
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();

    Ok(affected == 1)
}

pub async fn delete_note(pool: &SqlitePool, id: i64) -> Result<bool> {
    let affected = sqlx::query("DELETE FROM branch_notes WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?
        .rows_affected();

    Ok(affected == 1)
}
