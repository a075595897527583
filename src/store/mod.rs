pub mod models;
pub mod queries;

use crate::config;
use crate::error::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Handle to the record store. Cloning shares the pool and the transition lock.
#[derive(Clone)]
pub struct Store {
    pool: Arc<SqlitePool>,
    transitions: Arc<Mutex<()>>,
}

impl Store {
    pub async fn open() -> Result<Self> {
        let db_path = db_path()?;
        Self::open_at(&db_path).await
    }

    pub async fn open_at(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_exists = db_path.exists();

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| {
                if db_exists {
                    Error::DatabaseCorrupted {
                        path: db_path.to_path_buf(),
                        suggestion: format!(
                            "Try: mv {} {}.bak && branchwork project list",
                            db_path.display(),
                            db_path.display()
                        ),
                    }
                } else {
                    Error::DatabaseOpen {
                        path: db_path.to_path_buf(),
                        source: e,
                    }
                }
            })?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self::from_pool(pool))
    }

    /// Private in-memory database, used by tests
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);

        // A single connection that never idles out keeps the in-memory database alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self::from_pool(pool))
    }

    fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
            transitions: Arc::new(Mutex::new(())),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Held by session and note transitions. A branch may have only one
    /// active record of either kind, so both managers share this lock.
    pub async fn transitions(&self) -> MutexGuard<'_, ()> {
        self.transitions.lock().await
    }
}

fn db_path() -> Result<PathBuf> {
    Ok(config::ensure_config_dir()?.join("branchwork.db"))
}

// Re-export query functions and models for convenience
pub use queries::*;
pub use models::{
    Branch, BranchNote, BranchSession, CreateBranch, CreateNote, CreateProject, CreateSession,
    GitProject, NoteOutcome, NoteStatus, SessionOutcome, SessionStatus,
};
