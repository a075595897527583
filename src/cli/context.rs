use crate::backends::{AgentBackend, CommandBackend};
use crate::config::{self, Config};
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::git::{self, Git2Service, GitService};
use crate::managers::{BranchManager, BranchViewLoader, NoteManager, SessionManager};
use crate::recovery::{RecoveryCoordinator, StatusListener};
use crate::store::models::{Branch, GitProject};
use crate::store::{self, Store};
use std::sync::Arc;

/// Everything a command needs, wired once per invocation
pub struct App {
    pub store: Store,
    pub config: Config,
    pub bus: EventBus,
    pub branches: BranchManager,
    pub sessions: Arc<SessionManager>,
    pub notes: Arc<NoteManager>,
    pub coordinator: Arc<RecoveryCoordinator>,
    pub listener: Arc<StatusListener>,
    pub views: BranchViewLoader,
}

impl App {
    pub async fn open() -> Result<Self> {
        let config = config::load()?;
        config.validate().map_err(Error::ConfigError)?;

        let store = Store::open().await?;
        let bus = EventBus::new();
        let git: Arc<dyn GitService> = Arc::new(Git2Service::new());
        let agent: Arc<dyn AgentBackend> = Arc::new(
            CommandBackend::from_config(&config.agent).with_markers_dir(config::config_dir()?.join("agents")),
        );

        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            Arc::clone(&git),
            Arc::clone(&agent),
            bus.clone(),
            config.agent.commit_message_fallback.clone(),
        ));
        let notes = Arc::new(NoteManager::new(store.clone(), Arc::clone(&agent), bus.clone()));
        let coordinator = Arc::new(RecoveryCoordinator::new(
            Arc::clone(&sessions),
            Arc::clone(&notes),
            agent,
        ));
        let listener = Arc::new(StatusListener::new());

        Ok(Self {
            branches: BranchManager::new(store.clone(), Arc::clone(&git), config.clone(), bus.clone()),
            views: BranchViewLoader::new(
                store.clone(),
                git,
                Arc::clone(&coordinator),
                Arc::clone(&listener),
                &bus,
            ),
            store,
            config,
            bus,
            sessions,
            notes,
            coordinator,
            listener,
        })
    }

    /// Start the status listener before launching agents so no idle event is missed
    pub fn listen(&self) {
        self.listener.ensure_started(Arc::clone(&self.coordinator));
    }

    pub async fn shutdown(&self) {
        self.listener.shutdown().await;
    }

    /// `--project <id>`, or the registered project containing the current directory
    pub async fn resolve_project(&self, project: Option<i64>) -> Result<GitProject> {
        if let Some(id) = project {
            return store::get_project(self.store.pool(), id).await;
        }

        let cwd = std::env::current_dir()?;
        let root = git::discover_root(&cwd)?;
        let projects = store::list_projects(self.store.pool()).await?;

        // Deepest matching subpath wins for monorepo projects
        projects
            .into_iter()
            .filter(|p| p.repo_path == root && cwd.starts_with(p.working_root()))
            .max_by_key(|p| p.subpath.as_ref().map_or(0, String::len))
            .ok_or(Error::ProjectNotRegistered { path: root })
    }

    /// A branch by numeric id, or by name within the resolved project
    pub async fn resolve_branch(&self, branch: &str, project: Option<i64>) -> Result<Branch> {
        if let Ok(id) = branch.parse::<i64>() {
            return store::get_branch(self.store.pool(), id).await;
        }

        let project = self.resolve_project(project).await?;
        store::get_branch_by_name(self.store.pool(), project.id, branch)
            .await?
            .ok_or_else(|| Error::BranchNameNotFound {
                name: branch.to_string(),
            })
    }
}
