use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_workspace")]
    pub workspace: WorkspaceConfig,

    #[serde(default = "default_agent")]
    pub agent: AgentConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            agent: default_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Base directory for branch worktrees
    #[serde(default = "default_worktrees_dir")]
    pub worktrees_dir: String,
}

fn default_workspace() -> WorkspaceConfig {
    WorkspaceConfig {
        worktrees_dir: default_worktrees_dir(),
    }
}

fn default_worktrees_dir() -> String {
    "~/.branchwork/worktrees".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Program started for every session and note; the prompt is passed as the last argument
    #[serde(default = "default_command")]
    pub command: String,

    /// Arguments placed before the prompt
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Commit subject used when neither the transcript nor the prompt provides one
    #[serde(default = "default_commit_message")]
    pub commit_message_fallback: String,
}

fn default_agent() -> AgentConfig {
    AgentConfig {
        command: default_command(),
        args: default_args(),
        commit_message_fallback: default_commit_message(),
    }
}

fn default_command() -> String {
    "claude".to_string()
}

fn default_args() -> Vec<String> {
    vec!["-p".to_string()]
}

fn default_commit_message() -> String {
    "Agent session changes".to_string()
}

impl Config {
    /// Expand tilde in paths and return absolute PathBuf
    pub fn worktrees_dir(&self) -> PathBuf {
        expand_tilde(&self.workspace.worktrees_dir)
    }

    /// Check values that parse fine but cannot work at runtime
    pub fn validate(&self) -> Result<(), String> {
        if self.workspace.worktrees_dir.trim().is_empty() {
            return Err("workspace.worktrees_dir must not be empty".to_string());
        }

        if self.agent.command.trim().is_empty() {
            return Err("agent.command must not be empty".to_string());
        }

        if self.agent.args.iter().any(|arg| arg.contains('\0')) {
            return Err("agent.args must not contain NUL bytes".to_string());
        }

        if self.agent.commit_message_fallback.trim().is_empty() {
            return Err("agent.commit_message_fallback must not be empty".to_string());
        }

        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
