pub mod schema;

pub use schema::Config;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable set by the `--config-dir` flag.
pub const CONFIG_DIR_OVERRIDE_ENV: &str = "BRANCHWORK_CONFIG_DIR_OVERRIDE";

/// Replaces `agent.command` without touching the file (handy for scripted agents)
pub const AGENT_COMMAND_ENV: &str = "BRANCHWORK_AGENT_COMMAND";

/// Load `config.toml`, falling back to defaults when it does not exist yet
pub fn load() -> Result<Config> {
    let mut config = read(&config_path()?)?.unwrap_or_default();

    if let Ok(command) = std::env::var(AGENT_COMMAND_ENV) {
        config.agent.command = command;
    }

    Ok(config)
}

fn read(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config from {}", path.display()))?;

    Ok(Some(config))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Directory holding the config file, the database and the logs
pub fn config_dir() -> Result<PathBuf> {
    match std::env::var(CONFIG_DIR_OVERRIDE_ENV) {
        Ok(dir) => Ok(PathBuf::from(dir)),
        Err(_) => dirs::config_dir()
            .map(|dir| dir.join("branchwork"))
            .context("Could not determine config directory"),
    }
}

pub fn ensure_config_dir() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
    Ok(dir)
}

/// Write the defaults unless a config file is already there
pub fn save_default() -> Result<()> {
    let path = config_path()?;
    if path.exists() {
        return Ok(());
    }

    ensure_config_dir()?;
    let content =
        toml::to_string_pretty(&Config::default()).context("Failed to serialize config to TOML")?;
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write config to {}", path.display()))
}
