use crate::config;
use crate::error::{Error, Result};
use anyhow::Context;
use sha2::{Digest, Sha256};
use std::io::{self, IsTerminal, Write};
use std::path::Path;
use std::process::Command;

/// Priority: VISUAL > EDITOR > vi
fn get_editor() -> String {
    std::env::var("VISUAL")
        .or_else(|_| std::env::var("EDITOR"))
        .unwrap_or_else(|_| "vi".to_string())
}

fn hash_file(path: &Path) -> anyhow::Result<String> {
    let content = std::fs::read(path)
        .with_context(|| format!("Failed to read file for hashing: {}", path.display()))?;

    Ok(hex::encode(Sha256::digest(&content)))
}

fn open_editor(editor: &str, path: &Path) -> Result<()> {
    let status = Command::new(editor)
        .arg(path)
        .status()
        .with_context(|| format!("Failed to run editor: {}", editor))?;

    if !status.success() {
        return Err(Error::ConfigError(format!(
            "Editor exited with error status: {}",
            status
        )));
    }
    Ok(())
}

/// Parse and validate the file as it is on disk
fn check() -> std::result::Result<(), String> {
    let cfg = config::load().map_err(|e| format!("parsing failed: {:#}", e))?;
    cfg.validate().map_err(|e| format!("validation failed: {}", e))
}

fn prompt_validation_failure() -> io::Result<String> {
    println!("\nThe config file has errors. What would you like to do?");
    println!("  1. Edit again to fix errors");
    println!("  2. Leave it (commands will refuse to run until it is fixed)");
    print!("\nChoice (1-2): ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(input.trim().to_string())
}

pub async fn run() -> Result<()> {
    config::ensure_config_dir().map_err(|e| Error::ConfigError(e.to_string()))?;
    let config_path = config::config_path().map_err(|e| Error::ConfigError(e.to_string()))?;

    if !config_path.exists() {
        config::save_default().map_err(|e| Error::ConfigError(e.to_string()))?;
        println!("Created default config at: {}", config_path.display());
    }

    let hash_before = hash_file(&config_path).context("Failed to hash config file before editing")?;

    let editor = get_editor();
    open_editor(&editor, &config_path)?;

    let hash_after = hash_file(&config_path).context("Failed to hash config file after editing")?;
    if hash_before == hash_after {
        println!("No changes made to config");
        return Ok(());
    }

    while let Err(problem) = check() {
        eprintln!("\nConfig {}", problem);

        if !io::stdin().is_terminal() {
            return Err(Error::ConfigError(format!(
                "Config {} in non-interactive mode. Please fix manually: {}",
                problem,
                config_path.display()
            )));
        }

        match prompt_validation_failure()?.as_str() {
            "1" => open_editor(&editor, &config_path)?,
            "2" => return Err(Error::ConfigError(format!("Config {}", problem))),
            _ => return Err(Error::ConfigError("Invalid choice".to_string())),
        }
    }

    println!(
        "Config saved and validated successfully: {}",
        config_path.display()
    );
    Ok(())
}
