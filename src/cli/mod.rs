pub mod branch;
pub mod commit;
pub mod context;
pub mod edit;
pub mod logs;
pub mod note;
pub mod project;
pub mod session;
pub mod timeline;

use crate::config::CONFIG_DIR_OVERRIDE_ENV;
use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "branchwork")]
#[command(about = "Parallel branch worktrees with AI sessions that turn into commits")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging to terminal
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Override config directory (for testing)
    #[arg(long, global = true)]
    pub config_dir: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register and list projects
    #[command(subcommand, visible_alias = "p")]
    Project(project::ProjectCommand),

    /// Create, list and delete branches
    #[command(subcommand, visible_alias = "b")]
    Branch(branch::BranchCommand),

    /// Run AI sessions that produce commits
    #[command(subcommand, visible_alias = "s")]
    Session(session::SessionCommand),

    /// Generate and manage branch notes
    #[command(subcommand, visible_alias = "n")]
    Note(note::NoteCommand),

    /// Remove commits from a branch
    #[command(subcommand)]
    Commit(commit::CommitCommand),

    /// Show a branch's commits, notes and in-flight work
    #[command(visible_alias = "tl")]
    Timeline(timeline::TimelineArgs),

    /// View log files
    Logs(logs::LogsArgs),

    /// Configuration file
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completion script
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Open the config file in $VISUAL / $EDITOR and validate it
    Edit,
}

/// Parse the command line. Done before logging so `--verbose` and
/// `--config-dir` apply to the log setup.
pub fn parse() -> Cli {
    let cli = Cli::parse();

    // Set config dir override if provided
    if let Some(config_dir) = &cli.config_dir {
        std::env::set_var(CONFIG_DIR_OVERRIDE_ENV, config_dir);
    }

    cli
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Project(command) => project::run(command).await.map_err(Into::into),
        Commands::Branch(command) => branch::run(command).await.map_err(Into::into),
        Commands::Session(command) => session::run(command).await.map_err(Into::into),
        Commands::Note(command) => note::run(command).await.map_err(Into::into),
        Commands::Commit(command) => commit::run(command).await.map_err(Into::into),
        Commands::Timeline(args) => timeline::run(args).await.map_err(Into::into),
        Commands::Logs(args) => logs::run(args).await.map_err(Into::into),
        Commands::Config(ConfigCommand::Edit) => edit::run().await.map_err(Into::into),
        Commands::Completions { shell } => generate_completions(shell),
    }
}

/// Generate shell completions
pub fn generate_completions(shell: clap_complete::Shell) -> Result<()> {
    use clap::CommandFactory;
    use std::io;
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "branchwork", &mut io::stdout());
    Ok(())
}
