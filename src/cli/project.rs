use crate::cli::context::App;
use crate::display;
use crate::error::Result;
use crate::git;
use crate::store::{self, CreateProject};
use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum ProjectCommand {
    /// Register a repository (or a directory inside a monorepo)
    Add {
        /// Path inside the repository
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Scope the project to this directory of the repository
        #[arg(long)]
        subpath: Option<String>,
    },

    /// List registered projects
    #[command(visible_alias = "ls")]
    List,
}

pub async fn run(command: ProjectCommand) -> Result<()> {
    let app = App::open().await?;

    match command {
        ProjectCommand::Add { path, subpath } => {
            let repo_path = git::discover_root(&path)?;

            if let Some(existing) =
                store::find_project(app.store.pool(), &repo_path, subpath.as_deref()).await?
            {
                println!("Already registered:\n{}", display::project_line(&existing));
                return Ok(());
            }

            let project = store::create_project(
                app.store.pool(),
                CreateProject {
                    repo_path,
                    subpath,
                },
            )
            .await?;
            println!("Registered project:\n{}", display::project_line(&project));
        }
        ProjectCommand::List => {
            let projects = store::list_projects(app.store.pool()).await?;
            if projects.is_empty() {
                println!("No projects. Register one with: branchwork project add <path>");
            }
            for project in &projects {
                println!("{}", display::project_line(project));
            }
        }
    }

    Ok(())
}
