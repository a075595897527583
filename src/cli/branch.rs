use crate::cli::context::App;
use crate::display;
use crate::error::Result;
use crate::managers::BranchSlot;
use clap::Subcommand;
use owo_colors::OwoColorize;

#[derive(Subcommand)]
pub enum BranchCommand {
    /// Create a branch with its own worktree
    #[command(visible_alias = "new")]
    Create {
        name: String,

        /// Branch to start from (defaults to the repository's default branch)
        #[arg(long)]
        base: Option<String>,

        #[arg(long)]
        project: Option<i64>,
    },

    /// List branches of a project
    #[command(visible_alias = "ls")]
    List {
        #[arg(long)]
        project: Option<i64>,
    },

    /// Remove a branch's worktree and record
    #[command(visible_aliases = ["rm", "del"])]
    Delete {
        /// Branch id or name
        branch: String,

        #[arg(long)]
        project: Option<i64>,
    },

    /// Point a branch at a different base branch
    SetBase {
        /// Branch id or name
        branch: String,

        base: String,

        #[arg(long)]
        project: Option<i64>,
    },
}

pub async fn run(command: BranchCommand) -> Result<()> {
    let app = App::open().await?;

    match command {
        BranchCommand::Create { name, base, project } => {
            let project = app.resolve_project(project).await?;
            match app.branches.create_branch(project.id, &name, base.as_deref()).await {
                Ok(branch) => {
                    println!(
                        "Created {} at {}",
                        branch.branch_name.bold(),
                        branch.worktree_path.display()
                    );
                }
                Err(e) => {
                    // The failed card, not an existing branch of the same name
                    for slot in app.branches.list_visible(project.id).await? {
                        if matches!(slot, BranchSlot::Failed { .. }) && slot.branch_name() == name {
                            eprintln!("{}", display::branch_slot_line(&slot));
                        }
                    }
                    return Err(e);
                }
            }
        }
        BranchCommand::List { project } => {
            let project = app.resolve_project(project).await?;
            let slots = app.branches.list_visible(project.id).await?;
            if slots.is_empty() {
                println!("No branches. Create one with: branchwork branch create <name>");
            }
            for slot in &slots {
                println!("{}", display::branch_slot_line(slot));
            }
        }
        BranchCommand::Delete { branch, project } => {
            let branch = app.resolve_branch(&branch, project).await?;
            println!("Deleting {}...", branch.branch_name);
            app.branches.delete_branch(branch.id).await?;
            println!("Deleted {}", branch.branch_name.bold());
        }
        BranchCommand::SetBase {
            branch,
            base,
            project,
        } => {
            let branch = app.resolve_branch(&branch, project).await?;
            let updated = app.branches.set_base_branch(branch.id, &base).await?;
            println!(
                "{} now compares against {}",
                updated.branch_name.bold(),
                updated.base_branch
            );
        }
    }

    Ok(())
}
