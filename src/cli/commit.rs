use crate::cli::context::App;
use crate::error::{Error, Result};
use crate::timeline::commits_to_delete_count;
use clap::Subcommand;
use owo_colors::OwoColorize;
use std::io::{self, Write};

#[derive(Subcommand)]
pub enum CommitCommand {
    /// Delete a commit and every newer commit on the branch
    #[command(visible_alias = "rm")]
    Delete {
        /// Branch id or name
        branch: String,

        /// Commit sha or unique prefix
        sha: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,

        #[arg(long)]
        project: Option<i64>,
    },
}

fn confirm(question: &str) -> io::Result<bool> {
    print!("{} [y/N]: ", question);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(matches!(input.trim(), "y" | "Y" | "yes"))
}

pub async fn run(command: CommitCommand) -> Result<()> {
    let app = App::open().await?;

    match command {
        CommitCommand::Delete {
            branch,
            sha,
            yes,
            project,
        } => {
            let branch = app.resolve_branch(&branch, project).await?;
            let commits = app.views.commits(&branch).await?;

            let matching: Vec<_> = commits.iter().filter(|c| c.sha.starts_with(&sha)).collect();
            let commit = match matching.as_slice() {
                [commit] => *commit,
                [] => {
                    return Err(Error::CommitNotFound {
                        branch_id: branch.id,
                        sha,
                    })
                }
                _ => {
                    return Err(Error::git(format!("Commit prefix '{}' is ambiguous", sha)));
                }
            };

            let count = commits_to_delete_count(&commits, &commit.sha).unwrap_or(1);
            if count > 1 {
                println!(
                    "Deleting {} also removes the {} newer commit(s) on {}",
                    commit.short_sha.cyan(),
                    count - 1,
                    branch.branch_name
                );
            }

            if !yes && !confirm(&format!("Delete {} commit(s)?", count))? {
                println!("Aborted");
                return Ok(());
            }

            let removed = app.sessions.delete_commit(branch.id, &commit.sha).await?;
            println!("Removed {} commit(s) from {}", removed, branch.branch_name.bold());
        }
    }

    Ok(())
}
