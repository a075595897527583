use crate::cli::context::App;
use crate::display;
use crate::error::Result;
use crate::events::BranchEvent;
use crate::store::models::{BranchNote, NoteStatus};
use clap::Subcommand;
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Subcommand)]
pub enum NoteCommand {
    /// Ask the agent for a note about a branch and wait for it
    #[command(visible_alias = "gen")]
    Generate {
        /// Branch id or name
        branch: String,

        title: String,

        prompt: String,

        #[arg(long)]
        project: Option<i64>,
    },

    /// Print a note's content
    Show { note: i64 },

    /// Stop a generating or stuck note and drop it
    Discard { note: i64 },

    /// Delete a finished note
    #[command(visible_alias = "rm")]
    Delete { note: i64 },
}

pub async fn run(command: NoteCommand) -> Result<()> {
    let app = App::open().await?;

    match command {
        NoteCommand::Generate {
            branch,
            title,
            prompt,
            project,
        } => {
            let branch = app.resolve_branch(&branch, project).await?;
            app.listen();
            let mut events = app.bus.subscribe();

            let note = app.notes.start_note(branch.id, &title, &prompt).await?;
            println!("Generating note {} on {} (Ctrl-C discards it)", note.id, branch.branch_name);

            if let Some(note) = wait_for_note(&app, &mut events, &note).await? {
                print_note(&note);
            }
        }
        NoteCommand::Show { note } => {
            print_note(&app.notes.get(note).await?);
        }
        NoteCommand::Discard { note } => {
            app.notes.discard_note(note).await?;
            println!("Discarded note {}", note);
        }
        NoteCommand::Delete { note } => {
            app.notes.delete_note(note).await?;
            println!("Deleted note {}", note);
        }
    }

    app.shutdown().await;
    Ok(())
}

fn print_note(note: &BranchNote) {
    println!("{}", display::note_line(note));
    if note.status == NoteStatus::Complete {
        println!("\n{}", note.content);
    }
}

/// `None` when the user interrupted and the note was discarded
async fn wait_for_note(
    app: &App,
    events: &mut broadcast::Receiver<BranchEvent>,
    note: &BranchNote,
) -> Result<Option<BranchNote>> {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(BranchEvent::NoteChanged { note_id, .. }) if note_id == note.id => {}
                Ok(_) => continue,
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return app.notes.get(note.id).await.map(Some),
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted, discarding note {}", note.id);
                app.notes.discard_note(note.id).await?;
                return Ok(None);
            }
        }

        let current = app.notes.get(note.id).await?;
        if current.status != NoteStatus::Generating {
            return Ok(Some(current));
        }
    }
}
