use crate::cli::context::App;
use crate::display;
use crate::error::Result;
use crate::managers::Liveness;
use clap::Args;

#[derive(Args)]
pub struct TimelineArgs {
    /// Branch id or name
    pub branch: String,

    #[arg(long)]
    pub project: Option<i64>,
}

pub async fn run(args: TimelineArgs) -> Result<()> {
    let app = App::open().await?;
    let branch = app.resolve_branch(&args.branch, args.project).await?;

    let view = app.views.open(branch.id).await?;
    print!("{}", display::render_view(&view));

    if let Liveness::Stuck(session) = &view.activity.session {
        println!(
            "\nSession {} lost its agent. Run `branchwork session restart {}` or `branchwork session discard {}`",
            session.id, session.id, session.id
        );
    }
    if let Liveness::Stuck(note) = &view.activity.note {
        println!("\nNote {} lost its agent. Run `branchwork note discard {}`", note.id, note.id);
    }

    app.shutdown().await;
    Ok(())
}
