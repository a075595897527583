use crate::cli::context::App;
use crate::display;
use crate::error::Result;
use crate::events::BranchEvent;
use crate::store::models::BranchSession;
use clap::Subcommand;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

/// How often a waiting command retries recovery on its own
const RECOVERY_POLL: Duration = Duration::from_secs(5);

#[derive(Subcommand)]
pub enum SessionCommand {
    /// Run the agent on a branch and wait for its commit
    Start {
        /// Branch id or name
        branch: String,

        prompt: String,

        #[arg(long)]
        project: Option<i64>,
    },

    /// Restart a stuck session with its stored prompt
    Restart {
        session: i64,

        /// Use this prompt instead of the stored one
        #[arg(long)]
        prompt: Option<String>,
    },

    /// Discard a running or stuck session
    #[command(visible_alias = "cancel")]
    Discard { session: i64 },

    /// List a branch's sessions
    #[command(visible_alias = "ls")]
    List {
        /// Branch id or name
        branch: String,

        #[arg(long)]
        project: Option<i64>,
    },
}

pub async fn run(command: SessionCommand) -> Result<()> {
    let app = App::open().await?;

    match command {
        SessionCommand::Start {
            branch,
            prompt,
            project,
        } => {
            let branch = app.resolve_branch(&branch, project).await?;
            app.listen();
            let mut events = app.bus.subscribe();

            let session = app.sessions.start_session(branch.id, &prompt).await?;
            println!("Session {} running on {} (Ctrl-C discards it)", session.id, branch.branch_name);

            let finished = wait_for_session(&app, &mut events, &session).await?;
            println!("{}", display::session_line(&finished));
        }
        SessionCommand::Restart { session, prompt } => {
            app.listen();
            let mut events = app.bus.subscribe();

            let session = app.sessions.restart_session(session, prompt.as_deref()).await?;
            println!("Session {} restarted", session.id);

            let finished = wait_for_session(&app, &mut events, &session).await?;
            println!("{}", display::session_line(&finished));
        }
        SessionCommand::Discard { session } => {
            let session = app.sessions.cancel_session(session).await?;
            println!("{}", display::session_line(&session));
        }
        SessionCommand::List { branch, project } => {
            let branch = app.resolve_branch(&branch, project).await?;
            for session in app.sessions.list(branch.id).await? {
                println!("{}", display::session_line(&session));
            }
        }
    }

    app.shutdown().await;
    Ok(())
}

/// Wait until the session leaves `running`, discarding it on Ctrl-C
async fn wait_for_session(
    app: &App,
    events: &mut broadcast::Receiver<BranchEvent>,
    session: &BranchSession,
) -> Result<BranchSession> {
    let mut poll = tokio::time::interval(RECOVERY_POLL);
    poll.tick().await;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(BranchEvent::SessionChanged { session_id, .. }) if session_id == session.id => {}
                Ok(_) => continue,
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return app.sessions.get(session.id).await,
            },
            _ = poll.tick() => {
                if let Err(e) = app.sessions.recover_orphaned(session.branch_id).await {
                    warn!(error = %e, "Recovery attempt failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nInterrupted, discarding session {}", session.id);
                return app.sessions.cancel_session(session.id).await;
            }
        }

        let current = app.sessions.get(session.id).await?;
        if current.status.is_terminal() {
            return Ok(current);
        }
    }
}
