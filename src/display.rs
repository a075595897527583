//! Terminal rendering for the CLI.

use crate::managers::{BranchSlot, BranchView, DeletionState, Liveness};
use crate::store::models::{BranchNote, BranchSession, GitProject, NoteStatus, SessionStatus};
use crate::timeline::TimelineItem;
use owo_colors::OwoColorize;

pub fn project_line(project: &GitProject) -> String {
    match &project.subpath {
        Some(sub) => format!("{:>4}  {} {}", project.id, project.repo_path.display(), sub.dimmed()),
        None => format!("{:>4}  {}", project.id, project.repo_path.display()),
    }
}

pub fn branch_slot_line(slot: &BranchSlot) -> String {
    match slot {
        BranchSlot::Committed { branch, deletion } => {
            let base = format!(
                "{:>4}  {} {}",
                branch.id,
                branch.branch_name.bold(),
                format!("(from {})", branch.base_branch).dimmed()
            );
            match deletion {
                DeletionState::Idle => base,
                DeletionState::Deleting => format!("{}  {}", base, "deleting...".yellow()),
                DeletionState::Failed(message) => {
                    format!("{}  {}", base, format!("delete failed: {}", message).red())
                }
            }
        }
        BranchSlot::Pending(pending) => format!(
            "   -  {} {}",
            pending.branch_name,
            "creating...".yellow()
        ),
        BranchSlot::Failed { pending, error } => format!(
            "   -  {} {}",
            pending.branch_name.strikethrough(),
            format!("creation failed: {}", error).red()
        ),
    }
}

fn session_status(session: &BranchSession) -> String {
    match session.status {
        SessionStatus::Running => "running".yellow().to_string(),
        SessionStatus::Completed => "completed".green().to_string(),
        SessionStatus::Discarded => "discarded".dimmed().to_string(),
        SessionStatus::Failed => "failed".red().to_string(),
    }
}

pub fn session_line(session: &BranchSession) -> String {
    let mut line = format!(
        "session {} [{}] {}",
        session.id,
        session_status(session),
        crate::backends::traits::first_line(&session.prompt).unwrap_or_default()
    );
    if let Some(sha) = &session.commit_sha {
        line.push_str(&format!(" -> {}", sha.chars().take(7).collect::<String>().cyan()));
    }
    if let Some(message) = &session.error_message {
        line.push_str(&format!(" ({})", message.red()));
    }
    line
}

pub fn note_line(note: &BranchNote) -> String {
    match note.status {
        NoteStatus::Generating => format!("note {} {} {}", note.id, note.title.bold(), "generating...".yellow()),
        NoteStatus::Complete => format!("note {} {}", note.id, note.title.bold()),
        NoteStatus::Error => format!(
            "note {} {} {}",
            note.id,
            note.title.bold(),
            note.error_message.as_deref().unwrap_or("failed").red()
        ),
    }
}

fn timeline_line(item: &TimelineItem, view: &BranchView) -> String {
    match item {
        TimelineItem::Commit {
            commit,
            is_head,
            delete_count,
        } => {
            let marker = if *is_head { "HEAD".green().to_string() } else { "    ".to_string() };
            format!(
                "{} {} {}  {}",
                marker,
                commit.short_sha.cyan(),
                commit.subject,
                format!("[deletes {}]", delete_count).dimmed()
            )
        }
        TimelineItem::Note(note) => format!("     {}", note_line(note)),
        TimelineItem::RunningSession(session) => {
            let state = if view.activity.session.is_stuck() {
                "stuck: restart or discard".red().to_string()
            } else {
                "in progress".yellow().to_string()
            };
            format!(
                "  >  session {} {} {}",
                session.id,
                crate::backends::traits::first_line(&session.prompt).unwrap_or_default(),
                state
            )
        }
        TimelineItem::GeneratingNote(note) => {
            let state = match &view.activity.note {
                Liveness::Stuck(_) => "stuck: discard".red().to_string(),
                _ => "generating".yellow().to_string(),
            };
            format!("  >  note {} {} {}", note.id, note.title.bold(), state)
        }
    }
}

/// Oldest first, in-flight work last
pub fn render_view(view: &BranchView) -> String {
    let mut out = format!(
        "{} {}\n",
        view.branch.branch_name.bold(),
        format!("(base {}, {})", view.branch.base_branch, view.branch.worktree_path.display()).dimmed()
    );

    if view.timeline.is_empty() {
        out.push_str(&format!("  {}\n", "no commits yet".dimmed()));
    }

    for item in &view.timeline {
        out.push_str(&timeline_line(item, view));
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::CommitInfo;
    use crate::recovery::BranchActivity;
    use crate::store::models::Branch;
    use crate::timeline::reconcile;
    use std::path::PathBuf;

    #[test]
    fn stuck_session_is_called_out() {
        let session = BranchSession {
            id: 3,
            branch_id: 1,
            ai_session_id: "gone".to_string(),
            prompt: "Add tests\nmore".to_string(),
            status: SessionStatus::Running,
            commit_sha: None,
            base_sha: None,
            error_message: None,
            created_at: 0,
        };
        let commits = vec![CommitInfo::new("abcdef1234", "Initial work", 10)];
        let view = BranchView {
            branch: Branch {
                id: 1,
                project_id: 1,
                branch_name: "feat".to_string(),
                base_branch: "main".to_string(),
                worktree_path: PathBuf::from("/tmp/wt"),
                created_at: String::new(),
            },
            timeline: reconcile(&commits, &[], Some(&session), None),
            activity: BranchActivity {
                session: Liveness::Stuck(session),
                note: Liveness::Idle,
            },
        };

        let rendered = render_view(&view);
        let lines: Vec<&str> = rendered.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("abcdef1") && !lines[1].contains("HEAD"));
        assert!(lines[2].contains("Add tests") && lines[2].contains("stuck"));
    }
}
