//! Merges a branch's commits, notes and in-flight work into one display sequence.

use crate::git::CommitInfo;
use crate::store::models::{BranchNote, BranchSession, NoteStatus};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TimelineItem {
    Commit {
        commit: CommitInfo,
        /// Newest commit while no session is running; the only one offering "continue"
        is_head: bool,
        /// Commits removed by deleting this one (itself and everything newer)
        delete_count: usize,
    },
    Note(BranchNote),
    RunningSession(BranchSession),
    GeneratingNote(BranchNote),
}

impl TimelineItem {
    pub fn is_head(&self) -> bool {
        matches!(self, TimelineItem::Commit { is_head: true, .. })
    }
}

/// Number of commits removed when deleting `sha` from a newest-first list.
///
/// Commits form a stack, so deleting position `k` also removes `0..k`.
pub fn commits_to_delete_count(commits: &[CommitInfo], sha: &str) -> Option<usize> {
    commits.iter().position(|c| c.sha == sha).map(|k| k + 1)
}

/// Build the oldest-to-newest timeline.
///
/// `commits` must be newest first. Generating notes inside `notes` are
/// skipped; pass the active one as `generating_note` to place it last.
pub fn reconcile(
    commits: &[CommitInfo],
    notes: &[BranchNote],
    running_session: Option<&BranchSession>,
    generating_note: Option<&BranchNote>,
) -> Vec<TimelineItem> {
    let head_sha = match running_session {
        Some(_) => None,
        None => commits.first().map(|c| c.sha.as_str()),
    };

    let mut dated: Vec<(i64, TimelineItem)> = Vec::with_capacity(commits.len() + notes.len() + 2);

    for (k, commit) in commits.iter().enumerate().rev() {
        dated.push((
            commit.timestamp_seconds,
            TimelineItem::Commit {
                commit: commit.clone(),
                is_head: head_sha == Some(commit.sha.as_str()),
                delete_count: k + 1,
            },
        ));
    }

    for note in notes.iter().filter(|n| n.status != NoteStatus::Generating) {
        // createdAt is in milliseconds, commit time in seconds
        dated.push((note.created_at.div_euclid(1000), TimelineItem::Note(note.clone())));
    }

    dated.sort_by_key(|(ts, _)| *ts);

    let mut items: Vec<TimelineItem> = dated.into_iter().map(|(_, item)| item).collect();

    if let Some(session) = running_session {
        items.push(TimelineItem::RunningSession(session.clone()));
    }

    if let Some(note) = generating_note {
        items.push(TimelineItem::GeneratingNote(note.clone()));
    }

    items
}
