//! End to end: real git repository, sqlite file store and a shell "agent".
#![cfg(unix)]

use branchwork::backends::{AgentBackend, CommandBackend};
use branchwork::config::Config;
use branchwork::events::{BranchEvent, EventBus};
use branchwork::git::{Git2Service, GitService};
use branchwork::managers::{
    BranchManager, BranchSlot, BranchViewLoader, Liveness, NoteManager, SessionManager,
};
use branchwork::recovery::{RecoveryCoordinator, StatusListener};
use branchwork::store::{self, CreateProject, NoteStatus, SessionStatus, Store};
use branchwork::timeline::TimelineItem;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

struct World {
    _dir: TempDir,
    store: Store,
    bus: EventBus,
    branches: BranchManager,
    sessions: Arc<SessionManager>,
    notes: Arc<NoteManager>,
    views: BranchViewLoader,
    listener: Arc<StatusListener>,
    project_id: i64,
}

async fn world() -> World {
    let dir = TempDir::new().unwrap();
    let repo_path = dir.path().join("repo");
    let repo = git2::Repository::init(&repo_path).unwrap();
    let mut git_config = repo.config().unwrap();
    git_config.set_str("user.name", "Test").unwrap();
    git_config.set_str("user.email", "test@example.com").unwrap();
    std::fs::write(repo_path.join("README.md"), "hello\n").unwrap();

    let git: Arc<dyn GitService> = Arc::new(Git2Service::new());
    git.commit_all(&repo_path, "Initial commit").await.unwrap();

    let store = Store::open_at(&dir.path().join("branchwork.db")).await.unwrap();
    let project = store::create_project(
        store.pool(),
        CreateProject {
            repo_path,
            subpath: None,
        },
    )
    .await
    .unwrap();

    let mut config = Config::default();
    config.workspace.worktrees_dir = dir.path().join("worktrees").to_string_lossy().into_owned();

    let bus = EventBus::new();
    let agent: Arc<dyn AgentBackend> = Arc::new(CommandBackend::new("sh", vec!["-c".to_string()]));
    let sessions = Arc::new(SessionManager::new(
        store.clone(),
        Arc::clone(&git),
        Arc::clone(&agent),
        bus.clone(),
        "Agent session changes",
    ));
    let notes = Arc::new(NoteManager::new(store.clone(), Arc::clone(&agent), bus.clone()));
    let coordinator = Arc::new(RecoveryCoordinator::new(
        Arc::clone(&sessions),
        Arc::clone(&notes),
        agent,
    ));
    let listener = Arc::new(StatusListener::new());
    listener.ensure_started(Arc::clone(&coordinator));

    World {
        branches: BranchManager::new(store.clone(), Arc::clone(&git), config, bus.clone()),
        views: BranchViewLoader::new(store.clone(), git, coordinator, Arc::clone(&listener), &bus),
        _dir: dir,
        store,
        bus,
        sessions,
        notes,
        listener,
        project_id: project.id,
    }
}

/// Wait for a refresh signal matching `pred`
async fn wait_for(events: &mut broadcast::Receiver<BranchEvent>, pred: impl Fn(&BranchEvent) -> bool) {
    tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            if let Ok(event) = events.recv().await {
                if pred(&event) {
                    break;
                }
            }
        }
    })
    .await
    .expect("event never arrived");
}

#[tokio::test]
async fn session_turns_agent_work_into_a_commit() {
    let w = world().await;
    let branch = w.branches.create_branch(w.project_id, "feat/greeting", None).await.unwrap();
    assert!(branch.worktree_path.exists());
    assert!(matches!(
        &w.branches.list_visible(w.project_id).await.unwrap()[..],
        [BranchSlot::Committed { .. }]
    ));

    let mut events = w.bus.subscribe();
    let session = w
        .sessions
        .start_session(branch.id, "echo hi > greeting.txt && echo 'Add greeting'")
        .await
        .unwrap();

    wait_for(&mut events, |e| matches!(e, BranchEvent::CommitsChanged { .. })).await;

    let done = w.sessions.get(session.id).await.unwrap();
    assert_eq!(done.status, SessionStatus::Completed);
    let sha = done.commit_sha.clone().unwrap();

    let view = w.views.open(branch.id).await.unwrap();
    assert!(matches!(view.activity.session, Liveness::Idle));
    match &view.timeline[..] {
        [TimelineItem::Commit { commit, is_head: true, delete_count: 1 }] => {
            assert_eq!(commit.sha, sha);
            assert_eq!(commit.subject, "Add greeting");
        }
        other => panic!("unexpected timeline {:?}", other),
    }

    // Removing the commit discards its session
    assert_eq!(w.sessions.delete_commit_and_session(session.id).await.unwrap(), 1);
    assert!(w.views.open(branch.id).await.unwrap().timeline.is_empty());
    assert_eq!(
        w.sessions.get(session.id).await.unwrap().status,
        SessionStatus::Discarded
    );
    assert!(!branch.worktree_path.join("greeting.txt").exists());

    w.branches.delete_branch(branch.id).await.unwrap();
    assert!(!branch.worktree_path.exists());
    assert!(w.branches.list_visible(w.project_id).await.unwrap().is_empty());

    w.listener.shutdown().await;
}

#[tokio::test]
async fn note_completes_from_agent_output() {
    let w = world().await;
    let branch = w.branches.create_branch(w.project_id, "docs", None).await.unwrap();

    let mut events = w.bus.subscribe();
    let note = w
        .notes
        .start_note(branch.id, "Summary", "echo 'Nothing changed yet.'")
        .await
        .unwrap();

    let note_id = note.id;
    wait_for(&mut events, move |e| {
        matches!(e, BranchEvent::NoteChanged { note_id: id, .. } if *id == note_id)
    })
    .await;
    // The first NoteChanged is the start itself; wait until it is terminal
    let done = tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            let current = w.notes.get(note_id).await.unwrap();
            if current.status != NoteStatus::Generating {
                break current;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(done.status, NoteStatus::Complete);
    assert_eq!(done.content, "Nothing changed yet.");

    let view = w.views.open(branch.id).await.unwrap();
    assert!(matches!(&view.timeline[..], [TimelineItem::Note(n)] if n.id == note_id));

    let persisted = store::list_branch_notes(w.store.pool(), branch.id).await.unwrap();
    assert_eq!(persisted.len(), 1);
}

#[tokio::test]
async fn failing_agent_leaves_a_failed_session() {
    let w = world().await;
    let branch = w.branches.create_branch(w.project_id, "broken", None).await.unwrap();

    let mut events = w.bus.subscribe();
    let session = w
        .sessions
        .start_session(branch.id, "echo 'out of tokens' >&2; exit 1")
        .await
        .unwrap();

    let session_id = session.id;
    let done = tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            if let Ok(BranchEvent::SessionChanged { session_id: id, .. }) = events.recv().await {
                if id == session_id {
                    let current = w.sessions.get(session_id).await.unwrap();
                    if current.status != SessionStatus::Running {
                        break current;
                    }
                }
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(done.status, SessionStatus::Failed);
    assert_eq!(done.error_message.as_deref(), Some("out of tokens"));
    assert!(w.sessions.running_session(branch.id).await.unwrap().is_none());
}
