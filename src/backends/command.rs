use crate::backends::traits::{AgentBackend, StatusEvent, Transcript, TranscriptOutcome};
use crate::config::schema::AgentConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

/// Capacity of the status event channel; slow listeners see `Lagged`
const EVENT_CAPACITY: usize = 256;

enum RunState {
    Running { stop: Option<oneshot::Sender<()>> },
    Exited { transcript: Transcript },
}

type Runs = Arc<Mutex<HashMap<String, RunState>>>;

fn lock(runs: &Runs) -> MutexGuard<'_, HashMap<String, RunState>> {
    runs.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Written next to other runs' markers while an agent runs, removed when it exits.
///
/// Lets another process see the run: it is alive while both the owning
/// process (which collects the transcript) and the agent are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RunMarker {
    owner_pid: u32,
    agent_pid: u32,
}

impl RunMarker {
    fn is_alive(&self) -> bool {
        process_running(self.owner_pid) && process_running(self.agent_pid)
    }
}

#[cfg(unix)]
fn process_running(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        // Exists, owned by another user
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn process_running(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn terminate(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|e| Error::agent(format!("Invalid agent pid {}: {}", pid, e)))?;
    kill(Pid::from_raw(raw), Signal::SIGTERM)
        .map_err(|e| Error::agent(format!("Failed to stop agent process {}: {}", pid, e)))
}

#[cfg(not(unix))]
fn terminate(pid: u32) -> Result<()> {
    Err(Error::agent(format!("Cannot stop agent process {} on this platform", pid)))
}

fn remove_marker(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove run marker");
        }
    }
}

/// Runs the configured agent program as a child process per session.
///
/// Stdout becomes the transcript. With a markers directory, runs owned by
/// other processes report as alive (and can be stopped) until they exit.
/// Without one, sessions live as long as this process.
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
    runs: Runs,
    events: broadcast::Sender<StatusEvent>,
    counter: AtomicU64,
    markers_dir: Option<PathBuf>,
}

impl CommandBackend {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            program: program.into(),
            args,
            runs: Arc::new(Mutex::new(HashMap::new())),
            events,
            counter: AtomicU64::new(0),
            markers_dir: None,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
    }

    /// Share run state with other processes through `dir`
    pub fn with_markers_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.markers_dir = Some(dir.into());
        self
    }

    fn next_session_id(&self, prompt: &str, working_dir: &Path) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        let hash_input = format!("{}:{}:{}:{}", working_dir.display(), prompt, nanos, n);
        let hash = Sha256::digest(hash_input.as_bytes());
        hex::encode(&hash[..8])
    }

    fn marker_path(&self, session_id: &str) -> Option<PathBuf> {
        self.markers_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.toml", session_id)))
    }

    fn write_marker(&self, session_id: &str, agent_pid: u32) -> Option<PathBuf> {
        let path = self.marker_path(session_id)?;
        let marker = RunMarker {
            owner_pid: std::process::id(),
            agent_pid,
        };

        let written = toml::to_string(&marker)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            .and_then(|content| {
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir)?;
                }
                std::fs::write(&path, content)
            });

        match written {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(session = %session_id, error = %e, "Failed to write run marker");
                None
            }
        }
    }

    /// Live run of another process, cleaning up markers whose run is gone
    fn foreign_run(&self, session_id: &str) -> Option<RunMarker> {
        let path = self.marker_path(session_id)?;
        let content = std::fs::read_to_string(&path).ok()?;

        match toml::from_str::<RunMarker>(&content) {
            Ok(marker) if marker.is_alive() => Some(marker),
            Ok(_) => {
                debug!(session = %session_id, "Removing stale run marker");
                remove_marker(&path);
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable run marker");
                None
            }
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut buf = String::new();
    if let Some(mut reader) = reader {
        if let Err(e) = reader.read_to_string(&mut buf).await {
            warn!(error = %e, "Failed to read agent output");
        }
    }
    buf
}

#[async_trait]
impl AgentBackend for CommandBackend {
    async fn start(&self, prompt: &str, working_dir: &Path) -> Result<String> {
        let session_id = self.next_session_id(prompt, working_dir);
        debug!(session = %session_id, program = %self.program, dir = %working_dir.display(), "Starting agent");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(prompt)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::agent(format!("Failed to start {}: {}", self.program, e)))?;

        let marker = child.id().and_then(|pid| self.write_marker(&session_id, pid));

        let (stop_tx, stop_rx) = oneshot::channel();
        lock(&self.runs).insert(
            session_id.clone(),
            RunState::Running { stop: Some(stop_tx) },
        );
        let _ = self.events.send(StatusEvent::running(&session_id));

        let stdout = tokio::spawn(read_all(child.stdout.take()));
        let stderr = tokio::spawn(read_all(child.stderr.take()));
        let runs = Arc::clone(&self.runs);
        let events = self.events.clone();
        let id = session_id.clone();

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                Ok(()) = stop_rx => {
                    if let Err(e) = child.kill().await {
                        warn!(session = %id, error = %e, "Failed to kill agent");
                    }
                    child.wait().await
                }
            };

            let output = stdout.await.unwrap_or_default();
            let errors = stderr.await.unwrap_or_default();

            let transcript = match status {
                Ok(status) if status.success() => Transcript::finished(output),
                Ok(status) => Transcript {
                    outcome: TranscriptOutcome::Failed {
                        message: errors
                            .lines()
                            .rev()
                            .find(|l| !l.trim().is_empty())
                            .map(|l| l.trim().to_string())
                            .unwrap_or_else(|| format!("agent exited with {}", status)),
                    },
                    output,
                },
                Err(e) => Transcript::failed(format!("failed to wait for agent: {}", e)),
            };

            info!(session = %id, "Agent session finished");
            if let Some(path) = &marker {
                remove_marker(path);
            }
            lock(&runs).insert(id.clone(), RunState::Exited { transcript });
            let _ = events.send(StatusEvent::idle(id));
        });

        Ok(session_id)
    }

    async fn transcript(&self, session_id: &str) -> Result<Transcript> {
        let running = Transcript {
            outcome: TranscriptOutcome::Running,
            output: String::new(),
        };

        match lock(&self.runs).get(session_id) {
            Some(RunState::Running { .. }) => return Ok(running),
            Some(RunState::Exited { transcript }) => return Ok(transcript.clone()),
            None => {}
        }

        // Another process owns it and will finalize it
        match self.foreign_run(session_id) {
            Some(_) => Ok(running),
            None => Err(Error::agent(format!("Unknown agent session {}", session_id))),
        }
    }

    /// Known to this process (running or holding its transcript), or
    /// running under another process
    async fn is_alive(&self, session_id: &str) -> Result<bool> {
        if lock(&self.runs).contains_key(session_id) {
            return Ok(true);
        }
        Ok(self.foreign_run(session_id).is_some())
    }

    async fn stop(&self, session_id: &str) -> Result<()> {
        {
            let mut runs = lock(&self.runs);
            match runs.get_mut(session_id) {
                Some(RunState::Running { stop }) => {
                    if let Some(stop) = stop.take() {
                        debug!(session = %session_id, "Stopping agent");
                        let _ = stop.send(());
                    }
                    return Ok(());
                }
                Some(RunState::Exited { .. }) => return Ok(()),
                None => {}
            }
        }

        if let Some(marker) = self.foreign_run(session_id) {
            debug!(session = %session_id, pid = marker.agent_pid, "Stopping agent of another process");
            terminate(marker.agent_pid)?;
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::backends::traits::AgentStatus;
    use std::time::Duration;

    fn shell() -> CommandBackend {
        CommandBackend::new("sh", vec!["-c".to_string()])
    }

    async fn wait_idle(rx: &mut broadcast::Receiver<StatusEvent>, id: &str) {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let event = rx.recv().await.unwrap();
                if event.session_id == id && event.status == AgentStatus::Idle {
                    break;
                }
            }
        })
        .await
        .expect("agent never went idle");
    }

    #[tokio::test]
    async fn finished_session_exposes_stdout_as_transcript() {
        let backend = shell();
        let mut rx = backend.subscribe();
        let dir = tempfile::TempDir::new().unwrap();

        let id = backend.start("echo 'Add greeting'", dir.path()).await.unwrap();
        wait_idle(&mut rx, &id).await;

        let transcript = backend.transcript(&id).await.unwrap();
        assert_eq!(transcript.outcome, TranscriptOutcome::Finished);
        assert_eq!(transcript.commit_subject().as_deref(), Some("Add greeting"));
        assert!(backend.is_alive(&id).await.unwrap());
    }

    #[tokio::test]
    async fn failing_command_reports_stderr() {
        let backend = shell();
        let mut rx = backend.subscribe();
        let dir = tempfile::TempDir::new().unwrap();

        let id = backend.start("echo boom >&2; exit 3", dir.path()).await.unwrap();
        wait_idle(&mut rx, &id).await;

        let transcript = backend.transcript(&id).await.unwrap();
        assert_eq!(
            transcript.outcome,
            TranscriptOutcome::Failed { message: "boom".to_string() }
        );
    }

    #[tokio::test]
    async fn stop_ends_a_running_session() {
        let backend = shell();
        let mut rx = backend.subscribe();
        let dir = tempfile::TempDir::new().unwrap();

        let id = backend.start("exec sleep 30", dir.path()).await.unwrap();
        assert_eq!(
            backend.transcript(&id).await.unwrap().outcome,
            TranscriptOutcome::Running
        );

        backend.stop(&id).await.unwrap();
        wait_idle(&mut rx, &id).await;

        assert!(matches!(
            backend.transcript(&id).await.unwrap().outcome,
            TranscriptOutcome::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn runs_of_another_process_stay_alive_until_they_exit() {
        let markers = tempfile::TempDir::new().unwrap();
        let owner = shell().with_markers_dir(markers.path());
        let other = shell().with_markers_dir(markers.path());
        let mut rx = owner.subscribe();
        let dir = tempfile::TempDir::new().unwrap();

        let id = owner.start("exec sleep 30", dir.path()).await.unwrap();
        assert!(markers.path().join(format!("{}.toml", id)).exists());

        assert!(other.is_alive(&id).await.unwrap());
        assert_eq!(
            other.transcript(&id).await.unwrap().outcome,
            TranscriptOutcome::Running
        );

        other.stop(&id).await.unwrap();
        wait_idle(&mut rx, &id).await;

        assert!(!markers.path().join(format!("{}.toml", id)).exists());
        assert!(!other.is_alive(&id).await.unwrap());
        assert!(other.transcript(&id).await.is_err());
        assert!(owner.is_alive(&id).await.unwrap());
    }

    #[tokio::test]
    async fn stale_marker_is_not_alive_and_gets_removed() {
        let markers = tempfile::TempDir::new().unwrap();
        let backend = shell().with_markers_dir(markers.path());

        let mut exited = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = exited.id();
        exited.wait().unwrap();

        let path = markers.path().join("left-behind.toml");
        let marker = RunMarker {
            owner_pid: std::process::id(),
            agent_pid: dead_pid,
        };
        std::fs::write(&path, toml::to_string(&marker).unwrap()).unwrap();

        assert!(!backend.is_alive("left-behind").await.unwrap());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn unknown_sessions_are_not_alive() {
        let backend = shell();
        assert!(!backend.is_alive("missing").await.unwrap());
        assert!(backend.transcript("missing").await.is_err());
        tokio_test::assert_ok!(backend.stop("missing").await);
    }
}
