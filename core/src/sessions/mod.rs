//! Named, reusable long-lived background sessions.
//!
//! Each session is one OS process (its own group) with three persisted
//! artifacts under the sessions directory: an output log both streams are
//! appended to in arrival order, a control log of everything sent to the
//! session, and a status file rewritten on state transitions. The
//! artifacts are the only state shared across supervising-process
//! restarts; there is no cross-process lock, so readers must tolerate
//! eventually-consistent tails relative to the writer.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::sync::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use corral_protocol::ControlPayload;
use corral_protocol::ControlRecord;
use corral_protocol::SessionState;
use corral_protocol::SessionSummary;
use corral_protocol::system_time_to_unix_millis;

use crate::config::RuntimeConfig;
use crate::containment;
use crate::error::CorralErr;
use crate::error::Result;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(200);
const STDIN_CHANNEL_CAPACITY: usize = 64;
const PUMP_CHUNK_SIZE: usize = 4096;

static SESSION_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,63}$").expect("invalid session name regex")
});

/// Result of a `start` call: the session plus whether an existing live
/// entry was attached to instead of spawning a new process.
#[derive(Debug, Clone)]
pub struct StartedSession {
    pub summary: SessionSummary,
    pub reused: bool,
}

#[derive(Debug, Clone)]
struct SessionArtifacts {
    output: PathBuf,
    control: PathBuf,
    status: PathBuf,
}

fn artifacts_for(dir: &Path, name: &str) -> SessionArtifacts {
    SessionArtifacts {
        output: dir.join(format!("{name}.out.log")),
        control: dir.join(format!("{name}.control.jsonl")),
        status: dir.join(format!("{name}.status.json")),
    }
}

struct ManagedSession {
    name: String,
    command: String,
    working_dir: PathBuf,
    window_label: Option<String>,
    pid: Option<u32>,
    started_at: SystemTime,
    artifacts: SessionArtifacts,
    stdin_tx: mpsc::Sender<Vec<u8>>,
    state: Arc<RwLock<SessionState>>,
    child: Arc<Mutex<Child>>,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
    stdin_task: JoinHandle<()>,
    monitor_task: JoinHandle<()>,
}

impl ManagedSession {
    async fn summary(&self) -> SessionSummary {
        SessionSummary {
            name: self.name.clone(),
            command: self.command.clone(),
            working_dir: self.working_dir.clone(),
            window_label: self.window_label.clone(),
            pid: self.pid,
            state: self.state.read().await.clone(),
            started_at_ms: system_time_to_unix_millis(self.started_at),
            output_path: self.artifacts.output.clone(),
            control_path: self.artifacts.control.clone(),
            status_path: self.artifacts.status.clone(),
        }
    }

    async fn is_running(&self) -> bool {
        self.state.read().await.is_running()
    }

    /// Deliver a signal to the whole process group, falling back to killing
    /// the immediate child when the group is gone and the intent was fatal.
    async fn deliver_signal(&self, signal: i32) -> bool {
        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                let killed = unsafe { libc::kill(-(pid as i32), signal) };
                if killed == 0 {
                    return true;
                }
            }
            if signal == libc::SIGKILL || signal == libc::SIGTERM {
                return self.child.lock().await.start_kill().is_ok();
            }
            false
        }
        #[cfg(not(unix))]
        {
            let _ = signal;
            self.child.lock().await.start_kill().is_ok()
        }
    }

    /// Synchronous best-effort group kill for shutdown paths that cannot
    /// await (the supervisor's `Drop` backstop).
    fn kill_group_raw(&self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
        }
    }
}

impl Drop for ManagedSession {
    fn drop(&mut self) {
        self.stdout_task.abort();
        self.stderr_task.abort();
        self.stdin_task.abort();
        self.monitor_task.abort();
    }
}

/// Supervisor for every named session in this process.
pub struct SessionSupervisor {
    config: Arc<RuntimeConfig>,
    sessions: Mutex<HashMap<String, Arc<ManagedSession>>>,
}

impl SessionSupervisor {
    pub fn new(config: Arc<RuntimeConfig>) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Start a session, or attach to the live one already registered under
    /// `name` (`reused = true`). A dead entry under the same name is
    /// replaced by a fresh spawn.
    pub async fn start(
        &self,
        name: &str,
        command: &str,
        working_dir: Option<&Path>,
        env: &HashMap<String, String>,
        window_label: Option<&str>,
    ) -> Result<StartedSession> {
        if !SESSION_NAME_RE.is_match(name) {
            return Err(CorralErr::InvalidSessionName {
                name: name.to_string(),
            });
        }

        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(name) {
            if existing.is_running().await {
                return Ok(StartedSession {
                    summary: existing.summary().await,
                    reused: true,
                });
            }
            sessions.remove(name);
        }

        let session = self
            .spawn_session(name, command, working_dir, env, window_label)
            .await?;
        let summary = session.summary().await;
        sessions.insert(name.to_string(), session);

        Ok(StartedSession {
            summary,
            reused: false,
        })
    }

    async fn spawn_session(
        &self,
        name: &str,
        command_text: &str,
        working_dir: Option<&Path>,
        env: &HashMap<String, String>,
        window_label: Option<&str>,
    ) -> Result<Arc<ManagedSession>> {
        let cwd = containment::resolve_working_dir(&self.config.workspace_root, working_dir);
        tokio::fs::create_dir_all(&self.config.sessions_dir)
            .await
            .map_err(|err| CorralErr::CreateSession {
                name: name.to_string(),
                cause: format!("failed to create sessions dir: {err}"),
            })?;
        let artifacts = artifacts_for(&self.config.sessions_dir, name);

        // Fresh start: the output artifact starts empty.
        tokio::fs::write(&artifacts.output, b"")
            .await
            .map_err(|err| CorralErr::CreateSession {
                name: name.to_string(),
                cause: format!("failed to create output artifact: {err}"),
            })?;

        let mut command = Command::new(self.config.shell());
        command
            .arg("-c")
            .arg(command_text)
            .current_dir(&cwd)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|err| CorralErr::CreateSession {
            name: name.to_string(),
            cause: err.to_string(),
        })?;
        let pid = child.id();

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdin = child.stdin.take();
        let (Some(stdout), Some(stderr), Some(stdin)) = (stdout, stderr, stdin) else {
            let _ = child.start_kill();
            return Err(CorralErr::CreateSession {
                name: name.to_string(),
                cause: "session pipes were unexpectedly not available".to_string(),
            });
        };

        let (stdin_tx, stdin_rx) = mpsc::channel::<Vec<u8>>(STDIN_CHANNEL_CAPACITY);
        let state = Arc::new(RwLock::new(SessionState::Running));
        let child = Arc::new(Mutex::new(child));
        let started_at = SystemTime::now();

        let summary = SessionSummary {
            name: name.to_string(),
            command: command_text.to_string(),
            working_dir: cwd.clone(),
            window_label: window_label.map(ToString::to_string),
            pid,
            state: SessionState::Running,
            started_at_ms: system_time_to_unix_millis(started_at),
            output_path: artifacts.output.clone(),
            control_path: artifacts.control.clone(),
            status_path: artifacts.status.clone(),
        };
        write_status(&artifacts.status, &summary).await;

        let stdout_task = spawn_pump_task(artifacts.output.clone(), stdout);
        let stderr_task = spawn_pump_task(artifacts.output.clone(), stderr);
        let stdin_task = spawn_stdin_task(stdin, stdin_rx);
        let monitor_task = spawn_monitor_task(
            Arc::clone(&child),
            Arc::clone(&state),
            artifacts.status.clone(),
            summary.clone(),
        );

        Ok(Arc::new(ManagedSession {
            name: name.to_string(),
            command: command_text.to_string(),
            working_dir: cwd,
            window_label: summary.window_label,
            pid,
            started_at,
            artifacts,
            stdin_tx,
            state,
            child,
            stdout_task,
            stderr_task,
            stdin_task,
            monitor_task,
        }))
    }

    /// Last `line_count` lines currently persisted for the session. Reads
    /// the artifact without blocking the writer.
    pub async fn capture_output(&self, name: &str, line_count: usize) -> Result<Vec<String>> {
        let session = self.get(name).await?;
        let raw = match tokio::fs::read(&session.artifacts.output).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(CorralErr::Io(err)),
        };
        let text = String::from_utf8_lossy(&raw);
        let lines: Vec<String> = text.lines().map(ToString::to_string).collect();
        let skip = lines.len().saturating_sub(line_count);
        Ok(lines.into_iter().skip(skip).collect())
    }

    /// Write to the session's input channel.
    pub async fn send_input(&self, name: &str, data: &str, append_newline: bool) -> Result<()> {
        let session = self.get(name).await?;
        let mut bytes = data.as_bytes().to_vec();
        if append_newline {
            bytes.push(b'\n');
        }
        session
            .stdin_tx
            .send(bytes)
            .await
            .map_err(|_| CorralErr::SessionStdin {
                name: name.to_string(),
            })?;
        append_control(
            &session.artifacts.control,
            ControlPayload::Input {
                data: data.to_string(),
                newline: append_newline,
            },
        )
        .await;
        Ok(())
    }

    /// Deliver a named OS signal to the session's process group. Defaults
    /// to a graceful terminate when no name is given.
    pub async fn send_signal(&self, name: &str, signal: Option<&str>) -> Result<()> {
        let session = self.get(name).await?;
        let signal_name = signal.unwrap_or("TERM");
        let Some(signal_no) = parse_signal(signal_name) else {
            return Err(CorralErr::UnknownSignal {
                name: signal_name.to_string(),
            });
        };
        session.deliver_signal(signal_no).await;
        append_control(
            &session.artifacts.control,
            ControlPayload::Signal {
                signal: signal_name.to_string(),
            },
        )
        .await;
        Ok(())
    }

    /// Terminate the session and release its bookkeeping entry.
    pub async fn kill_session(&self, name: &str) -> Result<()> {
        let session = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(name).ok_or_else(|| CorralErr::UnknownSession {
                name: name.to_string(),
            })?
        };
        kill_and_record(&session, ControlPayload::Kill).await;
        Ok(())
    }

    /// All currently tracked sessions, sorted by name.
    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let sessions: Vec<Arc<ManagedSession>> = {
            let guard = self.sessions.lock().await;
            guard.values().cloned().collect()
        };
        let mut summaries = Vec::with_capacity(sessions.len());
        for session in sessions {
            summaries.push(session.summary().await);
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Terminate every tracked session. Best-effort per session: a failure
    /// to kill one must not block killing the others.
    pub async fn cleanup_all(&self, reason: &str) {
        let sessions: Vec<Arc<ManagedSession>> = {
            let mut guard = self.sessions.lock().await;
            guard.drain().map(|(_, session)| session).collect()
        };
        for session in sessions {
            kill_and_record(
                &session,
                ControlPayload::Cleanup {
                    reason: reason.to_string(),
                },
            )
            .await;
        }
    }

    async fn get(&self, name: &str) -> Result<Arc<ManagedSession>> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(name)
            .cloned()
            .ok_or_else(|| CorralErr::UnknownSession {
                name: name.to_string(),
            })
    }
}

impl Drop for SessionSupervisor {
    fn drop(&mut self) {
        // Backstop only: the owner is expected to call `cleanup_all` on
        // shutdown. This cannot await, so it kills raw and moves on.
        if let Ok(sessions) = self.sessions.try_lock() {
            for session in sessions.values() {
                session.kill_group_raw();
            }
        }
    }
}

const SIGKILL_NUMBER: i32 = 9;

async fn kill_and_record(session: &Arc<ManagedSession>, payload: ControlPayload) {
    if session.is_running().await {
        if !session.deliver_signal(SIGKILL_NUMBER).await {
            tracing::warn!(name = %session.name, "failed to kill session process group");
        }
        let next = SessionState::Exited {
            exit_code: None,
            signal: Some(SIGKILL_NUMBER),
            finished_at_ms: system_time_to_unix_millis(SystemTime::now()),
        };
        *session.state.write().await = next;
    }
    write_status(&session.artifacts.status, &session.summary().await).await;
    append_control(&session.artifacts.control, payload).await;
}

fn spawn_pump_task<R>(path: PathBuf, mut reader: R) -> JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut file = match tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to open output artifact");
                return;
            }
        };
        let mut buf = vec![0u8; PUMP_CHUNK_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if file.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                    let _ = file.flush().await;
                }
            }
        }
    })
}

fn spawn_stdin_task(
    mut stdin: tokio::process::ChildStdin,
    mut rx: mpsc::Receiver<Vec<u8>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            if stdin.write_all(&chunk).await.is_err() {
                break;
            }
            let _ = stdin.flush().await;
        }
    })
}

fn spawn_monitor_task(
    child: Arc<Mutex<Child>>,
    state: Arc<RwLock<SessionState>>,
    status_path: PathBuf,
    mut summary: SessionSummary,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let waited = child.lock().await.try_wait();
            match waited {
                Ok(Some(status)) => {
                    let next = SessionState::Exited {
                        exit_code: status.code(),
                        signal: status_signal(&status),
                        finished_at_ms: system_time_to_unix_millis(SystemTime::now()),
                    };
                    *state.write().await = next.clone();
                    summary.state = next;
                    write_status(&status_path, &summary).await;
                    break;
                }
                Ok(None) => {}
                Err(err) => {
                    let next = SessionState::Failed {
                        message: err.to_string(),
                        finished_at_ms: system_time_to_unix_millis(SystemTime::now()),
                    };
                    *state.write().await = next.clone();
                    summary.state = next;
                    write_status(&status_path, &summary).await;
                    break;
                }
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    })
}

#[cfg(unix)]
fn status_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn status_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

async fn write_status(path: &Path, summary: &SessionSummary) {
    match serde_json::to_string_pretty(summary) {
        Ok(json) => {
            if let Err(err) = tokio::fs::write(path, json).await {
                tracing::warn!(path = %path.display(), error = %err, "failed to write status artifact");
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to serialize session status");
        }
    }
}

async fn append_control(path: &Path, payload: ControlPayload) {
    let record = ControlRecord {
        at: Utc::now(),
        payload,
    };
    let line = match serde_json::to_string(&record) {
        Ok(mut line) => {
            line.push('\n');
            line
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to serialize control record");
            return;
        }
    };
    match tokio::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .await
    {
        Ok(mut file) => {
            if let Err(err) = file.write_all(line.as_bytes()).await {
                tracing::warn!(path = %path.display(), error = %err, "failed to append control record");
            }
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to open control artifact");
        }
    }
}

#[cfg(unix)]
fn parse_signal(name: &str) -> Option<i32> {
    let upper = name.trim().to_ascii_uppercase();
    let short = upper.strip_prefix("SIG").unwrap_or(&upper);
    match short {
        "HUP" => Some(libc::SIGHUP),
        "INT" => Some(libc::SIGINT),
        "QUIT" => Some(libc::SIGQUIT),
        "KILL" => Some(libc::SIGKILL),
        "USR1" => Some(libc::SIGUSR1),
        "USR2" => Some(libc::SIGUSR2),
        "TERM" => Some(libc::SIGTERM),
        "CONT" => Some(libc::SIGCONT),
        "STOP" => Some(libc::SIGSTOP),
        _ => None,
    }
}

#[cfg(not(unix))]
fn parse_signal(name: &str) -> Option<i32> {
    let upper = name.trim().to_ascii_uppercase();
    let short = upper.strip_prefix("SIG").unwrap_or(&upper);
    match short {
        "KILL" => Some(9),
        "TERM" => Some(15),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn session_names_are_validated() {
        assert!(SESSION_NAME_RE.is_match("logs"));
        assert!(SESSION_NAME_RE.is_match("build-2.watch"));
        assert!(!SESSION_NAME_RE.is_match(""));
        assert!(!SESSION_NAME_RE.is_match(".hidden"));
        assert!(!SESSION_NAME_RE.is_match("has space"));
        assert!(!SESSION_NAME_RE.is_match("a/b"));
    }

    #[test]
    fn artifact_paths_are_deterministic() {
        let artifacts = artifacts_for(Path::new("/state/sessions"), "logs");
        assert_eq!(artifacts.output, PathBuf::from("/state/sessions/logs.out.log"));
        assert_eq!(
            artifacts.control,
            PathBuf::from("/state/sessions/logs.control.jsonl")
        );
        assert_eq!(
            artifacts.status,
            PathBuf::from("/state/sessions/logs.status.json")
        );
    }

    #[cfg(unix)]
    #[test]
    fn signal_names_accept_sig_prefix() {
        assert_eq!(parse_signal("TERM"), Some(libc::SIGTERM));
        assert_eq!(parse_signal("sigkill"), Some(libc::SIGKILL));
        assert_eq!(parse_signal("USR1"), Some(libc::SIGUSR1));
        assert_eq!(parse_signal("NOPE"), None);
    }
}
