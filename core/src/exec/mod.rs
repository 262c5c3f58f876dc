//! Prompt-guarded execution of a single command.
//!
//! One spawned process per request, its own process group, both pipes
//! drained concurrently. Four ways out race to finalize first: natural
//! exit, hard timeout, external cancellation, and the idle-prompt watchdog.
//! Finalize happens exactly once; signals arriving after it are no-ops.

mod buffer;
mod prompt;

use std::path::Path;
use std::process::ExitStatus;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::Command;
use tokio::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use corral_protocol::CommandRequest;
use corral_protocol::ExecutionResult;
use corral_protocol::PromptSignature;

use crate::config::RuntimeConfig;
use crate::containment;
use crate::error::Result;

use buffer::BinarySniffer;
use buffer::RollingBuffer;
use buffer::TailWindow;

const READ_CHUNK_SIZE: usize = 8192;

// Hardcoded since it does not seem worth pulling signal tables in here.
const SIGKILL_CODE: i32 = 9;

/// Runs one command at a time; cheap to clone per request via `Arc` config.
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    config: Arc<RuntimeConfig>,
}

#[derive(Debug)]
enum Terminal {
    TimedOut,
    Aborted,
    PromptInterrupted(PromptSignature),
}

impl ExecutionEngine {
    pub fn new(config: Arc<RuntimeConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Vet the request against the workspace root, then run it. The only
    /// error out of here is a pre-flight `PolicyViolation`; everything past
    /// a successful validation is reported in-band in the result.
    pub async fn run(
        &self,
        request: &CommandRequest,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult> {
        let cwd = containment::resolve_working_dir(
            &self.config.workspace_root,
            request.working_dir.as_deref(),
        );
        containment::vet_command_text(&self.config.workspace_root, &cwd, &request.command_text)?;
        Ok(self.run_in(request, &cwd, cancel).await)
    }

    /// Run a request whose containment has already been checked.
    pub(crate) async fn run_in(
        &self,
        request: &CommandRequest,
        cwd: &Path,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let shell = request
            .shell_override
            .as_deref()
            .unwrap_or_else(|| self.config.shell())
            .to_string();

        // Non-login, non-interactive: profile side effects have no place in
        // a confined runner, and they would pollute the captured streams.
        let mut command = Command::new(&shell);
        command
            .arg("-c")
            .arg(&request.command_text)
            .current_dir(cwd)
            .envs(&request.extra_env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => return spawn_failure(&format!("failed to spawn command: {err}")),
        };
        let pid = child.id();

        let (Some(stdout_pipe), Some(stderr_pipe)) = (child.stdout.take(), child.stderr.take())
        else {
            let _ = child.start_kill();
            return spawn_failure("stdout/stderr pipes were unexpectedly not available");
        };
        let mut stdout_pipe = BufReader::new(stdout_pipe);
        let mut stderr_pipe = BufReader::new(stderr_pipe);

        let hard_timeout = self.config.clamp_timeout(request.timeout_ms);
        let idle_interval = Duration::from_millis(self.config.idle_prompt_interval_ms);
        let grace = Duration::from_millis(self.config.prompt_grace_ms);

        let mut stdout_buf = RollingBuffer::new(self.config.max_stream_buffer_bytes);
        let mut stderr_buf = RollingBuffer::new(self.config.max_stream_buffer_bytes);
        let mut tail = TailWindow::new(self.config.tail_window_chars);
        let mut sniffer = BinarySniffer::default();

        let mut tmp_stdout = [0u8; READ_CHUNK_SIZE];
        let mut tmp_stderr = [0u8; READ_CHUNK_SIZE];
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut child_finished = false;
        let mut exit_status: Option<ExitStatus> = None;
        let mut terminal: Option<Terminal> = None;
        let mut pending_prompt: Option<PromptSignature> = None;
        let mut last_data = Instant::now();
        let mut kill_deadline: Option<Instant> = None;

        let timeout_fut = tokio::time::sleep(hard_timeout);
        tokio::pin!(timeout_fut);

        while stdout_open || stderr_open || !child_finished {
            // The idle deadline is recomputed from the last-data instant on
            // every turn of the loop, so fresh output re-arms the watchdog
            // instead of letting a stale detection fire.
            let idle_deadline = last_data + idle_interval;
            tokio::select! {
                _ = &mut timeout_fut, if terminal.is_none() => {
                    kill_group(pid, &mut child, true);
                    terminal = Some(Terminal::TimedOut);
                    child_finished = true;
                }

                _ = cancel.cancelled(), if terminal.is_none() => {
                    kill_group(pid, &mut child, true);
                    terminal = Some(Terminal::Aborted);
                    child_finished = true;
                }

                res = child.wait(), if !child_finished => {
                    if let Ok(status) = res {
                        exit_status = Some(status);
                    }
                    child_finished = true;
                }

                read = stdout_pipe.read(&mut tmp_stdout), if stdout_open => {
                    match read {
                        Ok(0) | Err(_) => stdout_open = false,
                        Ok(n) => {
                            let chunk = &tmp_stdout[..n];
                            last_data = Instant::now();
                            sniffer.observe(chunk);
                            stdout_buf.append(chunk);
                            if terminal.is_none() {
                                if sniffer.detected() {
                                    pending_prompt = None;
                                } else {
                                    tail.append(chunk);
                                    pending_prompt = tail
                                        .last_non_empty_line()
                                        .and_then(prompt::detect_prompt);
                                }
                            }
                        }
                    }
                }

                read = stderr_pipe.read(&mut tmp_stderr), if stderr_open => {
                    match read {
                        Ok(0) | Err(_) => stderr_open = false,
                        Ok(n) => {
                            let chunk = &tmp_stderr[..n];
                            last_data = Instant::now();
                            sniffer.observe(chunk);
                            stderr_buf.append(chunk);
                            if terminal.is_none() {
                                if sniffer.detected() {
                                    pending_prompt = None;
                                } else {
                                    tail.append(chunk);
                                    pending_prompt = tail
                                        .last_non_empty_line()
                                        .and_then(prompt::detect_prompt);
                                }
                            }
                        }
                    }
                }

                _ = tokio::time::sleep_until(idle_deadline),
                    if pending_prompt.is_some() && terminal.is_none() && !child_finished =>
                {
                    if let Some(signature) = pending_prompt.take() {
                        tracing::debug!(
                            kind = signature.kind.as_str(),
                            "interrupting command stalled on interactive prompt"
                        );
                        kill_group(pid, &mut child, false);
                        kill_deadline = Some(Instant::now() + grace);
                        terminal = Some(Terminal::PromptInterrupted(signature));
                    }
                }

                _ = tokio::time::sleep_until(kill_deadline.unwrap_or_else(Instant::now)),
                    if kill_deadline.is_some() && !child_finished =>
                {
                    kill_group(pid, &mut child, true);
                    kill_deadline = None;
                }
            }
        }

        finalize(
            terminal,
            exit_status,
            &stdout_buf,
            &stderr_buf,
            &sniffer,
        )
    }
}

/// Single finalize step for all four terminal states. Runs exactly once per
/// request; kill errors and late signals before this point were ignored.
fn finalize(
    terminal: Option<Terminal>,
    exit_status: Option<ExitStatus>,
    stdout_buf: &RollingBuffer,
    stderr_buf: &RollingBuffer,
    sniffer: &BinarySniffer,
) -> ExecutionResult {
    let (exit_code, signal) = match &exit_status {
        Some(status) => (status.code(), status_signal(status)),
        None => (None, None),
    };

    let timed_out = matches!(&terminal, Some(Terminal::TimedOut));
    let aborted = matches!(&terminal, Some(Terminal::Aborted));
    let prompt_signature = match terminal {
        Some(Terminal::PromptInterrupted(signature)) => Some(signature),
        _ => None,
    };

    let mut result = ExecutionResult {
        stdout_text: String::new(),
        stderr_text: String::new(),
        exit_code,
        signal,
        timed_out,
        aborted,
        interrupted_for_prompt: prompt_signature.is_some(),
        prompt_signature,
        binary_detected: sniffer.detected(),
        bytes_received: stdout_buf.total_received() + stderr_buf.total_received(),
        truncated: stdout_buf.truncated() || stderr_buf.truncated(),
    };

    if (result.timed_out || result.aborted) && result.signal.is_none() {
        result.signal = Some(SIGKILL_CODE);
    }

    if sniffer.detected() {
        result.stdout_text = format!(
            "[binary output detected: {} bytes on stdout; text suppressed]",
            stdout_buf.total_received()
        );
        result.stderr_text = format!(
            "[binary output detected: {} bytes on stderr; text suppressed]",
            stderr_buf.total_received()
        );
    } else {
        result.stdout_text = decode_stream(stdout_buf, "stdout");
        result.stderr_text = decode_stream(stderr_buf, "stderr");
    }

    result
}

fn decode_stream(buf: &RollingBuffer, stream: &str) -> String {
    let mut text = String::from_utf8_lossy(&buf.contents()).into_owned();
    if buf.truncated() {
        text.push_str(&format!(
            "\n[{stream} truncated: earliest {} bytes evicted]",
            buf.evicted_bytes()
        ));
    }
    text
}

fn spawn_failure(message: &str) -> ExecutionResult {
    ExecutionResult {
        stderr_text: message.to_string(),
        exit_code: Some(127),
        ..Default::default()
    }
}

#[cfg(unix)]
fn status_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn status_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Signal the whole process group so pipelines and subshells go down with
/// the shell. Falls back to killing the immediate child when the group is
/// unavailable.
#[cfg(unix)]
fn kill_group(pid: Option<u32>, child: &mut Child, force: bool) {
    if let Some(pid) = pid {
        let signal = if force { libc::SIGKILL } else { libc::SIGTERM };
        let killed = unsafe { libc::kill(-(pid as i32), signal) };
        if killed == 0 {
            return;
        }
    }
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>, child: &mut Child, _force: bool) {
    let _ = child.start_kill();
}

#[cfg(all(test, unix))]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    fn engine() -> ExecutionEngine {
        let mut config = RuntimeConfig::new(std::env::temp_dir());
        config.min_timeout_ms = 50;
        config.idle_prompt_interval_ms = 200;
        config.prompt_grace_ms = 100;
        ExecutionEngine::new(Arc::new(config))
    }

    fn request(text: &str) -> CommandRequest {
        CommandRequest::new(text)
    }

    #[tokio::test]
    async fn echo_completes_with_stdout() {
        let engine = engine();
        let cwd = engine.config().workspace_root.clone();
        let result = engine
            .run_in(&request("echo hi"), &cwd, CancellationToken::new())
            .await;
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout_text, "hi\n");
        assert!(result.completed());
        assert!(!result.binary_detected);
    }

    #[tokio::test]
    async fn spawn_failure_is_reported_in_band() {
        let engine = engine();
        let cwd = engine.config().workspace_root.clone();
        let mut req = request("echo hi");
        req.shell_override = Some("/nonexistent/shell-binary".to_string());
        let result = engine.run_in(&req, &cwd, CancellationToken::new()).await;
        assert_eq!(result.exit_code, Some(127));
        assert!(result.stderr_text.contains("failed to spawn command"));
    }

    #[tokio::test]
    async fn hard_timeout_kills_the_process_group() {
        let engine = engine();
        let cwd = engine.config().workspace_root.clone();
        let mut req = request("sleep 30");
        req.timeout_ms = Some(50);
        let result = engine.run_in(&req, &cwd, CancellationToken::new()).await;
        assert!(result.timed_out);
        assert!(!result.interrupted_for_prompt);
    }

    #[tokio::test]
    async fn cancellation_aborts_immediately() {
        let engine = engine();
        let cwd = engine.config().workspace_root.clone();
        let cancel = CancellationToken::new();
        let aborter = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            aborter.cancel();
        });
        let result = engine.run_in(&request("sleep 30"), &cwd, cancel).await;
        assert!(result.aborted);
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn stalled_prompt_is_interrupted() {
        let engine = engine();
        let cwd = engine.config().workspace_root.clone();
        let result = engine
            .run_in(
                &request("printf 'Continue? (y/n) '; sleep 30"),
                &cwd,
                CancellationToken::new(),
            )
            .await;
        assert!(result.interrupted_for_prompt);
        let signature = result.prompt_signature.unwrap();
        assert_eq!(signature.kind, corral_protocol::PromptKind::ConfirmYn);
    }

    #[tokio::test]
    async fn active_output_is_never_killed_for_an_old_prompt() {
        let engine = engine();
        let cwd = engine.config().workspace_root.clone();
        // Prints a prompt-like line once, then keeps producing fast enough
        // to re-arm the watchdog until it finishes on its own.
        let script = "printf 'Continue? (y/n)\\n'; for i in 1 2 3 4 5 6; do sleep 0.1; echo tick $i; done";
        let result = engine
            .run_in(&request(script), &cwd, CancellationToken::new())
            .await;
        assert!(!result.interrupted_for_prompt);
        assert_eq!(result.exit_code, Some(0));
    }

    #[tokio::test]
    async fn binary_output_is_suppressed() {
        let engine = engine();
        let cwd = engine.config().workspace_root.clone();
        let result = engine
            .run_in(
                &request("printf 'ab\\0cd\\0ef'"),
                &cwd,
                CancellationToken::new(),
            )
            .await;
        assert!(result.binary_detected);
        assert!(result.stdout_text.contains("binary output detected"));
        assert!(!result.stdout_text.contains("ab"));
    }
}
