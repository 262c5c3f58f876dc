use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

pub(crate) const DEFAULT_SHELL: &str = "/bin/bash";

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const MIN_TIMEOUT_MS: u64 = 1_000;
const MAX_TIMEOUT_MS: u64 = 600_000;
const STREAM_BUFFER_CAP_BYTES: usize = 512 * 1024; // 512 KiB per stream
const TAIL_WINDOW_CHARS: usize = 4_096;
const IDLE_PROMPT_INTERVAL_MS: u64 = 2_000;
const PROMPT_GRACE_MS: u64 = 500;

/// Process-level configuration consumed once at startup.
///
/// The workspace root is resolved when the config is constructed and never
/// mutated afterwards; every path the core touches must stay at or under it.
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    pub workspace_root: PathBuf,

    /// Shell used to run command text; individual requests may override it.
    #[serde(default)]
    pub shell_override: Option<String>,

    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "min_timeout_ms")]
    pub min_timeout_ms: u64,
    #[serde(default = "max_timeout_ms")]
    pub max_timeout_ms: u64,

    /// Byte ceiling for each per-stream rolling buffer.
    #[serde(default = "stream_buffer_cap")]
    pub max_stream_buffer_bytes: usize,

    /// Character ceiling for the decoded tail window used for prompt
    /// matching only.
    #[serde(default = "tail_window_chars")]
    pub tail_window_chars: usize,

    /// How long a detected prompt must sit with no new output before the
    /// command is interrupted. Tunable, not a strict guarantee.
    #[serde(default = "idle_prompt_interval_ms")]
    pub idle_prompt_interval_ms: u64,

    /// Grace between the graceful terminate signal and the forced kill.
    #[serde(default = "prompt_grace_ms")]
    pub prompt_grace_ms: u64,

    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,

    #[serde(default = "default_journal_path")]
    pub journal_path: PathBuf,
}

impl RuntimeConfig {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        let workspace_root = workspace_root.into();
        let workspace_root = std::fs::canonicalize(&workspace_root).unwrap_or(workspace_root);
        Self {
            workspace_root,
            shell_override: None,
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            min_timeout_ms: MIN_TIMEOUT_MS,
            max_timeout_ms: MAX_TIMEOUT_MS,
            max_stream_buffer_bytes: STREAM_BUFFER_CAP_BYTES,
            tail_window_chars: TAIL_WINDOW_CHARS,
            idle_prompt_interval_ms: IDLE_PROMPT_INTERVAL_MS,
            prompt_grace_ms: PROMPT_GRACE_MS,
            sessions_dir: default_sessions_dir(),
            journal_path: default_journal_path(),
        }
    }

    pub fn shell(&self) -> &str {
        self.shell_override.as_deref().unwrap_or(DEFAULT_SHELL)
    }

    /// Clamp a caller-requested timeout into the operator-configured window.
    pub fn clamp_timeout(&self, requested_ms: Option<u64>) -> Duration {
        let ms = requested_ms
            .unwrap_or(self.default_timeout_ms)
            .clamp(self.min_timeout_ms, self.max_timeout_ms);
        Duration::from_millis(ms)
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn min_timeout_ms() -> u64 {
    MIN_TIMEOUT_MS
}

fn max_timeout_ms() -> u64 {
    MAX_TIMEOUT_MS
}

fn stream_buffer_cap() -> usize {
    STREAM_BUFFER_CAP_BYTES
}

fn tail_window_chars() -> usize {
    TAIL_WINDOW_CHARS
}

fn idle_prompt_interval_ms() -> u64 {
    IDLE_PROMPT_INTERVAL_MS
}

fn prompt_grace_ms() -> u64 {
    PROMPT_GRACE_MS
}

fn state_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("corral")
}

fn default_sessions_dir() -> PathBuf {
    state_dir().join("sessions")
}

fn default_journal_path() -> PathBuf {
    state_dir().join("changes.jsonl")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn timeout_is_clamped_to_operator_window() {
        let config = RuntimeConfig::new("/tmp");
        assert_eq!(
            config.clamp_timeout(Some(1)),
            Duration::from_millis(MIN_TIMEOUT_MS)
        );
        assert_eq!(
            config.clamp_timeout(Some(u64::MAX)),
            Duration::from_millis(MAX_TIMEOUT_MS)
        );
        assert_eq!(config.clamp_timeout(Some(5_000)), Duration::from_millis(5_000));
        assert_eq!(
            config.clamp_timeout(None),
            Duration::from_millis(DEFAULT_TIMEOUT_MS)
        );
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"workspace_root": "/work"}"#).unwrap();
        assert_eq!(config.workspace_root, PathBuf::from("/work"));
        assert_eq!(config.shell(), DEFAULT_SHELL);
        assert_eq!(config.max_stream_buffer_bytes, STREAM_BUFFER_CAP_BYTES);
    }
}
