use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

/// One shell-style command to run inside the workspace root.
///
/// `working_dir` is interpreted relative to the workspace root; an absolute
/// value is accepted as long as it resolves back under the root. Created per
/// invocation and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command_text: String,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub shell_override: Option<String>,
    #[serde(default)]
    pub extra_env: HashMap<String, String>,
}

impl CommandRequest {
    pub fn new(command_text: impl Into<String>) -> Self {
        Self {
            command_text: command_text.into(),
            working_dir: None,
            timeout_ms: None,
            shell_override: None,
            extra_env: HashMap::new(),
        }
    }
}

/// Classified pattern indicating a command is blocked on interactive input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    SshHostkey,
    Password,
    SshKeygen,
    Passphrase,
    ConfirmYn,
    ConfirmYesno,
    Prompt,
}

impl PromptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SshHostkey => "ssh_hostkey",
            Self::Password => "password",
            Self::SshKeygen => "ssh_keygen",
            Self::Passphrase => "passphrase",
            Self::ConfirmYn => "confirm_yn",
            Self::ConfirmYesno => "confirm_yesno",
            Self::Prompt => "prompt",
        }
    }
}

/// Exists only when a stall was detected; lives inside the
/// [`ExecutionResult`] and is never persisted beyond it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSignature {
    pub kind: PromptKind,
    pub matched_line: String,
}

/// Terminal outcome of one [`CommandRequest`]. Immutable once finalized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout_text: String,
    pub stderr_text: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub timed_out: bool,
    pub aborted: bool,
    pub interrupted_for_prompt: bool,
    #[serde(default)]
    pub prompt_signature: Option<PromptSignature>,
    pub binary_detected: bool,
    pub bytes_received: u64,
    pub truncated: bool,
}

impl ExecutionResult {
    /// True when the process ran to completion on its own, regardless of
    /// exit code.
    pub fn completed(&self) -> bool {
        !self.timed_out && !self.aborted && !self.interrupted_for_prompt
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn prompt_kind_serializes_snake_case() {
        let json = serde_json::to_string(&PromptKind::SshHostkey).unwrap();
        assert_eq!(json, "\"ssh_hostkey\"");
        assert_eq!(PromptKind::ConfirmYesno.as_str(), "confirm_yesno");
    }

    #[test]
    fn request_defaults_are_empty() {
        let req: CommandRequest = serde_json::from_str(r#"{"command_text":"echo hi"}"#).unwrap();
        assert_eq!(req, CommandRequest::new("echo hi"));
    }
}
