use std::path::PathBuf;

use thiserror::Error;

/// One command token that resolved outside the workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathViolation {
    /// The raw token as it appeared in the command text.
    pub token: String,
    /// Where the token resolved to after expansion and normalization.
    pub resolved: PathBuf,
}

/// Error taxonomy for the execution core.
///
/// Only pre-flight containment violations and malformed session inputs are
/// surfaced as errors. Anything downstream of a successful spawn (spawn
/// failure included) is reported in-band through `ExecutionResult` so
/// callers always receive a structured result past validation.
#[derive(Debug, Error)]
pub enum CorralErr {
    #[error("{}", format_violations(.violations))]
    PolicyViolation { violations: Vec<PathViolation> },

    #[error(
        "invalid session name {name:?}: names must start with an alphanumeric \
         character and contain only [A-Za-z0-9_.-], at most 64 characters"
    )]
    InvalidSessionName { name: String },

    #[error("unknown session: {name}")]
    UnknownSession { name: String },

    #[error("unknown signal: {name}")]
    UnknownSignal { name: String },

    #[error("failed to start session {name:?}: {cause}")]
    CreateSession { name: String, cause: String },

    #[error("failed to write to stdin of session {name:?}")]
    SessionStdin { name: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CorralErr>;

impl CorralErr {
    pub fn policy_violation(violations: Vec<PathViolation>) -> Self {
        Self::PolicyViolation { violations }
    }
}

fn format_violations(violations: &[PathViolation]) -> String {
    let mut msg = String::from("command references paths outside the workspace root:");
    for violation in violations {
        msg.push_str(&format!(
            "\n  {} -> {}",
            violation.token,
            violation.resolved.display()
        ));
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn policy_violation_enumerates_every_offender() {
        let err = CorralErr::policy_violation(vec![
            PathViolation {
                token: "/etc/passwd".to_string(),
                resolved: PathBuf::from("/etc/passwd"),
            },
            PathViolation {
                token: "../outside.txt".to_string(),
                resolved: PathBuf::from("/outside.txt"),
            },
        ]);
        let text = err.to_string();
        assert_eq!(
            text,
            "command references paths outside the workspace root:\n  \
             /etc/passwd -> /etc/passwd\n  ../outside.txt -> /outside.txt"
        );
    }
}
