use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// What the approver sees before deciding. `diff_text` is `None` on the
/// blind path, in which case `message` says so explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub title: String,
    pub message: String,
    pub command_text: String,
    pub working_dir: PathBuf,
    #[serde(default)]
    pub diff_text: Option<String>,
    /// Label for whatever surface produced this request ("shell", a tool
    /// name, ...), so the collaborator can attribute it.
    pub source_label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Ok,
    Canceled,
}

/// Transient decision; not persisted beyond the journal entry it authorizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationDecision {
    pub status: ConfirmationStatus,
    pub request_id: String,
    #[serde(default)]
    pub remark: Option<String>,
}

impl ConfirmationDecision {
    pub fn ok() -> Self {
        Self {
            status: ConfirmationStatus::Ok,
            request_id: Uuid::new_v4().to_string(),
            remark: None,
        }
    }

    pub fn canceled() -> Self {
        Self {
            status: ConfirmationStatus::Canceled,
            request_id: Uuid::new_v4().to_string(),
            remark: None,
        }
    }

    pub fn approved(&self) -> bool {
        self.status == ConfirmationStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ConfirmationStatus::Canceled).unwrap(),
            "\"canceled\""
        );
    }

    #[test]
    fn decisions_carry_fresh_request_ids() {
        let a = ConfirmationDecision::ok();
        let b = ConfirmationDecision::ok();
        assert!(a.approved());
        assert_ne!(a.request_id, b.request_id);
    }
}
