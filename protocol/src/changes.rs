use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use crate::exec::ExecutionResult;

/// Existence plus content of one path at a single point in time. `content`
/// is `None` when the path is absent or its bytes are not valid UTF-8.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    pub exists: bool,
    #[serde(default)]
    pub content: Option<String>,
}

/// One mutated path produced by one command; appended to the change journal
/// and never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub rel_path: String,
    pub absolute_path: PathBuf,
    pub before: FileState,
    pub after: FileState,
    pub patch_text: String,
    pub tool: String,
    pub mode: String,
}

/// Which diffing strategy produced a set of changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStrategy {
    VersionControl,
    ContentSnapshot,
}

/// How the confirmation workflow concluded for one guarded command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConfirmationOutcome {
    /// Policy did not require confirmation; any detected changes were
    /// journaled unconditionally.
    NotRequired,
    Confirmed {
        #[serde(default)]
        remark: Option<String>,
    },
    /// Declined with a preview; every affected path was rolled back.
    Canceled { request_id: String },
    /// Approved without a preview (neither strategy was usable).
    BlindConfirmed {
        #[serde(default)]
        remark: Option<String>,
    },
    /// Declined without a preview; nothing was known to roll back.
    BlindCanceled { request_id: String },
}

/// Result of running one command through the change-tracking workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardedOutcome {
    pub result: ExecutionResult,
    pub confirmation: ConfirmationOutcome,
    #[serde(default)]
    pub strategy: Option<ChangeStrategy>,
    #[serde(default)]
    pub diff: Option<String>,
    #[serde(default)]
    pub changes: Vec<ChangeEntry>,
}
