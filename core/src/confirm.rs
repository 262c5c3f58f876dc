//! Collaborator seams for the confirmation workflow.
//!
//! The core never renders a dialog and never caches policy: both concerns
//! live behind these traits and are consulted per decision.

use async_trait::async_trait;

use corral_protocol::ConfirmationDecision;
use corral_protocol::ConfirmationRequest;

/// Presents a pending change set (or a blind request) to an approver and
/// resolves their decision.
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    async fn request(&self, request: ConfirmationRequest) -> ConfirmationDecision;
}

/// Source of the operator's "confirm file changes" flag. Read at decision
/// time on every guarded command, never cached across calls.
pub trait ConfirmationPolicy: Send + Sync {
    fn confirm_file_changes(&self) -> bool;
}
