//! The snapshot/diff/approve-or-revert workflow gating risky mutations.
//!
//! Entered only when a command is judged possibly mutating: either
//! operator policy always requires confirmation, or the lexical heuristic
//! flags the command text. Two mutually exclusive strategies are tried in
//! order (version control, then content snapshot), with a blind
//! confirmation as the last resort when policy still demands one.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use corral_protocol::ChangeEntry;
use corral_protocol::ChangeStrategy;
use corral_protocol::CommandRequest;
use corral_protocol::ConfirmationOutcome;
use corral_protocol::ConfirmationRequest;
use corral_protocol::ExecutionResult;
use corral_protocol::GuardedOutcome;

use crate::config::RuntimeConfig;
use crate::confirm::ConfirmationGate;
use crate::confirm::ConfirmationPolicy;
use crate::containment;
use crate::error::Result;
use crate::exec::ExecutionEngine;

use super::git;
use super::heuristics;
use super::journal::ChangeJournal;
use super::snapshot;

const TOOL_LABEL: &str = "shell";
const MODE_CONFIRMED: &str = "confirmed";
const MODE_AUTO: &str = "auto";
const CONFIRM_TITLE: &str = "Confirm file changes";

/// Runs commands through containment, execution, and the change-tracking
/// workflow.
pub struct ChangeGuard {
    config: Arc<RuntimeConfig>,
    engine: ExecutionEngine,
    policy: Arc<dyn ConfirmationPolicy>,
    gate: Arc<dyn ConfirmationGate>,
    journal: ChangeJournal,
}

impl ChangeGuard {
    pub fn new(
        config: Arc<RuntimeConfig>,
        policy: Arc<dyn ConfirmationPolicy>,
        gate: Arc<dyn ConfirmationGate>,
    ) -> Self {
        let engine = ExecutionEngine::new(Arc::clone(&config));
        let journal = ChangeJournal::new(config.journal_path.clone());
        Self {
            config,
            engine,
            policy,
            gate,
            journal,
        }
    }

    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    pub fn journal(&self) -> &ChangeJournal {
        &self.journal
    }

    /// Execute one request with change tracking. The only error out of
    /// here is a pre-flight `PolicyViolation`; declined confirmations and
    /// rollbacks are in-band outcomes.
    pub async fn run_guarded(
        &self,
        request: &CommandRequest,
        cancel: CancellationToken,
    ) -> Result<GuardedOutcome> {
        let root = &self.config.workspace_root;
        let cwd = containment::resolve_working_dir(root, request.working_dir.as_deref());
        let resolved = containment::vet_command_text(root, &cwd, &request.command_text)?;

        // Policy is read from the collaborator at decision time, per call.
        let require_confirmation = self.policy.confirm_file_changes();
        let possibly_mutating =
            require_confirmation || heuristics::command_might_mutate(&request.command_text);

        if !possibly_mutating {
            let result = self.engine.run_in(request, &cwd, cancel).await;
            return Ok(plain_outcome(result));
        }

        if let Some(repo) = git::detect_clean_repo(&cwd).await {
            let result = self.engine.run_in(request, &cwd, cancel).await;
            return Ok(self
                .settle_repo(repo, request, &cwd, result, require_confirmation)
                .await);
        }

        if !resolved.is_empty() {
            let before = snapshot::capture(&resolved).await;
            let result = self.engine.run_in(request, &cwd, cancel).await;
            let after = snapshot::capture(&resolved).await;
            return Ok(self
                .settle_snapshot(before, after, request, &cwd, result, require_confirmation)
                .await);
        }

        // Neither strategy usable: the command already ran; ask blind if
        // policy still requires a confirmation.
        let result = self.engine.run_in(request, &cwd, cancel).await;
        if !require_confirmation {
            return Ok(plain_outcome(result));
        }
        let decision = self
            .gate
            .request(ConfirmationRequest {
                title: CONFIRM_TITLE.to_string(),
                message: "No change preview is available for this command; it has already \
                          run and cannot be reviewed or rolled back."
                    .to_string(),
                command_text: request.command_text.clone(),
                working_dir: cwd,
                diff_text: None,
                source_label: TOOL_LABEL.to_string(),
            })
            .await;
        let confirmation = if decision.approved() {
            ConfirmationOutcome::BlindConfirmed {
                remark: decision.remark,
            }
        } else {
            ConfirmationOutcome::BlindCanceled {
                request_id: decision.request_id,
            }
        };
        Ok(GuardedOutcome {
            result,
            confirmation,
            strategy: None,
            diff: None,
            changes: Vec::new(),
        })
    }

    async fn settle_repo(
        &self,
        repo: git::CleanRepo,
        request: &CommandRequest,
        cwd: &Path,
        result: ExecutionResult,
        require_confirmation: bool,
    ) -> GuardedOutcome {
        let diff = match repo.combined_diff().await {
            Ok(diff) => diff,
            Err(err) => {
                tracing::warn!(error = %err, "failed to compute repository diff");
                None
            }
        };
        let Some(diff) = diff else {
            // Nothing changed; nothing to confirm or journal.
            return GuardedOutcome {
                result,
                confirmation: ConfirmationOutcome::NotRequired,
                strategy: Some(ChangeStrategy::VersionControl),
                diff: None,
                changes: Vec::new(),
            };
        };

        if !require_confirmation {
            let entries = self.repo_entries(&repo, MODE_AUTO).await;
            self.journal_entries(&entries).await;
            return GuardedOutcome {
                result,
                confirmation: ConfirmationOutcome::NotRequired,
                strategy: Some(ChangeStrategy::VersionControl),
                diff: Some(diff),
                changes: entries,
            };
        }

        let decision = self
            .gate
            .request(self.diff_request(request, cwd, &diff))
            .await;
        if decision.approved() {
            let entries = self.repo_entries(&repo, MODE_CONFIRMED).await;
            self.journal_entries(&entries).await;
            GuardedOutcome {
                result,
                confirmation: ConfirmationOutcome::Confirmed {
                    remark: decision.remark,
                },
                strategy: Some(ChangeStrategy::VersionControl),
                diff: Some(diff),
                changes: entries,
            }
        } else {
            repo.rollback().await;
            GuardedOutcome {
                result,
                confirmation: ConfirmationOutcome::Canceled {
                    request_id: decision.request_id,
                },
                strategy: Some(ChangeStrategy::VersionControl),
                diff: Some(diff),
                changes: Vec::new(),
            }
        }
    }

    async fn settle_snapshot(
        &self,
        before: snapshot::PathSnapshot,
        after: snapshot::PathSnapshot,
        request: &CommandRequest,
        cwd: &Path,
        result: ExecutionResult,
        require_confirmation: bool,
    ) -> GuardedOutcome {
        let changed = snapshot::changed_paths(&before, &after);
        if changed.is_empty() {
            return GuardedOutcome {
                result,
                confirmation: ConfirmationOutcome::NotRequired,
                strategy: Some(ChangeStrategy::ContentSnapshot),
                diff: None,
                changes: Vec::new(),
            };
        }

        let mode = if require_confirmation {
            MODE_CONFIRMED
        } else {
            MODE_AUTO
        };
        let entries = snapshot::to_entries(
            &before,
            &after,
            &self.config.workspace_root,
            TOOL_LABEL,
            mode,
        );
        let diff: String = entries
            .iter()
            .map(|entry| entry.patch_text.as_str())
            .collect();

        if !require_confirmation {
            self.journal_entries(&entries).await;
            return GuardedOutcome {
                result,
                confirmation: ConfirmationOutcome::NotRequired,
                strategy: Some(ChangeStrategy::ContentSnapshot),
                diff: Some(diff),
                changes: entries,
            };
        }

        let decision = self
            .gate
            .request(self.diff_request(request, cwd, &diff))
            .await;
        if decision.approved() {
            self.journal_entries(&entries).await;
            GuardedOutcome {
                result,
                confirmation: ConfirmationOutcome::Confirmed {
                    remark: decision.remark,
                },
                strategy: Some(ChangeStrategy::ContentSnapshot),
                diff: Some(diff),
                changes: entries,
            }
        } else {
            snapshot::restore(&before, &changed).await;
            GuardedOutcome {
                result,
                confirmation: ConfirmationOutcome::Canceled {
                    request_id: decision.request_id,
                },
                strategy: Some(ChangeStrategy::ContentSnapshot),
                diff: Some(diff),
                changes: Vec::new(),
            }
        }
    }

    fn diff_request(
        &self,
        request: &CommandRequest,
        cwd: &Path,
        diff: &str,
    ) -> ConfirmationRequest {
        ConfirmationRequest {
            title: CONFIRM_TITLE.to_string(),
            message: "Approve to keep the changes below, or cancel to roll every affected \
                      path back to its pre-run state."
                .to_string(),
            command_text: request.command_text.clone(),
            working_dir: cwd.to_path_buf(),
            diff_text: Some(diff.to_string()),
            source_label: TOOL_LABEL.to_string(),
        }
    }

    async fn repo_entries(&self, repo: &git::CleanRepo, mode: &str) -> Vec<ChangeEntry> {
        match repo.change_entries(TOOL_LABEL, mode).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(error = %err, "failed to build repository change entries");
                Vec::new()
            }
        }
    }

    async fn journal_entries(&self, entries: &[ChangeEntry]) {
        if let Err(err) = self.journal.append(entries).await {
            tracing::warn!(error = %err, "failed to append to change journal");
        }
    }
}

fn plain_outcome(result: ExecutionResult) -> GuardedOutcome {
    GuardedOutcome {
        result,
        confirmation: ConfirmationOutcome::NotRequired,
        strategy: None,
        diff: None,
        changes: Vec::new(),
    }
}
