//! Version-control change strategy.
//!
//! Usable only when the working directory sits in a recognized repository
//! with no pending changes before the run: afterwards, every difference is
//! attributable to the command, the tracked diff comes straight from git,
//! and rollback is a checkout plus clean.

use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use tokio::process::Command;

use corral_protocol::ChangeEntry;
use corral_protocol::FileState;

use super::diff;

/// Pseudo-diff synthesis for newly untracked files is capped so one stray
/// `tar -x` cannot flood the confirmation dialog.
const MAX_UNTRACKED_PSEUDO_DIFFS: usize = 5;
const UNTRACKED_PSEUDO_DIFF_BYTE_CEILING: usize = 16 * 1024;

/// A repository that was clean before the command ran.
#[derive(Debug, Clone)]
pub(crate) struct CleanRepo {
    root: PathBuf,
}

/// Recognize `cwd` as part of a clean repository, if it is one.
pub(crate) async fn detect_clean_repo(cwd: &Path) -> Option<CleanRepo> {
    let top = run_git(cwd, &["rev-parse", "--show-toplevel"]).await.ok()?;
    let root = PathBuf::from(top.trim());
    let status = run_git(&root, &["status", "--porcelain"]).await.ok()?;
    if status.trim().is_empty() {
        Some(CleanRepo { root })
    } else {
        None
    }
}

impl CleanRepo {
    /// Repo-relative paths touched since the pre-run clean state, with an
    /// untracked marker. Rename records report the destination path.
    pub(crate) async fn status_paths(&self) -> Result<Vec<(String, bool)>> {
        let status = run_git(&self.root, &["status", "--porcelain"]).await?;
        let mut paths = Vec::new();
        for line in status.lines() {
            if line.len() < 4 {
                continue;
            }
            let (flags, rest) = line.split_at(3);
            let untracked = flags.starts_with("??");
            let path = match rest.split_once(" -> ") {
                Some((_, dest)) => dest,
                None => rest,
            };
            paths.push((unquote_porcelain(path), untracked));
        }
        Ok(paths)
    }

    /// Tracked diff plus synthesized pseudo-diffs for newly untracked
    /// files, combined into one diff text. `None` when nothing changed.
    pub(crate) async fn combined_diff(&self) -> Result<Option<String>> {
        let mut combined = String::new();

        let tracked = run_git(&self.root, &["diff"]).await?;
        combined.push_str(&tracked);
        let staged = run_git(&self.root, &["diff", "--cached"]).await?;
        combined.push_str(&staged);

        let untracked: Vec<String> = self
            .status_paths()
            .await?
            .into_iter()
            .filter(|(_, untracked)| *untracked)
            .map(|(path, _)| path)
            .collect();
        let skipped = untracked.len().saturating_sub(MAX_UNTRACKED_PSEUDO_DIFFS);
        for rel in untracked.iter().take(MAX_UNTRACKED_PSEUDO_DIFFS) {
            let absolute = self.root.join(rel);
            if absolute.is_dir() {
                continue;
            }
            let mut bytes = tokio::fs::read(&absolute)
                .await
                .with_context(|| format!("failed to read untracked file {}", absolute.display()))?;
            bytes.truncate(UNTRACKED_PSEUDO_DIFF_BYTE_CEILING);
            combined.push_str(&diff::unified_patch(rel, None, Some(&bytes)));
        }
        if skipped > 0 {
            combined.push_str(&format!("[{skipped} more untracked files not shown]\n"));
        }

        if combined.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(combined))
        }
    }

    /// One `ChangeEntry` per touched path, before-state read from `HEAD`.
    pub(crate) async fn change_entries(&self, tool: &str, mode: &str) -> Result<Vec<ChangeEntry>> {
        let mut entries = Vec::new();
        for (rel, untracked) in self.status_paths().await? {
            let absolute = self.root.join(&rel);
            if absolute.is_dir() {
                continue;
            }
            let before_bytes = if untracked {
                None
            } else {
                self.head_content(&rel).await
            };
            let after_bytes = tokio::fs::read(&absolute).await.ok();
            if before_bytes == after_bytes {
                continue;
            }
            let patch_text =
                diff::unified_patch(&rel, before_bytes.as_deref(), after_bytes.as_deref());
            entries.push(ChangeEntry {
                rel_path: rel,
                absolute_path: absolute,
                before: file_state(before_bytes.as_deref()),
                after: file_state(after_bytes.as_deref()),
                patch_text,
                tool: tool.to_string(),
                mode: mode.to_string(),
            });
        }
        Ok(entries)
    }

    /// Revert everything back to the pre-run clean state. Best-effort: a
    /// failing step is logged and does not stop the rest.
    pub(crate) async fn rollback(&self) {
        if let Err(err) = run_git(&self.root, &["checkout", "--", "."]).await {
            tracing::warn!(error = %err, "git checkout rollback failed");
        }
        if let Err(err) = run_git(&self.root, &["clean", "-fd"]).await {
            tracing::warn!(error = %err, "git clean rollback failed");
        }
    }

    async fn head_content(&self, rel: &str) -> Option<Vec<u8>> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.root)
            .arg("show")
            .arg(format!("HEAD:{rel}"))
            .output()
            .await
            .ok()?;
        if output.status.success() {
            Some(output.stdout)
        } else {
            None
        }
    }
}

fn file_state(bytes: Option<&[u8]>) -> FileState {
    match bytes {
        Some(bytes) => FileState {
            exists: true,
            content: std::str::from_utf8(bytes).ok().map(ToString::to_string),
        },
        None => FileState {
            exists: false,
            content: None,
        },
    }
}

/// Porcelain quotes paths containing special characters; strip the quotes
/// and leave escapes alone (good enough for display and joining).
fn unquote_porcelain(path: &str) -> String {
    path.trim()
        .trim_matches('"')
        .to_string()
}

async fn run_git(cwd: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(cwd)
        .args(args)
        .output()
        .await
        .context("failed to run git")?;
    if !output.status.success() {
        anyhow::bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
