//! Content-snapshot change strategy.
//!
//! Usable whenever containment produced a non-empty resolved-path set:
//! every non-directory path is snapshotted (existence + exact bytes)
//! before and after the run, and a declined confirmation restores the
//! pre-run bytes, including deleting paths that did not exist before.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use corral_protocol::ChangeEntry;
use corral_protocol::FileState;

use super::diff;

/// Existence + content of each resolved path at one point in time.
/// `None` means the path was absent (or a directory, which this strategy
/// does not track).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PathSnapshot {
    states: BTreeMap<PathBuf, Option<Vec<u8>>>,
}

pub(crate) async fn capture(paths: &[PathBuf]) -> PathSnapshot {
    let mut states = BTreeMap::new();
    for path in paths {
        let state = if path.is_dir() {
            None
        } else {
            tokio::fs::read(path).await.ok()
        };
        states.insert(path.clone(), state);
    }
    PathSnapshot { states }
}

/// Paths whose existence or content differs between the two snapshots.
pub(crate) fn changed_paths(before: &PathSnapshot, after: &PathSnapshot) -> Vec<PathBuf> {
    before
        .states
        .iter()
        .filter(|(path, state)| after.states.get(*path).is_some_and(|now| now != *state))
        .map(|(path, _)| path.clone())
        .collect()
}

/// Build one `ChangeEntry` per differing path.
pub(crate) fn to_entries(
    before: &PathSnapshot,
    after: &PathSnapshot,
    root: &Path,
    tool: &str,
    mode: &str,
) -> Vec<ChangeEntry> {
    changed_paths(before, after)
        .into_iter()
        .map(|path| {
            let before_bytes = before.states.get(&path).and_then(Option::as_deref);
            let after_bytes = after.states.get(&path).and_then(Option::as_deref);
            let rel_path = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .display()
                .to_string();
            ChangeEntry {
                rel_path: rel_path.clone(),
                absolute_path: path,
                before: file_state(before_bytes),
                after: file_state(after_bytes),
                patch_text: diff::unified_patch(&rel_path, before_bytes, after_bytes),
                tool: tool.to_string(),
                mode: mode.to_string(),
            }
        })
        .collect()
}

/// Restore the listed paths to their pre-run snapshot state. Best-effort
/// per path: an individual failure is logged and must not prevent
/// attempting the remaining paths.
pub(crate) async fn restore(before: &PathSnapshot, paths: &[PathBuf]) {
    for path in paths {
        match before.states.get(path) {
            Some(Some(bytes)) => {
                if let Some(parent) = path.parent()
                    && let Err(err) = tokio::fs::create_dir_all(parent).await
                {
                    tracing::warn!(path = %path.display(), error = %err, "rollback mkdir failed");
                    continue;
                }
                if let Err(err) = tokio::fs::write(path, bytes).await {
                    tracing::warn!(path = %path.display(), error = %err, "rollback restore failed");
                }
            }
            Some(None) => {
                match tokio::fs::remove_file(path).await {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "rollback delete failed");
                    }
                }
            }
            None => {}
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

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn detects_created_modified_and_deleted_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let created = root.join("created.txt");
        let modified = root.join("modified.txt");
        let deleted = root.join("deleted.txt");
        let untouched = root.join("untouched.txt");
        tokio::fs::write(&modified, "old\n").await.unwrap();
        tokio::fs::write(&deleted, "bye\n").await.unwrap();
        tokio::fs::write(&untouched, "same\n").await.unwrap();

        let paths = vec![
            created.clone(),
            modified.clone(),
            deleted.clone(),
            untouched.clone(),
        ];
        let before = capture(&paths).await;

        tokio::fs::write(&created, "new\n").await.unwrap();
        tokio::fs::write(&modified, "new\n").await.unwrap();
        tokio::fs::remove_file(&deleted).await.unwrap();

        let after = capture(&paths).await;
        let changed = changed_paths(&before, &after);
        assert_eq!(changed, vec![created.clone(), deleted.clone(), modified.clone()]);

        let entries = to_entries(&before, &after, root, "shell", "auto");
        assert_eq!(entries.len(), 3);
        let by_rel: Vec<&str> = entries.iter().map(|e| e.rel_path.as_str()).collect();
        assert_eq!(by_rel, vec!["created.txt", "deleted.txt", "modified.txt"]);
        assert!(!entries[0].before.exists);
        assert!(entries[0].after.exists);
        assert!(entries[1].before.exists);
        assert!(!entries[1].after.exists);
    }

    #[tokio::test]
    async fn restore_reverts_to_exact_pre_run_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let created = root.join("created.txt");
        let modified = root.join("modified.txt");
        let deleted = root.join("deleted.txt");
        tokio::fs::write(&modified, b"old bytes").await.unwrap();
        tokio::fs::write(&deleted, b"bring me back").await.unwrap();

        let paths = vec![created.clone(), modified.clone(), deleted.clone()];
        let before = capture(&paths).await;

        tokio::fs::write(&created, "should vanish").await.unwrap();
        tokio::fs::write(&modified, "clobbered").await.unwrap();
        tokio::fs::remove_file(&deleted).await.unwrap();

        let after = capture(&paths).await;
        let changed = changed_paths(&before, &after);
        restore(&before, &changed).await;

        assert!(!created.exists());
        assert_eq!(tokio::fs::read(&modified).await.unwrap(), b"old bytes");
        assert_eq!(tokio::fs::read(&deleted).await.unwrap(), b"bring me back");
    }
}
