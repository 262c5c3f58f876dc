//! Path containment against the workspace root.
//!
//! Every command and every path-like token it references must resolve to
//! the root or a strict descendant. Resolution is lexical (`.`/`..`
//! normalization after `~` expansion and working-dir joining) so paths
//! that do not exist yet are still vetted; symlink chasing is out of
//! scope along with the rest of sandboxing.

mod tokens;

use std::collections::HashSet;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use crate::error::CorralErr;
use crate::error::PathViolation;
use crate::error::Result;

pub(crate) use tokens::classify;
pub(crate) use tokens::tokenize;

/// Command-position tokens resolving under these directories are exempt
/// from containment so interpreters and system tools can be named directly.
const SYSTEM_BIN_DIRS: &[&str] = &[
    "/bin",
    "/sbin",
    "/usr/bin",
    "/usr/sbin",
    "/usr/local/bin",
    "/usr/local/sbin",
    "/opt/homebrew/bin",
];

/// Resolve a working-directory hint against the root, falling back to the
/// root itself when the hint escapes it.
pub fn resolve_working_dir(root: &Path, hint: Option<&Path>) -> PathBuf {
    let root = normalize_path(root);
    let Some(hint) = hint else {
        return root;
    };
    let joined = if hint.is_absolute() {
        hint.to_path_buf()
    } else {
        root.join(hint)
    };
    let resolved = normalize_path(&joined);
    if resolved == root || resolved.starts_with(&root) {
        resolved
    } else {
        root
    }
}

/// Vet raw command text against the root.
///
/// On success, returns every accepted in-root absolute path the command
/// references (deduplicated, in first-seen order), which feeds the
/// content-snapshot change strategy. On any violation, fails with a
/// `PolicyViolation` enumerating every offending token and its resolved
/// target.
pub fn vet_command_text(root: &Path, working_dir: &Path, command_text: &str) -> Result<Vec<PathBuf>> {
    let root = normalize_path(root);
    let mut accepted: Vec<PathBuf> = Vec::new();
    let mut accepted_seen: HashSet<PathBuf> = HashSet::new();
    let mut violations: Vec<PathViolation> = Vec::new();
    let mut violation_seen: HashSet<PathViolation> = HashSet::new();

    for token in classify(tokenize(command_text)) {
        let trimmed = tokens::trim_separators(&token.text);
        let stripped = tokens::strip_redirection_prefix(trimmed);
        let candidate = tokens::path_candidate(stripped);
        if !tokens::looks_like_path(candidate) {
            continue;
        }

        let resolved = resolve_candidate(candidate, working_dir);

        if token.command_position && is_system_binary(&resolved) {
            continue;
        }

        if resolved == root || resolved.starts_with(&root) {
            if accepted_seen.insert(resolved.clone()) {
                accepted.push(resolved);
            }
        } else {
            let violation = PathViolation {
                token: token.text.clone(),
                resolved,
            };
            if violation_seen.insert(violation.clone()) {
                violations.push(violation);
            }
        }
    }

    if violations.is_empty() {
        Ok(accepted)
    } else {
        Err(CorralErr::policy_violation(violations))
    }
}

fn resolve_candidate(candidate: &str, working_dir: &Path) -> PathBuf {
    let expanded = expand_tilde(candidate);
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        working_dir.join(expanded)
    };
    normalize_path(&joined)
}

fn expand_tilde(candidate: &str) -> PathBuf {
    if candidate == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = candidate.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(candidate)
}

fn is_system_binary(resolved: &Path) -> bool {
    SYSTEM_BIN_DIRS
        .iter()
        .any(|dir| resolved.starts_with(dir))
}

/// Lexically normalize a path: drop `.` components and resolve `..`
/// against the stack. The result carries no trailing-slash ambiguity.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` at the filesystem root stays at the root.
                if !normalized.pop() && !normalized.has_root() {
                    normalized.push(Component::ParentDir.as_os_str());
                }
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    fn violations(err: CorralErr) -> Vec<PathViolation> {
        match err {
            CorralErr::PolicyViolation { violations } => violations,
            other => panic!("expected PolicyViolation, got {other:?}"),
        }
    }

    #[test]
    fn normalization_strips_dots_and_parents() {
        assert_eq!(
            normalize_path(Path::new("/work/a/./b/../c/")),
            PathBuf::from("/work/a/c")
        );
    }

    #[test]
    fn working_dir_falls_back_to_root_when_escaping() {
        let root = Path::new("/work");
        assert_eq!(
            resolve_working_dir(root, Some(Path::new("sub"))),
            PathBuf::from("/work/sub")
        );
        assert_eq!(
            resolve_working_dir(root, Some(Path::new("../elsewhere"))),
            PathBuf::from("/work")
        );
        assert_eq!(resolve_working_dir(root, None), PathBuf::from("/work"));
    }

    #[test]
    fn in_root_paths_are_accepted_and_returned() {
        let root = Path::new("/work");
        let accepted =
            vet_command_text(root, root, "cat notes.txt sub/more.txt ./notes.txt").unwrap();
        assert_eq!(
            accepted,
            vec![
                PathBuf::from("/work/notes.txt"),
                PathBuf::from("/work/sub/more.txt"),
            ]
        );
    }

    #[test]
    fn commands_without_paths_yield_empty_set() {
        let root = Path::new("/work");
        assert_eq!(vet_command_text(root, root, "echo hi").unwrap(), Vec::<PathBuf>::new());
    }

    #[test]
    fn outside_paths_are_enumerated_once_each() {
        let root = Path::new("/work");
        let err = vet_command_text(
            root,
            root,
            "cat /etc/passwd /etc/passwd ../secret.txt",
        )
        .unwrap_err();
        let violations = violations(err);
        assert_eq!(
            violations,
            vec![
                PathViolation {
                    token: "/etc/passwd".to_string(),
                    resolved: PathBuf::from("/etc/passwd"),
                },
                PathViolation {
                    token: "../secret.txt".to_string(),
                    resolved: PathBuf::from("/secret.txt"),
                },
            ]
        );
    }

    #[test]
    fn system_interpreter_in_command_position_is_exempt() {
        let root = Path::new("/work");
        let accepted = vet_command_text(root, root, "/usr/bin/python3 script.py").unwrap();
        assert_eq!(accepted, vec![PathBuf::from("/work/script.py")]);
    }

    #[test]
    fn system_path_outside_command_position_is_checked() {
        let root = Path::new("/work");
        let err = vet_command_text(root, root, "cat /usr/bin/python3").unwrap_err();
        assert_eq!(violations(err).len(), 1);
    }

    #[test]
    fn redirection_targets_are_vetted() {
        let root = Path::new("/work");
        let err = vet_command_text(root, root, "echo hi >/tmp/leak.txt").unwrap_err();
        assert_eq!(
            violations(err),
            vec![PathViolation {
                token: ">/tmp/leak.txt".to_string(),
                resolved: PathBuf::from("/tmp/leak.txt"),
            }]
        );
    }

    #[test]
    fn assignment_values_are_vetted() {
        let root = Path::new("/work");
        let err = vet_command_text(root, root, "OUT=/var/log/x.log env").unwrap_err();
        assert_eq!(violations(err).len(), 1);
    }

    #[test]
    fn urls_are_not_paths() {
        let root = Path::new("/work");
        assert_eq!(
            vet_command_text(root, root, "curl https://example.com/file.txt").unwrap(),
            Vec::<PathBuf>::new()
        );
    }

    #[test]
    fn tilde_expansion_resolves_against_home() {
        let root = Path::new("/nonexistent-root-for-test");
        if dirs::home_dir().is_none() {
            return;
        }
        let err = vet_command_text(root, root, "cat ~/outside.txt").unwrap_err();
        let violations = violations(err);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].resolved.ends_with("outside.txt"));
    }
}
