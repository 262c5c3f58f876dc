//! Lightweight lexical analysis of raw command text.
//!
//! This is not a shell parser. Tokens are split with shell-style quoting
//! rules, classified by position, and screened for path-likeness with an
//! explicit rule table. The classifiers are heuristics: a path smuggled
//! through an unrecognized construct will not be caught here.

use once_cell::sync::Lazy;
use regex_lite::Regex;

/// One raw token plus whether it sits in command position (the command name
/// itself, or a token preceded only by `sudo`/`env`/`VAR=value` prefixes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommandToken {
    pub text: String,
    pub command_position: bool,
}

static ASSIGNMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=").expect("invalid assignment regex"));

static REDIRECTION_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]*[<>]+&?").expect("invalid redirection regex"));

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://").expect("invalid url regex"));

static DOT_EXTENSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_+.-]*\.[A-Za-z0-9]{1,8}$")
        .expect("invalid extension regex")
});

/// Split command text with shell quoting rules, falling back to plain
/// whitespace splitting when the text is not shell-clean (unbalanced
/// quotes and similar).
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    shlex::split(text)
        .unwrap_or_else(|| text.split_whitespace().map(ToString::to_string).collect())
}

/// Tag each token with its command-position classification.
pub(crate) fn classify(tokens: Vec<String>) -> Vec<CommandToken> {
    let mut classified = Vec::with_capacity(tokens.len());
    let mut in_command_prefix = true;
    for text in tokens {
        let command_position = in_command_prefix;
        if in_command_prefix && !is_command_prefix(&text) {
            in_command_prefix = false;
        }
        classified.push(CommandToken {
            text,
            command_position,
        });
    }
    classified
}

fn is_command_prefix(token: &str) -> bool {
    token == "sudo" || token == "env" || is_assignment(token)
}

pub(crate) fn is_assignment(token: &str) -> bool {
    ASSIGNMENT_RE.is_match(token)
}

/// Shed control operators glued onto a token (`victim.txt;`, `&&`) so the
/// operand itself is screened.
pub(crate) fn trim_separators(token: &str) -> &str {
    token.trim_matches(|c| matches!(c, ';' | '&' | '|'))
}

/// Strip a leading redirection marker (`<`, `>`, `>>`, `2>`, `2>&1`, ...)
/// so the operand behind it is screened as a path candidate.
pub(crate) fn strip_redirection_prefix(token: &str) -> &str {
    match REDIRECTION_PREFIX_RE.find(token) {
        Some(found) => &token[found.end()..],
        None => token,
    }
}

/// The path candidate hiding in a token: the value side of `VAR=value`
/// forms (also `--flag=value`), otherwise the token itself.
pub(crate) fn path_candidate(token: &str) -> &str {
    match token.split_once('=') {
        Some((_, value)) => value,
        None => token,
    }
}

/// Screen a candidate for path shape. URLs are explicitly excluded; bare
/// `.` and `..` are not treated as paths.
pub(crate) fn looks_like_path(candidate: &str) -> bool {
    if candidate.is_empty() || URL_RE.is_match(candidate) {
        return false;
    }
    if candidate.starts_with('/') {
        return true;
    }
    if candidate == "~" || candidate.starts_with("~/") {
        return true;
    }
    if candidate.starts_with("./") || candidate.starts_with("../") {
        return true;
    }
    if candidate.contains('/') {
        return true;
    }
    DOT_EXTENSION_RE.is_match(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn positions(text: &str) -> Vec<(String, bool)> {
        classify(tokenize(text))
            .into_iter()
            .map(|t| (t.text, t.command_position))
            .collect()
    }

    #[test]
    fn quoting_is_respected() {
        assert_eq!(
            tokenize(r#"echo "hello world" 'a b'"#),
            vec!["echo", "hello world", "a b"]
        );
    }

    #[test]
    fn unbalanced_quotes_fall_back_to_whitespace() {
        assert_eq!(tokenize("echo \"oops"), vec!["echo", "\"oops"]);
    }

    #[test]
    fn command_position_skips_sudo_env_and_assignments() {
        assert_eq!(
            positions("sudo env FOO=1 ls -la"),
            vec![
                ("sudo".to_string(), true),
                ("env".to_string(), true),
                ("FOO=1".to_string(), true),
                ("ls".to_string(), true),
                ("-la".to_string(), false),
            ]
        );
    }

    #[test]
    fn glued_separators_are_trimmed() {
        assert_eq!(trim_separators("victim.txt;"), "victim.txt");
        assert_eq!(trim_separators("&&"), "");
        assert_eq!(trim_separators("|tee"), "tee");
        assert_eq!(trim_separators("2>&1"), "2>&1");
    }

    #[test]
    fn redirection_prefixes_are_stripped() {
        assert_eq!(strip_redirection_prefix(">out.txt"), "out.txt");
        assert_eq!(strip_redirection_prefix(">>log"), "log");
        assert_eq!(strip_redirection_prefix("2>err.txt"), "err.txt");
        assert_eq!(strip_redirection_prefix("2>&1"), "1");
        assert_eq!(strip_redirection_prefix("plain"), "plain");
    }

    #[test]
    fn path_candidates_split_on_equals() {
        assert_eq!(path_candidate("OUTPUT=/tmp/x"), "/tmp/x");
        assert_eq!(path_candidate("--config=conf/app.toml"), "conf/app.toml");
        assert_eq!(path_candidate("plain.txt"), "plain.txt");
    }

    #[test]
    fn path_likeness_rules() {
        assert!(looks_like_path("/etc/passwd"));
        assert!(looks_like_path("~/notes.md"));
        assert!(looks_like_path("./a"));
        assert!(looks_like_path("../a"));
        assert!(looks_like_path("sub/dir"));
        assert!(looks_like_path("report.txt"));
        assert!(!looks_like_path("https://example.com/x"));
        assert!(!looks_like_path("ls"));
        assert!(!looks_like_path("-rf"));
        assert!(!looks_like_path("."));
        assert!(!looks_like_path(".."));
    }
}
