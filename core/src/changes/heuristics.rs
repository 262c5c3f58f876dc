//! Lexical "possibly mutating" classifier.
//!
//! An explicit, ordered rule table, documented as a heuristic: redirection,
//! a piped `tee`, or a known mutating verb in command position. False
//! negatives are possible: a mutating command using an unrecognized verb
//! and no redirection will not be flagged.

use once_cell::sync::Lazy;
use regex_lite::Regex;

use crate::containment;

/// Verbs that mutate files directly, plus stream editors and interpreters
/// that routinely do.
const MUTATING_VERBS: &[&str] = &[
    "rm", "rmdir", "unlink", "mv", "cp", "touch", "mkdir", "tee", "sed", "awk", "perl", "python",
    "python3", "node", "ruby", "bash", "sh", "zsh",
];

static PIPED_TEE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\|\s*tee\b").expect("invalid tee regex"));

pub fn command_might_mutate(command_text: &str) -> bool {
    if command_text.contains('>') {
        return true;
    }
    if PIPED_TEE_RE.is_match(command_text) {
        return true;
    }
    containment::classify(containment::tokenize(command_text))
        .iter()
        .filter(|token| token.command_position)
        .any(|token| {
            let verb = token.text.rsplit('/').next().unwrap_or(token.text.as_str());
            MUTATING_VERBS.contains(&verb)
        })
}
