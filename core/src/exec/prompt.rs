//! Detection of commands stalled on interactive input.
//!
//! Only the last non-empty line of the decoded tail window is inspected,
//! against an ordered signature set: the first match wins, so the specific
//! patterns (ssh host keys, passwords) outrank the generic trailing-colon
//! heuristic. These are heuristics, not guarantees.

use once_cell::sync::Lazy;
use regex_lite::Regex;

use corral_protocol::PromptKind;
use corral_protocol::PromptSignature;

static SSH_HOSTKEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)are you sure you want to continue connecting|authenticity of host")
        .expect("invalid hostkey regex")
});

static PASSWORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)password\s*:\s*$").expect("invalid password regex"));

static SSH_KEYGEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)enter (?:the )?file in which to save the key").expect("invalid keygen regex")
});

static PASSPHRASE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)passphrase[^:]*:\s*$").expect("invalid passphrase regex"));

static CONFIRM_YN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\(\s*y\s*/\s*n\s*\)\s*[?:.]?\s*$").expect("invalid y/n regex")
});

static CONFIRM_YESNO_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\(\s*yes\s*/\s*no(?:\s*/[^)]*)?\s*\)\s*[?:.]?\s*$")
        .expect("invalid yes/no regex")
});

static IMPERATIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(enter|input|provide|choose|select|type|press|continue|proceed|confirm|overwrite|replace|allow)\b",
    )
    .expect("invalid imperative regex")
});

/// Classify one tail line as a pending interactive prompt, if it is one.
pub(crate) fn detect_prompt(line: &str) -> Option<PromptSignature> {
    let line = line.trim_end();
    if line.is_empty() {
        return None;
    }

    let kind = if SSH_HOSTKEY_RE.is_match(line) {
        PromptKind::SshHostkey
    } else if PASSWORD_RE.is_match(line) {
        PromptKind::Password
    } else if SSH_KEYGEN_RE.is_match(line) {
        PromptKind::SshKeygen
    } else if PASSPHRASE_RE.is_match(line) {
        PromptKind::Passphrase
    } else if CONFIRM_YN_RE.is_match(line) {
        PromptKind::ConfirmYn
    } else if CONFIRM_YESNO_RE.is_match(line) {
        PromptKind::ConfirmYesno
    } else if ends_like_question(line) && IMPERATIVE_RE.is_match(line) {
        PromptKind::Prompt
    } else {
        return None;
    };

    Some(PromptSignature {
        kind,
        matched_line: line.to_string(),
    })
}

fn ends_like_question(line: &str) -> bool {
    line.ends_with(':') || line.ends_with('?') || line.ends_with('：')
}
