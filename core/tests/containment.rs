#![expect(clippy::unwrap_used)]

use std::path::PathBuf;

use corral_core::CorralErr;
use corral_core::containment::resolve_working_dir;
use corral_core::containment::vet_command_text;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

#[test]
fn every_in_root_token_is_accepted() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let accepted = vet_command_text(root, root, "wc -l notes.txt logs/app.log ./notes.txt").unwrap();
    assert_eq!(
        accepted,
        vec![root.join("notes.txt"), root.join("logs/app.log")]
    );
}

#[test]
fn one_outside_token_fails_the_whole_command() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let err = vet_command_text(root, root, "cp notes.txt /etc/shadow").unwrap_err();
    let CorralErr::PolicyViolation { violations } = err else {
        panic!("expected a policy violation");
    };
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].token, "/etc/shadow");
    assert_eq!(violations[0].resolved, PathBuf::from("/etc/shadow"));
}

#[test]
fn failure_message_enumerates_every_offending_token() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let err = vet_command_text(root, root, "cat /etc/passwd ../above.txt").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("/etc/passwd"));
    assert!(message.contains("../above.txt"));
}

#[test]
fn parent_escapes_via_dot_dot_are_resolved_before_checking() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let err = vet_command_text(root, &root.join("sub"), "cat ../../outside.txt").unwrap_err();
    let CorralErr::PolicyViolation { violations } = err else {
        panic!("expected a policy violation");
    };
    assert_eq!(violations[0].resolved, root.parent().unwrap().join("outside.txt"));
}

#[test]
fn working_dir_hints_outside_root_fall_back_to_root() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    assert_eq!(
        resolve_working_dir(root, Some(std::path::Path::new("../../etc"))),
        root.to_path_buf()
    );
    assert_eq!(
        resolve_working_dir(root, Some(std::path::Path::new("nested/dir"))),
        root.join("nested/dir")
    );
}
