//! Unified diff generation with git-style headers.

use sha1::Digest;
use sha1::Sha1;
use similar::TextDiff;

const ZERO_OID: &str = "0000000000000000000000000000000000000000";

/// Compute the Git SHA-1 blob object ID for the given content.
pub(crate) fn git_blob_sha1_hex(data: &[u8]) -> String {
    // Git blob hash is sha1 of: "blob <len>\0<data>"
    let header = format!("blob {}\0", data.len());
    let mut hasher = Sha1::new();
    hasher.update(header.as_bytes());
    hasher.update(data);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(40);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

/// One file's unified diff between two optional byte states. `None` on a
/// side means the file did not exist there (rendered as `/dev/null`).
/// Falls back to a binary header when either present side is not UTF-8.
pub(crate) fn unified_patch(rel_path: &str, before: Option<&[u8]>, after: Option<&[u8]>) -> String {
    if before == after {
        return String::new();
    }

    let mut patch = String::new();
    patch.push_str(&format!("diff --git a/{rel_path} b/{rel_path}\n"));

    let is_add = before.is_none() && after.is_some();
    let is_delete = before.is_some() && after.is_none();
    if is_add {
        patch.push_str("new file mode 100644\n");
    } else if is_delete {
        patch.push_str("deleted file mode 100644\n");
    }

    let before_oid = before.map_or_else(|| ZERO_OID.to_string(), git_blob_sha1_hex);
    let after_oid = after.map_or_else(|| ZERO_OID.to_string(), git_blob_sha1_hex);
    patch.push_str(&format!("index {before_oid}..{after_oid}\n"));

    let old_header = if before.is_some() {
        format!("a/{rel_path}")
    } else {
        "/dev/null".to_string()
    };
    let new_header = if after.is_some() {
        format!("b/{rel_path}")
    } else {
        "/dev/null".to_string()
    };

    let before_text = before.and_then(|bytes| std::str::from_utf8(bytes).ok());
    let after_text = after.and_then(|bytes| std::str::from_utf8(bytes).ok());
    let can_text_diff = match (before_text, after_text, is_add, is_delete) {
        (Some(_), Some(_), _, _) => true,
        (_, Some(_), true, _) => true,
        (Some(_), _, _, true) => true,
        _ => false,
    };

    if can_text_diff {
        let left = before_text.unwrap_or("");
        let right = after_text.unwrap_or("");
        let diff = TextDiff::from_lines(left, right);
        let unified = diff
            .unified_diff()
            .context_radius(3)
            .header(&old_header, &new_header)
            .to_string();
        patch.push_str(&unified);
    } else {
        patch.push_str(&format!("--- {old_header}\n"));
        patch.push_str(&format!("+++ {new_header}\n"));
        patch.push_str("Binary files differ\n");
    }

    if !patch.ends_with('\n') {
        patch.push('\n');
    }
    patch
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn blob_oid_matches_git() {
        // `echo -n 'hi' | git hash-object --stdin`
        assert_eq!(
            git_blob_sha1_hex(b"hi"),
            "32f95c0d1244a78b2be1bab8de17906fabb2c4a8"
        );
        assert_eq!(
            git_blob_sha1_hex(b""),
            "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"
        );
    }

    #[test]
    fn added_file_diffs_from_dev_null() {
        let patch = unified_patch("notes.txt", None, Some(b"hello\n"));
        assert!(patch.starts_with("diff --git a/notes.txt b/notes.txt\n"));
        assert!(patch.contains("new file mode 100644\n"));
        assert!(patch.contains("--- /dev/null\n"));
        assert!(patch.contains("+++ b/notes.txt\n"));
        assert!(patch.contains("+hello\n"));
    }

    #[test]
    fn deleted_file_diffs_to_dev_null() {
        let patch = unified_patch("notes.txt", Some(b"hello\n"), None);
        assert!(patch.contains("deleted file mode 100644\n"));
        assert!(patch.contains("+++ /dev/null\n"));
        assert!(patch.contains("-hello\n"));
    }

    #[test]
    fn identical_content_yields_empty_patch() {
        assert_eq!(unified_patch("a.txt", Some(b"same\n"), Some(b"same\n")), "");
    }

    #[test]
    fn binary_content_gets_a_header_only() {
        let patch = unified_patch("blob.bin", Some(&[0, 159, 146, 150]), Some(&[1, 2, 3]));
        assert!(patch.contains("Binary files differ\n"));
    }
}
