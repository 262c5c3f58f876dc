//! Append-only change journal.
//!
//! One JSON line per accepted or unconditionally-tracked mutation; entries
//! are never edited in place.

use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use corral_protocol::ChangeEntry;

#[derive(Serialize)]
struct JournalRecord<'a> {
    at: DateTime<Utc>,
    #[serde(flatten)]
    entry: &'a ChangeEntry,
}

#[derive(Debug, Clone)]
pub struct ChangeJournal {
    path: PathBuf,
}

impl ChangeJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record per entry. The journal file and its parent
    /// directory are created on first use.
    pub async fn append(&self, entries: &[ChangeEntry]) -> std::io::Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .await?;
        let at = Utc::now();
        for entry in entries {
            let record = JournalRecord { at, entry };
            let mut line = serde_json::to_string(&record).map_err(std::io::Error::other)?;
            line.push('\n');
            file.write_all(line.as_bytes()).await?;
        }
        file.flush().await
    }
}
