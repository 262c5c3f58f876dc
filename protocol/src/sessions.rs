use std::path::PathBuf;
use std::time::SystemTime;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Lifecycle of a named session's underlying process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionState {
    Running,
    Exited {
        exit_code: Option<i32>,
        signal: Option<i32>,
        finished_at_ms: Option<u128>,
    },
    Failed {
        message: String,
        finished_at_ms: Option<u128>,
    },
}

impl SessionState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Snapshot of one tracked session as reported by `list_sessions`.
///
/// The three artifact paths are the only state shared across supervising
/// process restarts; readers must tolerate eventually-consistent tails
/// relative to the writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub name: String,
    pub command: String,
    pub working_dir: PathBuf,
    #[serde(default)]
    pub window_label: Option<String>,
    pub pid: Option<u32>,
    pub state: SessionState,
    pub started_at_ms: Option<u128>,
    pub output_path: PathBuf,
    pub control_path: PathBuf,
    pub status_path: PathBuf,
}

/// One append-only record in a session's control artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: ControlPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlPayload {
    Input { data: String, newline: bool },
    Signal { signal: String },
    Kill,
    Cleanup { reason: String },
}

pub fn system_time_to_unix_millis(time: SystemTime) -> Option<u128> {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .ok()
        .map(|dur| dur.as_millis())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn system_time_converts_to_millis() {
        let ts = SystemTime::UNIX_EPOCH + Duration::from_millis(1234);
        assert_eq!(system_time_to_unix_millis(ts), Some(1234));
    }

    #[test]
    fn state_serializes_with_tag() {
        let value = serde_json::to_value(&SessionState::Exited {
            exit_code: Some(0),
            signal: None,
            finished_at_ms: Some(42_000),
        })
        .unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "status": "exited",
                "exit_code": 0,
                "signal": null,
                "finished_at_ms": 42_000,
            })
        );
    }

    #[test]
    fn control_record_flattens_payload() {
        let record = ControlRecord {
            at: DateTime::<Utc>::UNIX_EPOCH,
            payload: ControlPayload::Signal {
                signal: "TERM".to_string(),
            },
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["kind"], "signal");
        assert_eq!(value["signal"], "TERM");
    }
}
