//! Non-blocking notices for the user.
//!
//! The sync client and listener publish notices on a broadcast channel; a
//! UI renders them however it likes. [`NoticeSink`] writes them as JSON
//! lines to stdout or a file.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, MutationKind, Result};

pub const NOTICE_SCHEMA_VERSION: &str = "tasksync.notice.v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeDestination {
    Stdout,
    File(PathBuf),
}

impl NoticeDestination {
    /// `-` means stdout; blank means no sink.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        raw.and_then(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return None;
            }
            if trimmed == "-" {
                return Some(NoticeDestination::Stdout);
            }
            Some(NoticeDestination::File(PathBuf::from(trimmed)))
        })
    }

    pub fn open(&self) -> Result<NoticeSink> {
        match self {
            NoticeDestination::Stdout => Ok(NoticeSink::stdout()),
            NoticeDestination::File(path) => NoticeSink::file(path),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Connected,
    Disconnected,
    Reconciled,
    EventRejected,
    MutationFailed,
    ReauthRequired,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notice {
    pub schema_version: &'static str,
    pub kind: NoticeKind,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    /// Whether the user can simply try again.
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Notice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            schema_version: NOTICE_SCHEMA_VERSION,
            kind,
            timestamp: Utc::now(),
            message: message.into(),
            retryable: false,
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn mutation_failed(op: MutationKind, id: &str, err: &Error) -> Self {
        Notice::new(
            NoticeKind::MutationFailed,
            format!("Could not {} task: {}", op_verb(op), err.cause()),
        )
        .retryable(err.is_retryable())
        .with_data(serde_json::json!({
            "operation": op,
            "id": id,
        }))
    }

    pub fn reauth_required(reason: impl std::fmt::Display) -> Self {
        Notice::new(
            NoticeKind::ReauthRequired,
            format!("Please sign in again: {reason}"),
        )
    }
}

fn op_verb(op: MutationKind) -> &'static str {
    match op {
        MutationKind::Create => "create",
        MutationKind::Update => "update",
        MutationKind::Delete => "delete",
        MutationKind::ToggleComplete => "toggle",
    }
}

/// JSONL writer for notices.
pub struct NoticeSink {
    writer: Box<dyn Write + Send>,
}

impl NoticeSink {
    pub fn stdout() -> Self {
        Self {
            writer: Box::new(std::io::stdout()),
        }
    }

    /// Append to `path`, creating it if necessary.
    pub fn file(path: &Path) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            writer: Box::new(file),
        })
    }

    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Box::new(writer),
        }
    }

    pub fn emit(&mut self, notice: &Notice) -> Result<()> {
        let serialized = serde_json::to_vec(notice)?;
        self.writer.write_all(&serialized)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_parsing() {
        assert_eq!(NoticeDestination::parse(None), None);
        assert_eq!(NoticeDestination::parse(Some("  ")), None);
        assert_eq!(
            NoticeDestination::parse(Some("-")),
            Some(NoticeDestination::Stdout)
        );
        assert_eq!(
            NoticeDestination::parse(Some("notices.jsonl")),
            Some(NoticeDestination::File(PathBuf::from("notices.jsonl")))
        );
    }

    #[test]
    fn mutation_failure_carries_retry_flag() {
        let err = Error::mutation(
            MutationKind::Delete,
            "01hx",
            Error::Network("offline".to_string()),
        );
        let notice = Notice::mutation_failed(MutationKind::Delete, "01hx", &err);
        assert_eq!(notice.kind, NoticeKind::MutationFailed);
        assert!(notice.retryable);
        assert_eq!(notice.message, "Could not delete task: Network error: offline");
    }

    #[test]
    fn file_sink_appends_lines() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("notices.jsonl");
        let mut sink = NoticeSink::file(&path).unwrap();
        sink.emit(&Notice::new(NoticeKind::Connected, "Live updates on"))
            .unwrap();
        sink.emit(&Notice::new(NoticeKind::Disconnected, "Live updates off"))
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["kind"], "connected");
        assert_eq!(lines[1]["schema_version"], NOTICE_SCHEMA_VERSION);
    }
}
