//! The editor feedback loop: pending entries, the archive of processed
//! entries, and the requests sent back to editors. All of it lives in one
//! JSON document that is read once and written once per cycle.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CuratorError, Result};
use crate::snapshot::write_atomic;

/// A feedback entry exactly as an editor wrote it. Fields are kept loose so a
/// malformed entry can be rejected and archived instead of failing the load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    #[serde(default)]
    pub submitted_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl FeedbackEntry {
    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.submitted_at.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Lowercased action with `remove` folded into `retire`.
    pub fn normalized_action(&self) -> String {
        match self.action.trim().to_lowercase().as_str() {
            "remove" => "retire".to_string(),
            other => other.to_string(),
        }
    }

    /// The explicit target, or for an `add` the identifier or URL it names.
    pub fn target(&self) -> Option<String> {
        let from_payload = |field: &str| {
            self.payload
                .get(field)
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        self.source_id
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| from_payload("source_id"))
            .or_else(|| from_payload("url"))
    }

    pub fn idempotence_key(&self) -> IdempotenceKey {
        let submitted_at = match self.submitted_at() {
            Some(ts) => ts.to_rfc3339(),
            None => self.submitted_at.trim().to_string(),
        };
        IdempotenceKey {
            target: self.target().unwrap_or_else(|| "-".to_string()),
            action: self.normalized_action(),
            submitted_at,
        }
    }
}

/// Target, action and submission time: the identity of an editor's request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdempotenceKey {
    pub target: String,
    pub action: String,
    pub submitted_at: String,
}

impl fmt::Display for IdempotenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.target, self.action, self.submitted_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Applied,
    Rejected,
    Duplicate,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Applied => "applied",
            Outcome::Rejected => "rejected",
            Outcome::Duplicate => "duplicate",
        }
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "applied" => Ok(Outcome::Applied),
            "rejected" => Ok(Outcome::Rejected),
            "duplicate" => Ok(Outcome::Duplicate),
            other => Err(format!("unknown outcome '{}'", other)),
        }
    }
}

/// A processed entry. Archiving is the only way an entry leaves the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedEntry {
    #[serde(flatten)]
    pub entry: FeedbackEntry,
    pub idempotence_key: String,
    pub applied_at: DateTime<Utc>,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    #[default]
    Open,
    Answered,
    Superseded,
}

/// A single question for editors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ask {
    pub key: String,
    pub question: String,
    pub first_asked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub requested_at: DateTime<Utc>,
    pub notes: String,
    #[serde(default)]
    pub status: RequestStatus,
    #[serde(default)]
    pub asks: Vec<Ask>,
}

/// On-disk shape of the feedback file. Pending entries live in `responses`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackDocument {
    #[serde(default)]
    pub last_request_iso: Option<DateTime<Utc>>,
    #[serde(default)]
    pub requests: Vec<FeedbackRequest>,
    #[serde(default)]
    pub responses: Vec<FeedbackEntry>,
    #[serde(default)]
    pub archive: Vec<ArchivedEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FeedbackFile {
    Entries(Vec<FeedbackEntry>),
    Document { responses: Vec<FeedbackEntry> },
}

/// Read a standalone feedback file: either a bare array of entries or an
/// object with a `responses` array.
pub fn load_feedback_file(path: impl AsRef<Path>) -> Result<Vec<FeedbackEntry>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| CuratorError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let file: FeedbackFile = serde_json::from_str(&content).map_err(|source| CuratorError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(match file {
        FeedbackFile::Entries(entries) => entries,
        FeedbackFile::Document { responses } => responses,
    })
}

/// Pending queue plus archive, backed by a feedback document.
#[derive(Debug, Clone, Default)]
pub struct FeedbackQueue {
    path: Option<PathBuf>,
    pub(crate) document: FeedbackDocument,
}

impl FeedbackQueue {
    /// A queue that is never persisted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the document at `path`; a missing file is an empty queue.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let document = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|source| CuratorError::Io {
                path: path.clone(),
                source,
            })?;
            serde_json::from_str(&content).map_err(|source| CuratorError::Json {
                path: path.clone(),
                source,
            })?
        } else {
            FeedbackDocument::default()
        };
        Ok(Self {
            path: Some(path),
            document,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn document(&self) -> &FeedbackDocument {
        &self.document
    }

    /// Append to the pending queue. No reordering, no deduplication.
    pub fn enqueue(&mut self, entry: FeedbackEntry) {
        self.document.responses.push(entry);
    }

    /// All pending entries in queue order. Nothing is removed.
    pub fn drain(&self) -> Vec<FeedbackEntry> {
        self.document.responses.clone()
    }

    pub fn pending_len(&self) -> usize {
        self.document.responses.len()
    }

    pub fn archived(&self) -> &[ArchivedEntry] {
        &self.document.archive
    }

    /// Move an entry to the archive. Entries that arrived from an extra
    /// feedback file are not pending and are only recorded.
    pub fn archive(&mut self, archived: ArchivedEntry) {
        if let Some(pos) = self
            .document
            .responses
            .iter()
            .position(|pending| *pending == archived.entry)
        {
            self.document.responses.remove(pos);
        }
        self.document.archive.push(archived);
    }

    pub fn was_applied(&self, key: &str) -> bool {
        self.document
            .archive
            .iter()
            .any(|archived| archived.idempotence_key == key)
    }

    pub fn requests(&self) -> &[FeedbackRequest] {
        &self.document.requests
    }

    /// Write the whole document back. In-memory queues are left as they are.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut content =
            serde_json::to_string_pretty(&self.document).map_err(|source| CuratorError::Json {
                path: path.clone(),
                source,
            })?;
        content.push('\n');
        write_atomic(path, &content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn entry(source_id: &str, action: &str, submitted_at: &str) -> FeedbackEntry {
        FeedbackEntry {
            submitted_at: submitted_at.to_string(),
            source_id: Some(source_id.to_string()),
            action: action.to_string(),
            payload: json!({}),
            rationale: None,
        }
    }

    fn archived(entry: FeedbackEntry, outcome: Outcome) -> ArchivedEntry {
        ArchivedEntry {
            idempotence_key: entry.idempotence_key().to_string(),
            entry,
            applied_at: Utc::now(),
            outcome,
            reason: None,
        }
    }

    mod key_tests {
        use super::*;

        #[test]
        fn test_key_normalizes_timestamp_and_action() {
            let a = entry("ft_ai", "Remove", "2024-05-10T10:00:00+02:00");
            let b = entry("ft_ai", "retire", "2024-05-10T08:00:00Z");
            assert_eq!(a.idempotence_key(), b.idempotence_key());
            assert_eq!(
                a.idempotence_key().to_string(),
                "ft_ai|retire|2024-05-10T08:00:00+00:00"
            );
        }

        #[test]
        fn test_add_key_falls_back_to_payload() {
            let mut add = entry("", "add", "2024-05-10T08:00:00Z");
            add.source_id = None;
            add.payload = json!({"url": "https://example.com/rss"});
            assert_eq!(add.idempotence_key().target, "https://example.com/rss");

            add.payload = json!({"source_id": "example", "url": "https://example.com/rss"});
            assert_eq!(add.idempotence_key().target, "example");
        }

        #[test]
        fn test_key_keeps_unparseable_timestamp() {
            let bad = entry("x", "boost", "yesterday");
            assert!(bad.submitted_at().is_none());
            assert_eq!(bad.idempotence_key().submitted_at, "yesterday");
        }
    }

    mod queue_tests {
        use super::*;

        #[test]
        fn test_enqueue_keeps_order_and_duplicates() {
            let mut queue = FeedbackQueue::in_memory();
            let first = entry("a", "boost", "2024-05-10T08:00:00Z");
            queue.enqueue(first.clone());
            queue.enqueue(entry("b", "retire", "2024-05-09T08:00:00Z"));
            queue.enqueue(first.clone());

            let pending = queue.drain();
            assert_eq!(pending.len(), 3);
            assert_eq!(pending[0], first);
            assert_eq!(pending[2], first);
            // drain does not remove
            assert_eq!(queue.pending_len(), 3);
        }

        #[test]
        fn test_archive_moves_one_entry() {
            let mut queue = FeedbackQueue::in_memory();
            let first = entry("a", "boost", "2024-05-10T08:00:00Z");
            queue.enqueue(first.clone());
            queue.enqueue(first.clone());

            queue.archive(archived(first.clone(), Outcome::Applied));
            assert_eq!(queue.pending_len(), 1);
            assert_eq!(queue.archived().len(), 1);
            assert!(queue.was_applied(&first.idempotence_key().to_string()));
        }

        #[test]
        fn test_archive_of_external_entry_only_records() {
            let mut queue = FeedbackQueue::in_memory();
            queue.enqueue(entry("a", "boost", "2024-05-10T08:00:00Z"));
            queue.archive(archived(
                entry("b", "retire", "2024-05-10T08:00:00Z"),
                Outcome::Rejected,
            ));
            assert_eq!(queue.pending_len(), 1);
            assert_eq!(queue.archived().len(), 1);
        }
    }

    mod file_tests {
        use super::*;

        #[test]
        fn test_open_missing_file_is_empty() {
            let dir = tempfile::tempdir().unwrap();
            let queue = FeedbackQueue::open(dir.path().join("feedback.json")).unwrap();
            assert_eq!(queue.pending_len(), 0);
            assert!(queue.requests().is_empty());
        }

        #[test]
        fn test_save_and_reopen() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("data").join("feedback.json");

            let mut queue = FeedbackQueue::open(&path).unwrap();
            queue.enqueue(entry("a", "boost", "2024-05-10T08:00:00Z"));
            queue.archive(archived(
                entry("b", "retire", "2024-05-09T08:00:00Z"),
                Outcome::Applied,
            ));
            queue.save().unwrap();

            let reopened = FeedbackQueue::open(&path).unwrap();
            assert_eq!(reopened.document(), queue.document());
        }

        #[test]
        fn test_open_legacy_document() {
            let content = r#"{
                "last_request_iso": "2024-05-01T08:00:00+00:00",
                "requests": [
                    {"requested_at": "2024-05-01T08:00:00+00:00", "notes": "Please review"}
                ],
                "responses": [
                    {
                        "submitted_at": "2024-05-10T08:00:00+00:00",
                        "source_id": "base",
                        "action": "adjust",
                        "payload": {"credibility_score": 0.95}
                    }
                ]
            }"#;
            let mut file = NamedTempFile::new().unwrap();
            file.write_all(content.as_bytes()).unwrap();

            let queue = FeedbackQueue::open(file.path()).unwrap();
            assert_eq!(queue.pending_len(), 1);
            assert_eq!(queue.requests()[0].status, RequestStatus::Open);
            assert!(queue.requests()[0].asks.is_empty());
        }

        #[test]
        fn test_open_invalid_json_fails() {
            let mut file = NamedTempFile::new().unwrap();
            file.write_all(b"{ not json").unwrap();
            assert!(matches!(
                FeedbackQueue::open(file.path()),
                Err(CuratorError::Json { .. })
            ));
        }

        #[test]
        fn test_load_feedback_file_shapes() {
            let mut bare = NamedTempFile::new().unwrap();
            bare.write_all(
                br#"[{"submitted_at": "2024-05-10T08:00:00Z", "source_id": "a", "action": "retire"}]"#,
            )
            .unwrap();
            let entries = load_feedback_file(bare.path()).unwrap();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].payload, Value::Null);

            let mut wrapped = NamedTempFile::new().unwrap();
            wrapped
                .write_all(br#"{"responses": [{"action": "boost", "source_id": "a"}]}"#)
                .unwrap();
            let entries = load_feedback_file(wrapped.path()).unwrap();
            assert_eq!(entries[0].action, "boost");
        }
    }
}
