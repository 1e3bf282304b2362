//! Announcement records and their attachments.
//!
//! [`AttachmentStore`] implements search, lookup and attachment download on
//! top of a [`RecordSource`]; [`airtable::AirtableClient`] is the production
//! source.

pub mod airtable;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::AgentError;

pub use airtable::AirtableClient;

// ── Records ──────────────────────────────────────────────────

/// One file attached to an announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
}

/// An announcement record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Announcement {
    pub record_id: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_time: Option<DateTime<Utc>>,
    pub attachments: Vec<Attachment>,
}

impl Announcement {
    fn matches(&self, needle_lower: &str) -> bool {
        self.title.to_lowercase().contains(needle_lower)
            || self.description.to_lowercase().contains(needle_lower)
    }
}

/// Parse a `SentTime` value: RFC 3339 timestamps or bare `YYYY-MM-DD`
/// dates (taken as midnight UTC).  Anything else is treated as absent.
pub fn parse_sent_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Raw response of an attachment download.
#[derive(Debug, Clone, Default)]
pub struct Download {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

/// A remote tabular store of announcement records.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Every record, in store order.
    async fn list_all(&self) -> Result<Vec<Announcement>, AgentError>;

    /// A single record by id; `Ok(None)` when the id is unknown.
    async fn get(&self, record_id: &str) -> Result<Option<Announcement>, AgentError>;

    /// Fetch the bytes behind an attachment URL.
    async fn download(&self, url: &str) -> Result<Download, AgentError>;
}

// ── Attachment resolution ────────────────────────────────────

/// How `get_attachment` picks its announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentTarget {
    RecordId(String),
    Search(String),
    Latest,
}

impl AttachmentTarget {
    /// Build a target from the optional selectors, in priority order
    /// record id, search term, latest.  A search term of `latest` means
    /// [`AttachmentTarget::Latest`].
    pub fn from_selectors(
        announcement_id: Option<&str>,
        search_term: Option<&str>,
        latest: bool,
    ) -> Result<Self, AgentError> {
        if let Some(id) = non_empty(announcement_id) {
            return Ok(Self::RecordId(id.to_string()));
        }
        if let Some(term) = non_empty(search_term) {
            if term.eq_ignore_ascii_case("latest") {
                return Ok(Self::Latest);
            }
            return Ok(Self::Search(term.to_string()));
        }
        if latest {
            return Ok(Self::Latest);
        }
        Err(AgentError::Validation(
            "one of announcement_id, search_term or latest is required".into(),
        ))
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Result of [`AttachmentStore::fetch_attachment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttachmentOutcome {
    Downloaded {
        local_path: PathBuf,
        filename: String,
        record_id: String,
        title: String,
    },
    NoAttachment {
        record_id: String,
        title: String,
    },
}

/// Query and download facade over a [`RecordSource`].
pub struct AttachmentStore {
    source: Arc<dyn RecordSource>,
    scratch_dir: PathBuf,
}

impl AttachmentStore {
    pub fn new(source: Arc<dyn RecordSource>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub async fn fetch_all(&self) -> Result<Vec<Announcement>, AgentError> {
        self.source.list_all().await
    }

    /// Case-insensitive substring match on title or description.  An
    /// empty query matches everything.
    pub async fn search(&self, query: &str) -> Result<Vec<Announcement>, AgentError> {
        let needle = query.trim().to_lowercase();
        let all = self.source.list_all().await?;
        if needle.is_empty() {
            return Ok(all);
        }
        Ok(all.into_iter().filter(|a| a.matches(&needle)).collect())
    }

    /// First announcement whose title equals `title`, ignoring case.
    pub async fn find_by_title(&self, title: &str) -> Result<Announcement, AgentError> {
        let wanted = title.trim().to_lowercase();
        self.source
            .list_all()
            .await?
            .into_iter()
            .find(|a| a.title.trim().to_lowercase() == wanted)
            .ok_or_else(|| AgentError::NotFound(format!("no announcement titled '{title}'")))
    }

    /// The announcement a target refers to.
    pub async fn resolve(&self, target: &AttachmentTarget) -> Result<Announcement, AgentError> {
        match target {
            AttachmentTarget::RecordId(id) => self
                .source
                .get(id)
                .await?
                .ok_or_else(|| AgentError::NotFound(format!("announcement '{id}' not found"))),
            AttachmentTarget::Search(term) => self
                .search(term)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    AgentError::NotFound(format!("no announcement matches '{term}'"))
                }),
            AttachmentTarget::Latest => {
                let all = self.source.list_all().await?;
                latest(&all)
                    .cloned()
                    .ok_or_else(|| AgentError::NotFound("the announcement store is empty".into()))
            }
        }
    }

    /// Resolve the target and download its first attachment.
    pub async fn fetch_attachment(
        &self,
        target: &AttachmentTarget,
    ) -> Result<AttachmentOutcome, AgentError> {
        let record = self.resolve(target).await?;
        let Some(attachment) = record.attachments.first() else {
            debug!(record_id = %record.record_id, "announcement has no attachment");
            return Ok(AttachmentOutcome::NoAttachment {
                record_id: record.record_id,
                title: record.title,
            });
        };

        let local_path = self.download(attachment).await?;
        let filename = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(AttachmentOutcome::Downloaded {
            local_path,
            filename,
            record_id: record.record_id,
            title: record.title,
        })
    }

    /// Download one attachment into its own `<scratch>/<uuid>/` directory.
    pub async fn download(&self, attachment: &Attachment) -> Result<PathBuf, AgentError> {
        let download = self.source.download(&attachment.url).await?;
        let filename = choose_filename(attachment, &download);

        let dir = self.scratch_dir.join(uuid::Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AgentError::DocumentFormat(format!("create {}: {e}", dir.display())))?;
        let path = dir.join(&filename);
        tokio::fs::write(&path, &download.bytes)
            .await
            .map_err(|e| AgentError::DocumentFormat(format!("write {}: {e}", path.display())))?;

        info!(
            path = %path.display(),
            bytes = download.bytes.len(),
            "attachment downloaded"
        );
        Ok(path)
    }
}

/// Record with the most recent `sent_time`.  Missing dates sort lowest and
/// ties go to the earliest record in store order.
pub fn latest(records: &[Announcement]) -> Option<&Announcement> {
    let mut best: Option<&Announcement> = None;
    for record in records {
        match best {
            Some(b) if record.sent_time <= b.sent_time => {}
            _ => best = Some(record),
        }
    }
    best
}

// ── Filenames ────────────────────────────────────────────────

fn choose_filename(attachment: &Attachment, download: &Download) -> String {
    let raw = Some(attachment.filename.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            download
                .content_disposition
                .as_deref()
                .and_then(disposition_filename)
        })
        .or_else(|| url_filename(&attachment.url))
        .unwrap_or_else(|| "downloaded_attachment".to_string());

    let with_ext = if raw.contains('.') {
        raw
    } else {
        let ext = extension_for(download.content_type.as_deref().unwrap_or(""));
        format!("{raw}{ext}")
    };

    let sanitized = sanitize_filename(&with_ext);
    if sanitized.is_empty() {
        "sanitized_download.pdf".to_string()
    } else {
        sanitized
    }
}

fn disposition_filename(header: &str) -> Option<String> {
    let idx = header.find("filename=")?;
    let rest = &header[idx + "filename=".len()..];
    let value = rest.split(';').next()?.trim().trim_matches(|c| c == '"' || c == '\'');
    Some(value.to_string()).filter(|s| !s.is_empty())
}

fn url_filename(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    Some(last.to_string()).filter(|s| !s.is_empty())
}

fn extension_for(content_type: &str) -> &'static str {
    let ct = content_type.to_lowercase();
    if ct.contains("pdf") {
        ".pdf"
    } else if ct.contains("openxmlformats-officedocument.wordprocessingml.document") {
        ".docx"
    } else if ct.contains("plain") {
        ".txt"
    } else {
        ".pdf"
    }
}

/// Keep alphanumerics and `._-`; leading dots are dropped so the result
/// can never name a parent or hidden path.
pub fn sanitize_filename(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    kept.trim_start_matches('.').to_string()
}
