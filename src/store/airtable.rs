//! Airtable REST client for the announcements table.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{parse_sent_time, Announcement, Attachment, Download, RecordSource};
use crate::error::AgentError;

/// Default Airtable REST API root.
pub const DEFAULT_ENDPOINT: &str = "https://api.airtable.com/v0";

/// Guard against a server that keeps returning an offset.
const MAX_PAGES: usize = 1000;

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    records: Vec<RawRecord>,
    #[serde(default)]
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    id: String,
    #[serde(default)]
    fields: RawFields,
}

#[derive(Debug, Default, Deserialize)]
struct RawFields {
    #[serde(rename = "Title", default)]
    title: Option<String>,
    #[serde(rename = "Description", default)]
    description: Option<String>,
    #[serde(rename = "SentTime", default)]
    sent_time: Option<String>,
    #[serde(rename = "Attachments", default)]
    attachments: Vec<RawAttachment>,
}

#[derive(Debug, Deserialize)]
struct RawAttachment {
    url: String,
    #[serde(default)]
    filename: Option<String>,
}

impl From<RawRecord> for Announcement {
    fn from(raw: RawRecord) -> Self {
        let fields = raw.fields;
        Announcement {
            record_id: raw.id,
            title: fields.title.unwrap_or_default(),
            description: fields.description.unwrap_or_default(),
            sent_time: fields.sent_time.as_deref().and_then(parse_sent_time),
            attachments: fields
                .attachments
                .into_iter()
                .map(|a| Attachment {
                    url: a.url,
                    filename: a.filename.unwrap_or_default(),
                })
                .collect(),
        }
    }
}

/// [`RecordSource`] backed by one Airtable table.
pub struct AirtableClient {
    client: Client,
    endpoint: String,
    base_id: String,
    table: String,
    api_key: String,
}

impl AirtableClient {
    pub fn new(
        endpoint: impl Into<String>,
        base_id: impl Into<String>,
        table: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            base_id: base_id.into(),
            table: table.into(),
            api_key: api_key.into(),
        })
    }

    fn table_url(&self) -> String {
        format!("{}/{}/{}", self.endpoint, self.base_id, self.table)
    }

    /// Table URL with the record id appended as a single escaped segment.
    fn record_url(&self, record_id: &str) -> Result<Url, AgentError> {
        let mut url = Url::parse(&self.table_url())
            .map_err(|e| AgentError::Transport(format!("invalid Airtable endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| AgentError::Transport(format!("invalid Airtable endpoint {}", self.endpoint)))?
            .push(record_id);
        Ok(url)
    }
}

/// Airtable record ids are plain alphanumerics (`rec` + 14 chars).
fn is_record_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric())
}

async fn error_for_status(resp: reqwest::Response) -> AgentError {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    AgentError::Transport(format!("Airtable returned {status}: {text}"))
}

#[async_trait]
impl RecordSource for AirtableClient {
    async fn list_all(&self) -> Result<Vec<Announcement>, AgentError> {
        let url = self.table_url();
        let mut out = Vec::new();
        let mut offset: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut req = self.client.get(&url).bearer_auth(&self.api_key);
            if let Some(ref o) = offset {
                req = req.query(&[("offset", o.as_str())]);
            }
            let resp = req.send().await?;
            if !resp.status().is_success() {
                return Err(error_for_status(resp).await);
            }
            let page: ListResponse = resp.json().await?;
            out.extend(page.records.into_iter().map(Announcement::from));

            match page.offset {
                Some(next) if !next.is_empty() => offset = Some(next),
                _ => {
                    debug!(records = out.len(), table = %self.table, "airtable records listed");
                    return Ok(out);
                }
            }
        }

        warn!(table = %self.table, "airtable pagination did not terminate");
        Err(AgentError::Transport(format!(
            "Airtable pagination exceeded {MAX_PAGES} pages"
        )))
    }

    async fn get(&self, record_id: &str) -> Result<Option<Announcement>, AgentError> {
        if !is_record_id(record_id) {
            warn!(record_id, "rejecting malformed record id");
            return Ok(None);
        }
        let url = self.record_url(record_id)?;
        let resp = self.client.get(url).bearer_auth(&self.api_key).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(error_for_status(resp).await);
        }
        let raw: RawRecord = resp.json().await?;
        Ok(Some(raw.into()))
    }

    async fn download(&self, url: &str) -> Result<Download, AgentError> {
        // Attachment URLs are pre-signed; no bearer token.
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if status.is_client_error() {
            // Signed links expire; the model can report that to the user.
            let text = resp.text().await.unwrap_or_default();
            return Err(AgentError::NotFound(format!(
                "attachment download returned {status}: {text}"
            )));
        }
        if !status.is_success() {
            return Err(error_for_status(resp).await);
        }
        let header = |name: reqwest::header::HeaderName| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        let content_type = header(reqwest::header::CONTENT_TYPE);
        let content_disposition = header(reqwest::header::CONTENT_DISPOSITION);
        let bytes = resp.bytes().await?.to_vec();
        Ok(Download {
            bytes,
            content_type,
            content_disposition,
        })
    }
}
