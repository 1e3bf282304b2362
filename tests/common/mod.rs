//! Shared fakes for the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use herald::analysis::{PageImage, PageRenderer};
use herald::config::Config;
use herald::error::AgentError;
use herald::models::{ChatMessage, FunctionCallItem, ModelProvider, ProviderResponse, TokenUsage};
use herald::runtime::{Components, Runtime};
use herald::store::{parse_sent_time, Announcement, Attachment, Download, RecordSource};
use serde_json::Value;

// ── Model provider ───────────────────────────────────────────

/// One scripted model reply.
pub enum Step {
    Reply(String),
    Calls(Vec<FunctionCallItem>),
    Fail(String),
    /// Sleep before replying; lets tests hold a session busy.
    Slow(Duration, String),
}

pub fn reply(text: &str) -> Step {
    Step::Reply(text.to_string())
}

pub fn call(id: &str, name: &str, arguments: &str) -> FunctionCallItem {
    FunctionCallItem {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
    }
}

pub fn calls(items: Vec<FunctionCallItem>) -> Step {
    Step::Calls(items)
}

/// Provider that replays a script and records every request.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Step>>,
    /// Fallback once the script is exhausted.
    repeat: Option<Vec<FunctionCallItem>>,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
    pub tool_defs: Mutex<Vec<Vec<Value>>>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            ..Self::default()
        }
    }

    /// Always answer with the same tool calls.
    pub fn looping(items: Vec<FunctionCallItem>) -> Self {
        Self {
            repeat: Some(items),
            ..Self::default()
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Vec<ChatMessage> {
        self.requests.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn send_chat(&self, messages: &[ChatMessage]) -> Result<String, anyhow::Error> {
        match self.send_chat_with_functions(messages, &[]).await? {
            (ProviderResponse::Final(text), _) => Ok(text),
            (ProviderResponse::ToolCalls(_), _) => anyhow::bail!("unexpected tool calls"),
        }
    }

    async fn send_chat_with_functions(
        &self,
        messages: &[ChatMessage],
        functions: &[Value],
    ) -> Result<(ProviderResponse, Option<TokenUsage>), anyhow::Error> {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.tool_defs.lock().unwrap().push(functions.to_vec());

        let step = self.script.lock().unwrap().pop_front();
        let usage = Some(TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        match step {
            Some(Step::Reply(text)) => Ok((ProviderResponse::Final(text), usage)),
            Some(Step::Calls(items)) => Ok((ProviderResponse::ToolCalls(items), usage)),
            Some(Step::Fail(msg)) => anyhow::bail!("OpenAI API returned 500 Internal Server Error: {msg}"),
            Some(Step::Slow(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok((ProviderResponse::Final(text), usage))
            }
            None => match self.repeat {
                Some(ref items) => Ok((ProviderResponse::ToolCalls(items.clone()), usage)),
                None => Ok((ProviderResponse::Final("done".into()), usage)),
            },
        }
    }
}

// ── Record source ────────────────────────────────────────────

pub fn announcement(id: &str, title: &str, description: &str, sent: Option<&str>) -> Announcement {
    Announcement {
        record_id: id.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        sent_time: sent.and_then(parse_sent_time),
        attachments: Vec::new(),
    }
}

pub fn with_attachment(mut a: Announcement, url: &str, filename: &str) -> Announcement {
    a.attachments.push(Attachment {
        url: url.to_string(),
        filename: filename.to_string(),
    });
    a
}

/// In-memory [`RecordSource`].
#[derive(Default)]
pub struct MemorySource {
    pub records: Vec<Announcement>,
    pub files: HashMap<String, Download>,
    /// When set, every call fails with a transport error.
    pub offline: bool,
    pub downloads: AtomicUsize,
}

impl MemorySource {
    pub fn new(records: Vec<Announcement>) -> Self {
        Self {
            records,
            ..Self::default()
        }
    }

    pub fn with_file(mut self, url: &str, bytes: &[u8], content_type: &str) -> Self {
        self.files.insert(
            url.to_string(),
            Download {
                bytes: bytes.to_vec(),
                content_type: Some(content_type.to_string()),
                content_disposition: None,
            },
        );
        self
    }

    fn check_online(&self) -> Result<(), AgentError> {
        if self.offline {
            return Err(AgentError::Transport("Airtable returned 503: unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn list_all(&self) -> Result<Vec<Announcement>, AgentError> {
        self.check_online()?;
        Ok(self.records.clone())
    }

    async fn get(&self, record_id: &str) -> Result<Option<Announcement>, AgentError> {
        self.check_online()?;
        Ok(self.records.iter().find(|r| r.record_id == record_id).cloned())
    }

    async fn download(&self, url: &str) -> Result<Download, AgentError> {
        self.check_online()?;
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| AgentError::NotFound(format!("attachment download returned 404: {url}")))
    }
}

// ── Renderer ─────────────────────────────────────────────────

/// Renderer that pretends every file has `pages` pages.
pub struct FakeRenderer {
    pub pages: usize,
    pub rendered: Mutex<Vec<(usize, usize)>>,
}

impl FakeRenderer {
    pub fn new(pages: usize) -> Self {
        Self {
            pages,
            rendered: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PageRenderer for FakeRenderer {
    async fn page_count(&self, _pdf: &Path) -> Result<usize, AgentError> {
        Ok(self.pages)
    }

    async fn render(
        &self,
        _pdf: &Path,
        first: usize,
        last: usize,
    ) -> Result<Vec<PageImage>, AgentError> {
        self.rendered.lock().unwrap().push((first, last));
        Ok((first..=last)
            .map(|page| PageImage {
                page,
                png: format!("png-{page}").into_bytes(),
            })
            .collect())
    }
}

// ── Runtime ──────────────────────────────────────────────────

pub fn test_config(scratch: &Path) -> Config {
    let mut cfg = Config::default();
    cfg.scratch_dir = Some(scratch.to_string_lossy().into_owned());
    cfg
}

pub fn runtime(
    cfg: &Config,
    source: Arc<MemorySource>,
    chat: Arc<ScriptedProvider>,
    vision: Arc<ScriptedProvider>,
    renderer: Arc<FakeRenderer>,
) -> Runtime {
    Runtime::with_components(
        cfg,
        Components {
            source,
            chat_provider: chat,
            vision_provider: vision,
            renderer,
        },
    )
    .unwrap()
}

/// Write a minimal file that passes the PDF magic check.
pub fn write_pdf(dir: &Path, name: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"%PDF-1.4\n%fake\n").unwrap();
    path
}
