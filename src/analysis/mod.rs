//! Document analysis: PDF → page images → vision model.
//!
//! [`DocumentAnalyzer`] owns the pipeline.  Rasterisation sits behind the
//! [`PageRenderer`] trait so tests can substitute a fake; the production
//! renderer is [`poppler::PopplerRenderer`].

pub mod poppler;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::error::AgentError;
use crate::models::{ChatMessage, ImagePayload, ModelProvider};

pub use poppler::PopplerRenderer;

/// Leading bytes of every PDF file.
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Poppler accepts junk before the header within the first kilobyte.
const PDF_HEADER_WINDOW: u64 = 1024;

// ── Types ────────────────────────────────────────────────────

/// What to ask the vision model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    Summarize,
    ExtractActionItems,
    Sentiment,
    Custom,
}

impl AnalysisType {
    pub const ALL: [AnalysisType; 4] = [
        AnalysisType::Summarize,
        AnalysisType::ExtractActionItems,
        AnalysisType::Sentiment,
        AnalysisType::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisType::Summarize => "summarize",
            AnalysisType::ExtractActionItems => "extract_action_items",
            AnalysisType::Sentiment => "sentiment",
            AnalysisType::Custom => "custom",
        }
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown analysis type '{s}'"))
    }
}

/// A single analysis job.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub path: PathBuf,
    pub analysis_type: AnalysisType,
    pub custom_prompt: Option<String>,
    /// `None` means the configured default.
    pub max_pages: Option<usize>,
}

/// One rendered page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-based page number.
    pub page: usize,
    pub png: Vec<u8>,
}

/// Rasterises PDF pages.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Total number of pages in the document.
    async fn page_count(&self, pdf: &Path) -> Result<usize, AgentError>;

    /// Render pages `first..=last` (1-based) as PNG, in page order.
    async fn render(&self, pdf: &Path, first: usize, last: usize)
        -> Result<Vec<PageImage>, AgentError>;
}

/// Tunables for [`DocumentAnalyzer`].
#[derive(Debug, Clone)]
pub struct AnalyzerSettings {
    pub default_max_pages: usize,
    pub max_pages_cap: usize,
    pub image_detail: String,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            default_max_pages: 5,
            max_pages_cap: 20,
            image_detail: "low".into(),
        }
    }
}

impl From<&crate::config::AnalysisConfig> for AnalyzerSettings {
    fn from(cfg: &crate::config::AnalysisConfig) -> Self {
        Self {
            default_max_pages: cfg.default_max_pages,
            max_pages_cap: cfg.max_pages_cap,
            image_detail: cfg.image_detail.clone(),
        }
    }
}

// ── DocumentAnalyzer ─────────────────────────────────────────

pub struct DocumentAnalyzer {
    renderer: Arc<dyn PageRenderer>,
    provider: Arc<dyn ModelProvider>,
    settings: AnalyzerSettings,
}

impl DocumentAnalyzer {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        provider: Arc<dyn ModelProvider>,
        settings: AnalyzerSettings,
    ) -> Self {
        Self {
            renderer,
            provider,
            settings,
        }
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        &self.settings
    }

    /// Render at most `max_pages` leading pages of `pdf`.
    pub async fn render_pages(
        &self,
        pdf: &Path,
        max_pages: usize,
    ) -> Result<Vec<PageImage>, AgentError> {
        check_pdf(pdf).await?;

        let count = self.renderer.page_count(pdf).await?;
        if count == 0 {
            return Err(AgentError::DocumentFormat(format!(
                "{} has no pages",
                pdf.display()
            )));
        }

        let last = count.min(max_pages);
        let pages = self.renderer.render(pdf, 1, last).await?;
        if pages.is_empty() {
            return Err(AgentError::DocumentFormat(format!(
                "no pages could be rendered from {}",
                pdf.display()
            )));
        }
        debug!(
            path = %pdf.display(),
            total = count,
            rendered = pages.len(),
            "pdf pages rendered"
        );
        Ok(pages)
    }

    /// Base64 payloads in page order.
    pub fn encode(&self, images: &[PageImage]) -> Vec<ImagePayload> {
        images
            .iter()
            .map(|img| ImagePayload {
                media_type: "image/png".into(),
                data: base64::engine::general_purpose::STANDARD.encode(&img.png),
                detail: self.settings.image_detail.clone(),
            })
            .collect()
    }

    /// The instruction sent alongside the page images.
    ///
    /// A non-empty `custom_prompt` wins for every analysis type; `custom`
    /// without one is rejected.
    pub fn directive(
        analysis_type: AnalysisType,
        custom_prompt: Option<&str>,
    ) -> Result<String, AgentError> {
        if let Some(prompt) = custom_prompt.map(str::trim).filter(|p| !p.is_empty()) {
            return Ok(prompt.to_string());
        }
        let text = match analysis_type {
            AnalysisType::Summarize => {
                "Summarize the content of this document based on the provided pages. \
                 Provide a concise overview."
            }
            AnalysisType::ExtractActionItems => {
                "Extract all action items mentioned in this document based on the provided \
                 pages. List them as numbered items, each with its responsible person or team \
                 and deadline where stated. If there are none, state that clearly."
            }
            AnalysisType::Sentiment => {
                "Analyze the overall sentiment of this document based on the provided pages. \
                 Label it positive, negative, neutral or mixed, then explain briefly."
            }
            AnalysisType::Custom => {
                return Err(AgentError::InvalidRequest(
                    "analysis_type 'custom' requires a custom_prompt".into(),
                ));
            }
        };
        Ok(text.to_string())
    }

    /// Run the whole pipeline and return the model's text verbatim.
    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<String, AgentError> {
        let directive = Self::directive(request.analysis_type, request.custom_prompt.as_deref())?;

        let max_pages = request.max_pages.unwrap_or(self.settings.default_max_pages);
        if max_pages == 0 || max_pages > self.settings.max_pages_cap {
            return Err(AgentError::InvalidRequest(format!(
                "max_pages must be between 1 and {}",
                self.settings.max_pages_cap
            )));
        }

        let pages = self.render_pages(&request.path, max_pages).await?;
        let payloads = self.encode(&pages);

        info!(
            path = %request.path.display(),
            analysis_type = %request.analysis_type,
            pages = payloads.len(),
            "sending document to vision model"
        );

        let message = ChatMessage::with_images(directive, payloads);
        self.provider
            .send_chat(&[message])
            .await
            .map_err(|e| AgentError::AnalysisProvider(e.to_string()))
    }
}

/// The file must exist and carry the PDF header within its first kilobyte.
async fn check_pdf(path: &Path) -> Result<(), AgentError> {
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        AgentError::DocumentFormat(format!("cannot open {}: {e}", path.display()))
    })?;
    let mut head = Vec::new();
    file.take(PDF_HEADER_WINDOW)
        .read_to_end(&mut head)
        .await
        .map_err(|e| AgentError::DocumentFormat(format!("cannot read {}: {e}", path.display())))?;
    if !has_pdf_header(&head) {
        return Err(AgentError::DocumentFormat(format!(
            "{} is not a PDF",
            path.display()
        )));
    }
    Ok(())
}

fn has_pdf_header(head: &[u8]) -> bool {
    head.windows(PDF_MAGIC.len()).any(|w| w == PDF_MAGIC)
}
