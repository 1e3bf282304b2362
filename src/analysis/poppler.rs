//! [`PageRenderer`] backed by the poppler command-line tools.
//!
//! `pdfinfo` reports the page count and `pdftoppm -png` rasterises the
//! requested range into a private scratch directory, which is removed once
//! the PNG bytes are read back.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{PageImage, PageRenderer};
use crate::error::AgentError;

pub struct PopplerRenderer {
    pdfinfo_bin: String,
    pdftoppm_bin: String,
    dpi: u32,
    timeout: Duration,
    scratch_dir: PathBuf,
}

impl PopplerRenderer {
    pub fn new(
        pdfinfo_bin: impl Into<String>,
        pdftoppm_bin: impl Into<String>,
        dpi: u32,
        timeout: Duration,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            pdfinfo_bin: pdfinfo_bin.into(),
            pdftoppm_bin: pdftoppm_bin.into(),
            dpi,
            timeout,
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn from_config(cfg: &crate::config::AnalysisConfig, scratch_dir: &Path) -> Self {
        Self::new(
            cfg.pdfinfo_bin.clone(),
            cfg.pdftoppm_bin.clone(),
            cfg.dpi,
            Duration::from_secs(cfg.render_timeout_secs),
            scratch_dir,
        )
    }

    /// Render every page of `pdf` into `out_dir` as
    /// `<stem>_page_<n>.png` and return the written paths in page order.
    pub async fn convert_to_dir(&self, pdf: &Path, out_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
        let count = self.page_count(pdf).await?;
        if count == 0 {
            anyhow::bail!("{} has no pages", pdf.display());
        }
        let pages = self.render(pdf, 1, count).await?;

        tokio::fs::create_dir_all(out_dir).await?;
        let stem = pdf
            .file_stem()
            .map(|s| s.to_string_lossy().replace(' ', "_"))
            .unwrap_or_else(|| "document".to_string());

        let mut written = Vec::with_capacity(pages.len());
        for page in pages {
            let path = out_dir.join(format!("{stem}_page_{}.png", page.page));
            tokio::fs::write(&path, &page.png).await?;
            written.push(path);
        }
        Ok(written)
    }

    /// Run a poppler tool with the configured timeout and return stdout.
    async fn run(&self, bin: &str, args: &[String]) -> Result<Vec<u8>, AgentError> {
        let child = tokio::process::Command::new(bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::DocumentFormat(format!("failed to run {bin}: {e}")))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                return Err(AgentError::DocumentFormat(format!("{bin} failed: {e}")));
            }
            Err(_) => {
                return Err(AgentError::DocumentFormat(format!(
                    "{bin} timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AgentError::DocumentFormat(format!(
                "{bin} exited with {}: {}",
                output.status,
                crate::utils::truncate_str(stderr.trim(), 300)
            )));
        }
        Ok(output.stdout)
    }
}

/// Extract `Pages:` from `pdfinfo` output.
fn parse_page_count(stdout: &str) -> Option<usize> {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|v| v.trim().parse().ok())
}

/// Page number encoded in a `pdftoppm` output name like `page-07.png`.
fn page_number(path: &Path) -> Option<usize> {
    let stem = path.file_stem()?.to_str()?;
    stem.rsplit('-').next()?.parse().ok()
}

#[async_trait]
impl PageRenderer for PopplerRenderer {
    async fn page_count(&self, pdf: &Path) -> Result<usize, AgentError> {
        let stdout = self
            .run(&self.pdfinfo_bin, &[pdf.to_string_lossy().into_owned()])
            .await?;
        parse_page_count(&String::from_utf8_lossy(&stdout)).ok_or_else(|| {
            AgentError::DocumentFormat(format!("could not read page count of {}", pdf.display()))
        })
    }

    async fn render(
        &self,
        pdf: &Path,
        first: usize,
        last: usize,
    ) -> Result<Vec<PageImage>, AgentError> {
        let out_dir = self
            .scratch_dir
            .join(format!("render-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&out_dir).await.map_err(|e| {
            AgentError::DocumentFormat(format!("create {}: {e}", out_dir.display()))
        })?;

        let result = self.render_into(pdf, first, last, &out_dir).await;

        if let Err(e) = tokio::fs::remove_dir_all(&out_dir).await {
            warn!(dir = %out_dir.display(), error = %e, "failed to remove render scratch dir");
        }
        result
    }
}

impl PopplerRenderer {
    async fn render_into(
        &self,
        pdf: &Path,
        first: usize,
        last: usize,
        out_dir: &Path,
    ) -> Result<Vec<PageImage>, AgentError> {
        let prefix = out_dir.join("page");
        let args = vec![
            "-png".to_string(),
            "-r".to_string(),
            self.dpi.to_string(),
            "-f".to_string(),
            first.to_string(),
            "-l".to_string(),
            last.to_string(),
            pdf.to_string_lossy().into_owned(),
            prefix.to_string_lossy().into_owned(),
        ];
        self.run(&self.pdftoppm_bin, &args).await?;

        let io_err = |e: std::io::Error| {
            AgentError::DocumentFormat(format!("read {}: {e}", out_dir.display()))
        };
        let mut numbered = Vec::new();
        let mut entries = tokio::fs::read_dir(out_dir).await.map_err(io_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("png") {
                continue;
            }
            if let Some(n) = page_number(&path) {
                numbered.push((n, path));
            }
        }
        numbered.sort_by_key(|(n, _)| *n);

        let mut pages = Vec::with_capacity(numbered.len());
        for (page, path) in numbered {
            let png = tokio::fs::read(&path).await.map_err(io_err)?;
            pages.push(PageImage { page, png });
        }
        debug!(path = %pdf.display(), first, last, pages = pages.len(), "pdftoppm finished");
        Ok(pages)
    }
}
