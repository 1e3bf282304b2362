use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from `config.yaml`.
///
/// Every section has defaults so an empty (or missing) file yields a
/// usable configuration once the API keys are available from the
/// environment.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Completion provider settings.
    #[serde(default)]
    pub model: ModelConfig,
    /// Remote announcement store settings.
    #[serde(default)]
    pub airtable: AirtableConfig,
    /// Tool-loop settings.
    #[serde(default)]
    pub agent: AgentConfig,
    /// Session lifetime and concurrency settings.
    #[serde(default)]
    pub sessions: SessionsConfig,
    /// Document analysis settings.
    #[serde(default)]
    pub analysis: AnalysisConfig,
    /// Directory for downloaded attachments and rendered pages.
    /// Defaults to `<tmp>/herald-downloads`.
    #[serde(default)]
    pub scratch_dir: Option<String>,
    /// HTTP gateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// OpenAI-compatible chat completions provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Chat completions endpoint.
    #[serde(default = "default_model_endpoint")]
    pub endpoint: String,
    /// Model name sent in the request body.  Must accept image input.
    #[serde(default = "default_model_name")]
    pub model: String,
    /// API key (plain text or env-var reference like `$OPENAI_API_KEY`).
    #[serde(default)]
    pub api_key: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: default_model_endpoint(),
            model: default_model_name(),
            api_key: None,
            timeout_secs: default_model_timeout(),
        }
    }
}

fn default_model_endpoint() -> String {
    crate::models::openai::DEFAULT_ENDPOINT.to_string()
}

fn default_model_name() -> String {
    "gpt-4o-mini".to_string()
}

fn default_model_timeout() -> u64 {
    90
}

/// Airtable base holding the announcements table.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AirtableConfig {
    /// REST API root.
    #[serde(default = "default_airtable_endpoint")]
    pub endpoint: String,
    /// Base id (`app…`).
    #[serde(default)]
    pub base_id: String,
    /// Table name.
    #[serde(default = "default_airtable_table")]
    pub table: String,
    /// Personal access token (plain text or `$VAR`).
    #[serde(default)]
    pub api_key: Option<String>,
    /// Timeout for record listing and attachment downloads.
    #[serde(default = "default_airtable_timeout")]
    pub timeout_secs: u64,
}

impl Default for AirtableConfig {
    fn default() -> Self {
        Self {
            endpoint: default_airtable_endpoint(),
            base_id: String::new(),
            table: default_airtable_table(),
            api_key: None,
            timeout_secs: default_airtable_timeout(),
        }
    }
}

fn default_airtable_endpoint() -> String {
    crate::store::airtable::DEFAULT_ENDPOINT.to_string()
}

fn default_airtable_table() -> String {
    "Announcements".to_string()
}

fn default_airtable_timeout() -> u64 {
    30
}

/// Agent loop settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Maximum tool-dispatch rounds per user turn.
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
    /// Replaces the built-in system prompt when set.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            system_prompt: None,
        }
    }
}

fn default_max_tool_iterations() -> usize {
    5
}

/// What a second turn on a busy session does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Wait for the in-flight turn, then run.
    #[default]
    Wait,
    /// Fail immediately with a session conflict.
    Reject,
}

/// Session lifetime settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionsConfig {
    /// Sessions idle longer than this are evicted.  `0` disables eviction.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// How often the janitor looks for idle sessions.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default)]
    pub on_conflict: ConflictPolicy,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            on_conflict: ConflictPolicy::default(),
        }
    }
}

fn default_idle_timeout() -> u64 {
    3600
}

fn default_sweep_interval() -> u64 {
    60
}

/// Document analysis settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Pages analysed when the caller does not say.
    #[serde(default = "default_max_pages")]
    pub default_max_pages: usize,
    /// Hard upper bound on pages per request.
    #[serde(default = "default_max_pages_cap")]
    pub max_pages_cap: usize,
    /// Rasterisation resolution.
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    /// `image_url.detail` sent to the vision model (`low`, `high`, `auto`).
    #[serde(default = "default_image_detail")]
    pub image_detail: String,
    /// `max_tokens` for the analysis completion.
    #[serde(default = "default_analysis_max_tokens")]
    pub max_tokens: u32,
    /// Timeout for each `pdfinfo` / `pdftoppm` invocation.
    #[serde(default = "default_render_timeout")]
    pub render_timeout_secs: u64,
    #[serde(default = "default_pdfinfo_bin")]
    pub pdfinfo_bin: String,
    #[serde(default = "default_pdftoppm_bin")]
    pub pdftoppm_bin: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            default_max_pages: default_max_pages(),
            max_pages_cap: default_max_pages_cap(),
            dpi: default_dpi(),
            image_detail: default_image_detail(),
            max_tokens: default_analysis_max_tokens(),
            render_timeout_secs: default_render_timeout(),
            pdfinfo_bin: default_pdfinfo_bin(),
            pdftoppm_bin: default_pdftoppm_bin(),
        }
    }
}

fn default_max_pages() -> usize {
    5
}

fn default_max_pages_cap() -> usize {
    20
}

fn default_dpi() -> u32 {
    100
}

fn default_image_detail() -> String {
    "low".to_string()
}

fn default_analysis_max_tokens() -> u32 {
    1000
}

fn default_render_timeout() -> u64 {
    60
}

fn default_pdfinfo_bin() -> String {
    "pdfinfo".to_string()
}

fn default_pdftoppm_bin() -> String {
    "pdftoppm".to_string()
}

/// HTTP gateway settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Listen address.
    #[serde(default = "default_gateway_addr")]
    pub addr: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            addr: default_gateway_addr(),
        }
    }
}

fn default_gateway_addr() -> String {
    "0.0.0.0:8000".to_string()
}

impl Config {
    /// Read and parse a YAML configuration file.
    ///
    /// A missing file is not an error: defaults are used and a warning is
    /// logged, so the binary can run from environment variables alone.
    pub async fn load(path: &Path) -> anyhow::Result<Config> {
        let config = match tokio::fs::read_to_string(path).await {
            Ok(contents) => Self::from_yaml(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %path.display(),
                    "config file not found, using defaults"
                );
                let config = Config::default();
                config.validate()?;
                config
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read config file: {}", path.display()));
            }
        };

        tracing::debug!(
            path = %path.display(),
            model = %config.model.model,
            table = %config.airtable.table,
            "configuration loaded"
        );

        Ok(config)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(contents: &str) -> anyhow::Result<Config> {
        // An empty document deserialises to `null`; treat it as `{}`.
        let config: Config = if contents.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(contents).context("failed to parse config YAML")?
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate semantic constraints that serde cannot enforce.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agent.max_tool_iterations == 0 {
            anyhow::bail!("config: agent.max_tool_iterations must be at least 1");
        }
        if self.analysis.max_pages_cap == 0 {
            anyhow::bail!("config: analysis.max_pages_cap must be at least 1");
        }
        if self.analysis.default_max_pages == 0
            || self.analysis.default_max_pages > self.analysis.max_pages_cap
        {
            anyhow::bail!(
                "config: analysis.default_max_pages must be between 1 and max_pages_cap ({})",
                self.analysis.max_pages_cap
            );
        }
        if !matches!(self.analysis.image_detail.as_str(), "low" | "high" | "auto") {
            anyhow::bail!(
                "config: analysis.image_detail must be one of low, high, auto (got '{}')",
                self.analysis.image_detail
            );
        }
        if self.analysis.dpi == 0 {
            anyhow::bail!("config: analysis.dpi must be positive");
        }
        if self.sessions.idle_timeout_secs > 0 && self.sessions.sweep_interval_secs == 0 {
            anyhow::bail!(
                "config: sessions.sweep_interval_secs=0 with eviction enabled (would create busy loop)"
            );
        }
        if self.model.timeout_secs == 0 || self.airtable.timeout_secs == 0 {
            anyhow::bail!("config: timeouts must be positive");
        }
        Ok(())
    }

    /// Resolve the completion provider API key: config value (or `$VAR`
    /// reference), then `OPENAI_API_KEY`.
    pub fn model_api_key(&self) -> Option<String> {
        resolve_secret(self.model.api_key.as_deref(), "OPENAI_API_KEY")
    }

    /// Resolve the Airtable token: config value (or `$VAR` reference),
    /// then `AIRTABLE_API_KEY`.
    pub fn airtable_api_key(&self) -> Option<String> {
        resolve_secret(self.airtable.api_key.as_deref(), "AIRTABLE_API_KEY")
    }

    /// Resolve the Airtable base id, falling back to `AIRTABLE_BASE_ID`.
    pub fn airtable_base_id(&self) -> Option<String> {
        if !self.airtable.base_id.is_empty() {
            return Some(self.airtable.base_id.clone());
        }
        std::env::var("AIRTABLE_BASE_ID").ok().filter(|s| !s.is_empty())
    }

    /// Directory for downloads and rendered pages.
    pub fn scratch_dir(&self) -> PathBuf {
        match self.scratch_dir {
            Some(ref dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => std::env::temp_dir().join("herald-downloads"),
        }
    }
}

/// Resolve a secret: config value → env var → `None`.
///
/// If the config value starts with `$`, it's treated as an env-var reference.
fn resolve_secret(config_value: Option<&str>, fallback_env: &str) -> Option<String> {
    if let Some(v) = config_value {
        if let Some(var) = v.strip_prefix('$') {
            return std::env::var(var).ok().filter(|s| !s.is_empty());
        }
        if !v.is_empty() {
            return Some(v.to_string());
        }
    }
    std::env::var(fallback_env).ok().filter(|s| !s.is_empty())
}
