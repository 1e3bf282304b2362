//! Component wiring shared by the gateway and the CLI.
//!
//! A [`Runtime`] owns the session manager and the agent and exposes the
//! two operations the outer surfaces need: run a turn, clear a session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{Agent, TurnReport};
use crate::analysis::{AnalyzerSettings, DocumentAnalyzer, PageRenderer, PopplerRenderer};
use crate::config::Config;
use crate::error::AgentError;
use crate::models::{ModelProvider, OpenAIProvider};
use crate::session::SessionManager;
use crate::store::{AirtableClient, AttachmentStore, RecordSource};
use crate::tools::builtins::register_builtins;
use crate::tools::ToolRegistry;

/// A failed turn, with the session it ran against.
#[derive(Debug)]
pub struct TurnFailure {
    /// `None` when no session could be resolved.
    pub session_id: Option<String>,
    pub error: AgentError,
}

impl std::fmt::Display for TurnFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.session_id {
            Some(ref id) => write!(f, "{} (session {id})", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

impl std::error::Error for TurnFailure {}

/// The assembled components a turn needs.
pub struct Components {
    pub source: Arc<dyn RecordSource>,
    pub chat_provider: Arc<dyn ModelProvider>,
    pub vision_provider: Arc<dyn ModelProvider>,
    pub renderer: Arc<dyn PageRenderer>,
}

pub struct Runtime {
    sessions: Arc<SessionManager>,
    agent: Agent,
    started: Instant,
    sweep_interval: Duration,
}

impl Runtime {
    /// Build the production components from configuration.
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let components = build_components(cfg)?;
        Self::with_components(cfg, components)
    }

    /// Build a runtime around explicit components (used by tests).
    pub fn with_components(cfg: &Config, components: Components) -> anyhow::Result<Self> {
        let scratch = cfg.scratch_dir();
        let store = Arc::new(AttachmentStore::new(components.source, scratch));
        let analyzer = Arc::new(DocumentAnalyzer::new(
            components.renderer,
            components.vision_provider,
            AnalyzerSettings::from(&cfg.analysis),
        ));

        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry, store, analyzer)
            .context("failed to register built-in tools")?;

        let mut agent = Agent::new(components.chat_provider, Arc::new(registry))
            .with_max_tool_iterations(cfg.agent.max_tool_iterations);
        if let Some(ref prompt) = cfg.agent.system_prompt {
            agent = agent.with_system_prompt(prompt.clone());
        }

        let idle_timeout = match cfg.sessions.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let sessions = Arc::new(SessionManager::new(cfg.sessions.on_conflict, idle_timeout));

        info!(
            tools = agent.tools().len(),
            max_tool_iterations = cfg.agent.max_tool_iterations,
            on_conflict = ?cfg.sessions.on_conflict,
            "runtime ready"
        );

        Ok(Self {
            sessions,
            agent,
            started: Instant::now(),
            sweep_interval: Duration::from_secs(cfg.sessions.sweep_interval_secs.max(1)),
        })
    }

    /// Run one turn.  An absent or unknown session id starts a new session.
    pub async fn turn(
        &self,
        session_id: Option<&str>,
        message: &str,
    ) -> Result<TurnReport, TurnFailure> {
        let mut guard = self
            .sessions
            .acquire(session_id)
            .await
            .map_err(|error| TurnFailure {
                session_id: session_id.map(String::from),
                error,
            })?;
        let id = guard.id().to_string();

        self.agent
            .run_turn(&mut guard, message)
            .await
            .map_err(|error| {
                warn!(session_id = %id, kind = error.kind(), error = %error, "turn failed");
                TurnFailure {
                    session_id: Some(id),
                    error,
                }
            })
    }

    /// Remove a session; returns whether it existed.
    pub fn clear(&self, session_id: &str) -> bool {
        self.sessions.clear(session_id)
    }

    /// Start the idle-session janitor.
    pub fn spawn_janitor(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        self.sessions.spawn_janitor(self.sweep_interval, cancel)
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.agent.tools().list().into_iter().map(|m| m.name).collect()
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Build the completion providers, Airtable client and renderer.
pub fn build_components(cfg: &Config) -> anyhow::Result<Components> {
    let api_key = cfg
        .model_api_key()
        .context("no model API key: set model.api_key or OPENAI_API_KEY")?;
    let airtable_key = cfg
        .airtable_api_key()
        .context("no Airtable token: set airtable.api_key or AIRTABLE_API_KEY")?;
    let base_id = cfg
        .airtable_base_id()
        .context("no Airtable base: set airtable.base_id or AIRTABLE_BASE_ID")?;

    let chat_provider = OpenAIProvider::with_config(
        api_key.clone(),
        cfg.model.endpoint.clone(),
        cfg.model.model.clone(),
        Duration::from_secs(cfg.model.timeout_secs),
    )
    .context("failed to build chat provider")?;
    let vision_provider = OpenAIProvider::with_config(
        api_key,
        cfg.model.endpoint.clone(),
        cfg.model.model.clone(),
        Duration::from_secs(cfg.model.timeout_secs),
    )
    .context("failed to build vision provider")?
    .with_max_tokens(cfg.analysis.max_tokens);

    let source = AirtableClient::new(
        cfg.airtable.endpoint.clone(),
        base_id,
        cfg.airtable.table.clone(),
        airtable_key,
        Duration::from_secs(cfg.airtable.timeout_secs),
    )
    .context("failed to build Airtable client")?;

    let renderer = PopplerRenderer::from_config(&cfg.analysis, &cfg.scratch_dir());

    Ok(Components {
        source: Arc::new(source),
        chat_provider: Arc::new(chat_provider),
        vision_provider: Arc::new(vision_provider),
        renderer: Arc::new(renderer),
    })
}

/// Build only the document analysis pipeline (for one-shot analysis
/// without Airtable credentials).
pub fn build_analyzer(cfg: &Config) -> anyhow::Result<DocumentAnalyzer> {
    let api_key = cfg
        .model_api_key()
        .context("no model API key: set model.api_key or OPENAI_API_KEY")?;
    let provider = OpenAIProvider::with_config(
        api_key,
        cfg.model.endpoint.clone(),
        cfg.model.model.clone(),
        Duration::from_secs(cfg.model.timeout_secs),
    )?
    .with_max_tokens(cfg.analysis.max_tokens);
    let renderer = PopplerRenderer::from_config(&cfg.analysis, &cfg.scratch_dir());
    Ok(DocumentAnalyzer::new(
        Arc::new(renderer),
        Arc::new(provider),
        AnalyzerSettings::from(&cfg.analysis),
    ))
}
