//! Conversational agent core.
//!
//! One user turn is driven through an explicit state machine:
//!
//! ```text
//! Idle → AwaitingModel → (ToolDispatch → AwaitingModel)* → Responding → Idle
//! ```
//!
//! Each state transition is a call to [`Agent::step`].  History is only
//! ever appended to, and tool-call turns are appended together with all of
//! their results, so a session's history stays fully paired even when a
//! turn is aborted by a transport failure.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::AgentError;
use crate::models::{ChatMessage, ModelProvider, ProviderResponse, TokenUsage};
use crate::session::{validate_pairing, Role, Session, ToolCall, Turn};
use crate::tools::ToolRegistry;

/// System prompt used when the configuration does not supply one.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that can look up \
announcements in Airtable and analyze their PDF attachments. You have tools for these tasks. \
If a tool returns an error, tell the user clearly what went wrong. When the user asks about \
the attachment of an announcement they mentioned, use find_announcement_by_title to confirm \
it, then call get_attachment with the announcement title as search_term, and pass the \
returned local_path to analyze_document. Keep track of context across turns.";

pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 5;

// ---------------------------------------------------------------------------
// Turn report types
// ---------------------------------------------------------------------------

/// Record of a single tool invocation within a turn.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    /// Tool name.
    pub tool: String,
    /// Compact summary of the arguments (truncated).
    pub args_summary: String,
    /// Whether the call succeeded.
    pub success: bool,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Optional error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated token counts for a turn.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenUsageSummary {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsageSummary {
    fn accumulate(&mut self, usage: &TokenUsage) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.total_tokens;
    }
}

/// Summary of a completed turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    pub session_id: String,
    pub reply: String,
    /// Number of model round-trips.
    pub model_calls: u32,
    pub tool_calls: Vec<ToolCallRecord>,
    pub tokens: TokenUsageSummary,
    pub duration_ms: u64,
    /// Whether the turn ended because the tool iteration cap was hit.
    pub hit_iteration_cap: bool,
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Where a turn currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentState {
    /// No turn in progress, or the turn just finished.
    Idle,
    /// Waiting for the model; `iteration` tool rounds have completed.
    AwaitingModel { iteration: usize },
    /// Executing the calls of round `iteration`.
    ToolDispatch { calls: Vec<ToolCall>, iteration: usize },
    /// The final reply is known and about to be appended.
    Responding { reply: String },
}

/// Mutable bookkeeping for one turn.
#[derive(Debug, Default)]
pub struct TurnContext {
    pending_message: Option<String>,
    reply: Option<String>,
    records: Vec<ToolCallRecord>,
    tokens: TokenUsageSummary,
    model_calls: u32,
    hit_cap: bool,
}

impl TurnContext {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            pending_message: Some(message.into()),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// Runs the tool-routing loop over a session's history.
pub struct Agent {
    provider: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    system_prompt: String,
    max_tool_iterations: usize,
}

impl Agent {
    pub fn new(provider: Arc<dyn ModelProvider>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            tools,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_max_tool_iterations(mut self, max: usize) -> Self {
        self.max_tool_iterations = max.max(1);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run one user turn to completion against `session`.
    ///
    /// On error the history keeps whatever fully paired turns were already
    /// appended; nothing else is added.
    pub async fn run_turn(
        &self,
        session: &mut Session,
        message: &str,
    ) -> Result<TurnReport, AgentError> {
        let started = Instant::now();
        let mut ctx = TurnContext::new(message);

        let mut state = self.step(AgentState::Idle, session, &mut ctx).await?;
        while state != AgentState::Idle {
            state = self.step(state, session, &mut ctx).await?;
        }

        let report = TurnReport {
            session_id: session.id.clone(),
            reply: ctx.reply.unwrap_or_default(),
            model_calls: ctx.model_calls,
            tool_calls: ctx.records,
            tokens: ctx.tokens,
            duration_ms: started.elapsed().as_millis() as u64,
            hit_iteration_cap: ctx.hit_cap,
        };
        info!(
            session_id = %report.session_id,
            model_calls = report.model_calls,
            tool_calls = report.tool_calls.len(),
            duration_ms = report.duration_ms,
            "turn complete"
        );
        Ok(report)
    }

    /// Advance the state machine by one transition.
    pub async fn step(
        &self,
        state: AgentState,
        session: &mut Session,
        ctx: &mut TurnContext,
    ) -> Result<AgentState, AgentError> {
        match state {
            AgentState::Idle => {
                let Some(message) = ctx.pending_message.take() else {
                    return Ok(AgentState::Idle);
                };
                validate_pairing(&session.history)?;
                session.history.push(Turn::user(message));
                Ok(AgentState::AwaitingModel { iteration: 0 })
            }

            AgentState::AwaitingModel { iteration } => {
                let messages = self.build_messages(&session.history);
                let definitions = self.tools.definitions();
                let (response, usage) = self
                    .provider
                    .send_chat_with_functions(&messages, &definitions)
                    .await
                    .map_err(|e| AgentError::Transport(format!("model call failed: {e:#}")))?;
                ctx.model_calls += 1;
                if let Some(ref u) = usage {
                    ctx.tokens.accumulate(u);
                }

                match response {
                    ProviderResponse::Final(reply) if reply.trim().is_empty() => {
                        warn!(session_id = %session.id, "model returned an empty reply");
                        Err(AgentError::Transport(
                            "model returned neither a reply nor usable tool calls".into(),
                        ))
                    }
                    ProviderResponse::Final(reply) => Ok(AgentState::Responding { reply }),
                    ProviderResponse::ToolCalls(items) if iteration >= self.max_tool_iterations => {
                        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
                        warn!(
                            session_id = %session.id,
                            iterations = iteration,
                            requested = ?names,
                            "tool iteration cap reached"
                        );
                        ctx.hit_cap = true;
                        Ok(AgentState::Responding {
                            reply: format!(
                                "I stopped after {iteration} rounds of tool calls without reaching \
                                 a final answer. The next requested tools were: {}. Please narrow \
                                 the request or ask again.",
                                names.join(", ")
                            ),
                        })
                    }
                    ProviderResponse::ToolCalls(items) => {
                        let mut calls: Vec<ToolCall> = Vec::with_capacity(items.len());
                        for item in items {
                            let id = if item.id.is_empty() || calls.iter().any(|c| c.id == item.id)
                            {
                                format!("call_{}", uuid::Uuid::new_v4().simple())
                            } else {
                                item.id
                            };
                            calls.push(ToolCall {
                                id,
                                name: item.name,
                                arguments: item.arguments,
                            });
                        }
                        Ok(AgentState::ToolDispatch { calls, iteration })
                    }
                }
            }

            AgentState::ToolDispatch { calls, iteration } => {
                let mut results = Vec::with_capacity(calls.len());
                for call in &calls {
                    debug!(tool = %call.name, call_id = %call.id, iteration, "invoking tool");
                    let timer = Instant::now();
                    let outcome = self.tools.dispatch(call).await?;
                    ctx.records.push(ToolCallRecord {
                        tool: call.name.clone(),
                        args_summary: crate::utils::truncate_str(&call.arguments, 200),
                        success: !outcome.is_error(),
                        duration_ms: timer.elapsed().as_millis() as u64,
                        error: outcome.is_error().then(|| {
                            outcome.content["error"]["message"]
                                .as_str()
                                .unwrap_or_default()
                                .to_string()
                        }),
                    });
                    results.push(Turn::tool_result(&call.id, outcome.content_text()));
                }

                session.history.push(Turn::assistant_tool_calls(calls));
                session.history.extend(results);
                Ok(AgentState::AwaitingModel {
                    iteration: iteration + 1,
                })
            }

            AgentState::Responding { reply } => {
                session.history.push(Turn::assistant(reply.clone()));
                ctx.reply = Some(reply);
                Ok(AgentState::Idle)
            }
        }
    }

    /// System prompt followed by the history, in order.
    pub fn build_messages(&self, history: &[Turn]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::new("system", &self.system_prompt));
        messages.extend(history.iter().map(turn_to_message));
        messages
    }
}

fn turn_to_message(turn: &Turn) -> ChatMessage {
    let mut msg = ChatMessage::new(turn.role.as_str(), &turn.content);
    match turn.role {
        Role::Assistant if !turn.tool_calls.is_empty() => {
            msg.tool_calls = Some(
                turn.tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": { "name": c.name, "arguments": c.arguments },
                        })
                    })
                    .collect(),
            );
        }
        Role::Tool => msg.tool_call_id = turn.tool_call_id.clone(),
        _ => {}
    }
    msg
}
