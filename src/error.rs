//! Error taxonomy shared by the store, analyzer, tool registry and agent.
//!
//! Tool-level errors ([`AgentError::is_tool_level`]) never leave the tool
//! loop: the registry turns them into structured tool results so the model
//! can relay or recover.  Only transport failures, session conflicts and
//! malformed histories escape to the caller of a turn.

use thiserror::Error;

/// Errors produced while serving a conversational turn.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Tool arguments did not match the declared schema.
    #[error("invalid arguments: {0}")]
    Validation(String),

    /// No announcement (or attachment) matched the request.
    #[error("not found: {0}")]
    NotFound(String),

    /// The file is missing, unreadable, or not a PDF.
    #[error("document format error: {0}")]
    DocumentFormat(String),

    /// The analysis request itself is inconsistent (e.g. `custom` without a prompt).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The vision provider failed while analysing a document.
    #[error("analysis provider error: {0}")]
    AnalysisProvider(String),

    /// The record store or completion provider could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// Another turn currently owns the session.
    #[error("session {0} is busy with another turn")]
    SessionConflict(String),

    /// The stored history breaks the tool-call pairing invariant.
    #[error("malformed history: {0}")]
    MalformedHistory(String),
}

impl AgentError {
    /// Stable machine-readable name for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Validation(_) => "validation",
            AgentError::NotFound(_) => "not_found",
            AgentError::DocumentFormat(_) => "document_format",
            AgentError::InvalidRequest(_) => "invalid_request",
            AgentError::AnalysisProvider(_) => "analysis_provider",
            AgentError::Transport(_) => "transport",
            AgentError::SessionConflict(_) => "session_conflict",
            AgentError::MalformedHistory(_) => "malformed_history",
        }
    }

    /// Whether the error is relayed to the model as a tool result.
    pub fn is_tool_level(&self) -> bool {
        !matches!(
            self,
            AgentError::Transport(_)
                | AgentError::SessionConflict(_)
                | AgentError::MalformedHistory(_)
        )
    }

    /// Wrap any displayable error as a transport failure.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        AgentError::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AgentError::Transport(format!("request timed out: {err}"))
        } else {
            AgentError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_level_split() {
        assert!(AgentError::Validation("x".into()).is_tool_level());
        assert!(AgentError::NotFound("x".into()).is_tool_level());
        assert!(AgentError::DocumentFormat("x".into()).is_tool_level());
        assert!(AgentError::AnalysisProvider("x".into()).is_tool_level());
        assert!(!AgentError::Transport("x".into()).is_tool_level());
        assert!(!AgentError::SessionConflict("s".into()).is_tool_level());
        assert!(!AgentError::MalformedHistory("x".into()).is_tool_level());
    }

    #[test]
    fn display_includes_detail() {
        let e = AgentError::SessionConflict("abc".into());
        assert_eq!(e.to_string(), "session abc is busy with another turn");
        assert_eq!(e.kind(), "session_conflict");
    }
}
