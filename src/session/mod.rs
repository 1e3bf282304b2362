//! Session abstraction: `Turn`, `Session`, and `SessionManager`.
//!
//! Sessions live in memory for the lifetime of the process.  Each one is
//! an `Arc<tokio::sync::Mutex<Session>>` slot in a map guarded by a
//! short-lived std mutex; holding the session mutex *is* the per-session
//! turn slot, so two turns on one session never interleave.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ConflictPolicy;
use crate::error::AgentError;

// ── Turn ─────────────────────────────────────────────────────

/// Author of a [`Turn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument text.
    pub arguments: String,
}

/// One role-tagged message in a session's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Non-empty only for assistant turns that request tools.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set only on tool-result turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Check that every tool call in `history` is answered by exactly one
/// tool-result turn with the same id before anything else is said, and
/// that every tool result answers an outstanding call.
pub fn validate_pairing(history: &[Turn]) -> Result<(), AgentError> {
    let mut pending: Vec<&str> = Vec::new();

    for (idx, turn) in history.iter().enumerate() {
        match turn.role {
            Role::Tool => {
                let id = turn.tool_call_id.as_deref().ok_or_else(|| {
                    AgentError::MalformedHistory(format!("tool result at {idx} has no call id"))
                })?;
                match pending.iter().position(|p| *p == id) {
                    Some(pos) => {
                        pending.remove(pos);
                    }
                    None => {
                        return Err(AgentError::MalformedHistory(format!(
                            "tool result at {idx} answers unknown call '{id}'"
                        )));
                    }
                }
            }
            Role::User | Role::Assistant => {
                if !pending.is_empty() {
                    return Err(AgentError::MalformedHistory(format!(
                        "turn {idx} follows unanswered tool calls: {}",
                        pending.join(", ")
                    )));
                }
                for call in &turn.tool_calls {
                    if pending.contains(&call.id.as_str()) {
                        return Err(AgentError::MalformedHistory(format!(
                            "duplicate tool call id '{}' at {idx}",
                            call.id
                        )));
                    }
                    pending.push(&call.id);
                }
            }
        }
    }

    if !pending.is_empty() {
        return Err(AgentError::MalformedHistory(format!(
            "unanswered tool calls: {}",
            pending.join(", ")
        )));
    }
    Ok(())
}

// ── Session ──────────────────────────────────────────────────

/// An isolated conversation history.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub history: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            history: Vec::new(),
            created_at: now,
            last_active_at: now,
        }
    }
}

type SessionSlot = Arc<AsyncMutex<Session>>;

/// Exclusive access to one session for the duration of a turn.
///
/// Dropping the guard releases the slot and records the activity time.
pub struct SessionGuard {
    guard: OwnedMutexGuard<Session>,
}

impl SessionGuard {
    pub fn id(&self) -> &str {
        &self.guard.id
    }
}

impl Deref for SessionGuard {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.guard
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.guard
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.guard.last_active_at = Utc::now();
    }
}

// ── SessionManager ───────────────────────────────────────────

/// Maps session ids to independent histories.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, SessionSlot>>,
    policy: ConflictPolicy,
    /// `None` disables idle eviction.
    idle_timeout: Option<Duration>,
}

impl SessionManager {
    pub fn new(policy: ConflictPolicy, idle_timeout: Option<Duration>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            policy,
            idle_timeout,
        }
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionSlot>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the session for `session_id`, creating a fresh one (with a
    /// newly generated id) when the id is absent or unknown.
    pub fn resolve(&self, session_id: Option<&str>) -> (String, SessionSlot) {
        let mut map = self.map();
        if let Some(id) = session_id {
            if let Some(slot) = map.get(id) {
                return (id.to_string(), slot.clone());
            }
        }
        let id = uuid::Uuid::new_v4().to_string();
        let slot = Arc::new(AsyncMutex::new(Session::new(id.clone())));
        map.insert(id.clone(), slot.clone());
        debug!(session_id = %id, requested = ?session_id, "session created");
        (id, slot)
    }

    /// Resolve a session and take its turn slot according to the
    /// configured conflict policy.
    pub async fn acquire(&self, session_id: Option<&str>) -> Result<SessionGuard, AgentError> {
        let (id, slot) = self.resolve(session_id);
        let guard = match self.policy {
            ConflictPolicy::Wait => slot.lock_owned().await,
            ConflictPolicy::Reject => slot
                .try_lock_owned()
                .map_err(|_| AgentError::SessionConflict(id.clone()))?,
        };
        Ok(SessionGuard { guard })
    }

    /// Remove a session.  Returns whether it existed.
    ///
    /// A turn already running on the session finishes against the
    /// detached history, which is then dropped.
    pub fn clear(&self, session_id: &str) -> bool {
        let existed = self.map().remove(session_id).is_some();
        if existed {
            info!(session_id = %session_id, "session cleared");
        }
        existed
    }

    /// Snapshot of a session's history, waiting for any in-flight turn.
    pub async fn history(&self, session_id: &str) -> Option<Vec<Turn>> {
        let slot = self.map().get(session_id).cloned()?;
        let session = slot.lock().await;
        Some(session.history.clone())
    }

    /// Drop sessions idle longer than the configured timeout.
    ///
    /// A session is never evicted while a turn holds (or waits for) its
    /// slot.  Returns the number of sessions removed.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let Some(timeout) = self.idle_timeout else {
            return 0;
        };
        let timeout = chrono::Duration::from_std(timeout)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));

        let mut map = self.map();
        let before = map.len();
        map.retain(|id, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(session) => {
                    let keep = now.signed_duration_since(session.last_active_at) <= timeout;
                    if !keep {
                        debug!(session_id = %id, "evicting idle session");
                    }
                    keep
                }
                Err(_) => true,
            }
        });
        before - map.len()
    }

    /// Run [`evict_idle`](Self::evict_idle) every `interval` until
    /// `cancel` fires.
    pub fn spawn_janitor(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = manager.evict_idle(Utc::now());
                        if evicted > 0 {
                            info!(evicted, remaining = manager.len(), "idle sessions evicted");
                        }
                    }
                }
            }
            debug!("session janitor stopped");
        })
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: "fetch_all_announcements".into(),
            arguments: "{}".into(),
        }
    }

    #[test]
    fn paired_history_is_valid() {
        let history = vec![
            Turn::user("hi"),
            Turn::assistant_tool_calls(vec![call("a"), call("b")]),
            Turn::tool_result("b", "{}"),
            Turn::tool_result("a", "{}"),
            Turn::assistant("done"),
        ];
        assert!(validate_pairing(&history).is_ok());
    }

    #[test]
    fn orphan_tool_result_rejected() {
        let history = vec![Turn::user("hi"), Turn::tool_result("x", "{}")];
        let err = validate_pairing(&history).unwrap_err();
        assert_eq!(err.kind(), "malformed_history");
    }

    #[test]
    fn unanswered_call_rejected() {
        let history = vec![
            Turn::user("hi"),
            Turn::assistant_tool_calls(vec![call("a"), call("b")]),
            Turn::tool_result("a", "{}"),
        ];
        assert!(validate_pairing(&history).is_err());
    }

    #[test]
    fn user_turn_between_call_and_result_rejected() {
        let history = vec![
            Turn::assistant_tool_calls(vec![call("a")]),
            Turn::user("again"),
            Turn::tool_result("a", "{}"),
        ];
        assert!(validate_pairing(&history).is_err());
    }

    #[test]
    fn duplicate_result_rejected() {
        let history = vec![
            Turn::assistant_tool_calls(vec![call("a")]),
            Turn::tool_result("a", "{}"),
            Turn::tool_result("a", "{}"),
        ];
        assert!(validate_pairing(&history).is_err());
    }

    #[test]
    fn unknown_id_gets_fresh_session() {
        let mgr = SessionManager::new(ConflictPolicy::Wait, None);
        let (id, _) = mgr.resolve(Some("does-not-exist"));
        assert_ne!(id, "does-not-exist");
        let (again, _) = mgr.resolve(Some(&id));
        assert_eq!(again, id);
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn clear_reports_existence() {
        let mgr = SessionManager::new(ConflictPolicy::Wait, None);
        let (id, _) = mgr.resolve(None);
        assert!(mgr.clear(&id));
        assert!(!mgr.clear(&id));
        assert!(mgr.is_empty());
    }
}
