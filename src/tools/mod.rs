//! Tool registry.
//!
//! A [`ToolRegistry`] maps tool names to a declared argument schema
//! ([`ToolSpec`]) and an async handler.  Schemas are checked structurally
//! at registration; arguments are checked against them at dispatch, so a
//! handler only ever sees an object with known, well-typed fields.
//!
//! Dispatch never fails for tool-level problems: unknown tools, bad
//! arguments and handler errors all come back as a [`ToolOutcome`]
//! carrying `{"error": {"kind", "message"}}` so the model can recover.

pub mod builtins;

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::session::ToolCall;

// ── Schema ───────────────────────────────────────────────────

/// Declared type of a tool parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Boolean,
    /// A string restricted to the listed variants.
    Enum(Vec<String>),
}

/// One named tool parameter.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub required: bool,
    pub description: String,
    pub minimum: Option<i64>,
    pub maximum: Option<i64>,
}

impl ParamSpec {
    fn new(name: &str, ty: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            ty,
            required: false,
            description: description.to_string(),
            minimum: None,
            maximum: None,
        }
    }

    pub fn string(name: &str, description: &str) -> Self {
        Self::new(name, ParamType::String, description)
    }

    pub fn integer(name: &str, description: &str) -> Self {
        Self::new(name, ParamType::Integer, description)
    }

    pub fn boolean(name: &str, description: &str) -> Self {
        Self::new(name, ParamType::Boolean, description)
    }

    pub fn one_of(name: &str, variants: &[&str], description: &str) -> Self {
        let variants = variants.iter().map(|v| v.to_string()).collect();
        Self::new(name, ParamType::Enum(variants), description)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn range(mut self, minimum: i64, maximum: i64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    fn json_schema(&self) -> Value {
        let mut schema = match &self.ty {
            ParamType::String => json!({ "type": "string" }),
            ParamType::Integer => json!({ "type": "integer" }),
            ParamType::Boolean => json!({ "type": "boolean" }),
            ParamType::Enum(variants) => json!({ "type": "string", "enum": variants }),
        };
        if !self.description.is_empty() {
            schema["description"] = json!(self.description);
        }
        if let Some(min) = self.minimum {
            schema["minimum"] = json!(min);
        }
        if let Some(max) = self.maximum {
            schema["maximum"] = json!(max);
        }
        schema
    }

    /// Check one present, non-null value against this parameter.
    fn check(&self, value: &Value) -> Result<(), String> {
        match &self.ty {
            ParamType::String => {
                if !value.is_string() {
                    return Err(format!("'{}' must be a string", self.name));
                }
            }
            ParamType::Boolean => {
                if !value.is_boolean() {
                    return Err(format!("'{}' must be a boolean", self.name));
                }
            }
            ParamType::Enum(variants) => {
                let ok = value
                    .as_str()
                    .map(|s| variants.iter().any(|v| v == s))
                    .unwrap_or(false);
                if !ok {
                    return Err(format!(
                        "'{}' must be one of: {}",
                        self.name,
                        variants.join(", ")
                    ));
                }
            }
            ParamType::Integer => {
                let Some(n) = value.as_i64() else {
                    return Err(format!("'{}' must be an integer", self.name));
                };
                if let Some(min) = self.minimum {
                    if n < min {
                        return Err(format!("'{}' must be >= {min}", self.name));
                    }
                }
                if let Some(max) = self.maximum {
                    if n > max {
                        return Err(format!("'{}' must be <= {max}", self.name));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Declared interface of a tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// JSON Schema object for the arguments.
    pub fn args_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| (p.name.clone(), p.json_schema()))
            .collect();
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    fn check_structure(&self) -> anyhow::Result<()> {
        if !is_snake_case(&self.name) {
            anyhow::bail!("tool name '{}' must be non-empty snake_case", self.name);
        }
        let mut seen = HashSet::new();
        for p in &self.params {
            if !is_snake_case(&p.name) {
                anyhow::bail!("{}: parameter name '{}' must be snake_case", self.name, p.name);
            }
            if !seen.insert(p.name.as_str()) {
                anyhow::bail!("{}: duplicate parameter '{}'", self.name, p.name);
            }
            if let ParamType::Enum(variants) = &p.ty {
                if variants.is_empty() {
                    anyhow::bail!("{}: enum parameter '{}' has no variants", self.name, p.name);
                }
            }
            if let (Some(min), Some(max)) = (p.minimum, p.maximum) {
                if min > max {
                    anyhow::bail!(
                        "{}: parameter '{}' has minimum {min} > maximum {max}",
                        self.name,
                        p.name
                    );
                }
            }
        }
        Ok(())
    }

    /// Parse raw argument text and validate it, returning the argument
    /// object with `null` optional fields removed.
    pub fn validate(&self, raw: &str) -> Result<Value, AgentError> {
        let raw = raw.trim();
        let parsed: Value = if raw.is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(raw)
                .map_err(|e| AgentError::Validation(format!("arguments are not valid JSON: {e}")))?
        };
        let Value::Object(mut args) = parsed else {
            return Err(AgentError::Validation(
                "arguments must be a JSON object".into(),
            ));
        };

        if let Some(unknown) = args
            .keys()
            .find(|k| !self.params.iter().any(|p| &p.name == *k))
        {
            return Err(AgentError::Validation(format!("unknown field '{unknown}'")));
        }

        args.retain(|_, v| !v.is_null());

        for p in &self.params {
            match args.get(&p.name) {
                None if p.required => {
                    return Err(AgentError::Validation(format!(
                        "missing required field '{}'",
                        p.name
                    )));
                }
                None => {}
                Some(v) => p.check(v).map_err(AgentError::Validation)?,
            }
        }
        Ok(Value::Object(args))
    }
}

fn is_snake_case(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

// ── Registry ─────────────────────────────────────────────────

/// Boxed future returned by tool handlers.
pub type ToolFuture = Pin<Box<dyn Future<Output = Result<Value, AgentError>> + Send>>;

/// Async handler invoked with validated arguments.
pub type ToolHandler = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

/// Wrap an async closure as a [`ToolHandler`].
pub fn handler_fn<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, AgentError>> + Send + 'static,
{
    Arc::new(move |args| -> ToolFuture { Box::pin(f(args)) })
}

/// Metadata describing a registered tool.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolMeta {
    pub name: String,
    pub description: String,
    pub args_schema: Value,
}

struct ToolEntry {
    spec: ToolSpec,
    handler: ToolHandler,
}

/// Result of dispatching one [`ToolCall`].
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub call_id: String,
    pub name: String,
    pub content: Value,
    /// Set when the call failed; the content then holds the error object.
    pub error_kind: Option<&'static str>,
}

impl ToolOutcome {
    fn failed(call: &ToolCall, err: &AgentError) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            content: json!({ "error": { "kind": err.kind(), "message": err.to_string() } }),
            error_kind: Some(err.kind()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_kind.is_some()
    }

    /// Text stored in the tool-result turn.
    pub fn content_text(&self) -> String {
        self.content.to_string()
    }
}

/// Name → {schema, handler} map.  Registration order is preserved in
/// [`definitions`](Self::definitions).
#[derive(Default)]
pub struct ToolRegistry {
    entries: Vec<ToolEntry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.  Rejects malformed schemas and duplicate names.
    pub fn register(&mut self, spec: ToolSpec, handler: ToolHandler) -> anyhow::Result<()> {
        spec.check_structure()?;
        if self.entries.iter().any(|e| e.spec.name == spec.name) {
            anyhow::bail!("tool '{}' is already registered", spec.name);
        }
        debug!(tool = %spec.name, params = spec.params.len(), "tool registered");
        self.entries.push(ToolEntry { spec, handler });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.entries
            .iter()
            .find(|e| e.spec.name == name)
            .map(|e| &e.spec)
    }

    pub fn list(&self) -> Vec<ToolMeta> {
        self.entries
            .iter()
            .map(|e| ToolMeta {
                name: e.spec.name.clone(),
                description: e.spec.description.clone(),
                args_schema: e.spec.args_schema(),
            })
            .collect()
    }

    /// OpenAI `tools` array.
    pub fn definitions(&self) -> Vec<Value> {
        self.entries
            .iter()
            .map(|e| {
                json!({
                    "type": "function",
                    "function": {
                        "name": e.spec.name,
                        "description": e.spec.description,
                        "parameters": e.spec.args_schema(),
                    }
                })
            })
            .collect()
    }

    /// Validate and run one call.
    ///
    /// Only errors that are not tool-level (see
    /// [`AgentError::is_tool_level`]) are returned as `Err`.
    pub async fn dispatch(&self, call: &ToolCall) -> Result<ToolOutcome, AgentError> {
        let Some(entry) = self.entries.iter().find(|e| e.spec.name == call.name) else {
            let err = AgentError::Validation(format!("unknown tool '{}'", call.name));
            warn!(tool = %call.name, "model requested an unknown tool");
            return Ok(ToolOutcome::failed(call, &err));
        };

        let args = match entry.spec.validate(&call.arguments) {
            Ok(args) => args,
            Err(err) => {
                warn!(tool = %call.name, error = %err, "tool arguments rejected");
                return Ok(ToolOutcome::failed(call, &err));
            }
        };

        debug!(tool = %call.name, call_id = %call.id, "dispatching tool");
        match (entry.handler)(args).await {
            Ok(content) => Ok(ToolOutcome {
                call_id: call.id.clone(),
                name: call.name.clone(),
                content,
                error_kind: None,
            }),
            Err(err) if err.is_tool_level() => {
                warn!(tool = %call.name, kind = err.kind(), error = %err, "tool failed");
                Ok(ToolOutcome::failed(call, &err))
            }
            Err(err) => Err(err),
        }
    }
}

/// Fetch a string argument from a validated argument object.
pub(crate) fn str_arg<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}
