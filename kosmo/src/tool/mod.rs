//! Tool traits, call records, and execution context.
//!
//! Tools are the primary way agents act on the world. The typed [`Tool`]
//! trait is what implementors write; the object-safe [`DynTool`] wrapper is
//! what the registry and dispatcher work with. A blanket impl bridges the
//! two, so any `Tool` can be registered directly.

mod dispatch;
mod registry;

pub use dispatch::{DEFAULT_TOOL_TIMEOUT, Dispatcher};
pub use registry::{ToolRegistry, ToolRegistryBuilder};

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::ToolError;
use crate::event::now_ms;
use crate::inspect::ApprovalDecision;
use crate::sandbox::Sandbox;

/// Risk classification for a tool call.
///
/// `Low` auto-approves under smart approval; `Medium` and `High` require a
/// human decision unless a rule overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Read-only or otherwise harmless.
    Low,
    /// Mutates local state.
    Medium,
    /// Executes arbitrary effects (shell, deletion, outbound network).
    High,
}

impl RiskLevel {
    /// Get the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const HIGH_RISK_HINTS: &[&str] = &[
    "shell", "bash", "exec", "delete", "rm", "http", "fetch", "request", "curl",
];
const MEDIUM_RISK_HINTS: &[&str] = &["write", "edit", "patch", "update", "create", "move"];
const LOW_RISK_HINTS: &[&str] = &[
    "read", "list", "search", "find", "get", "glob", "grep", "stat", "view",
];

/// Default risk for a tool name, used when the tool declares none.
///
/// Matches on the `-`/`_`/`.` separated segments of the name; unknown
/// names classify as [`RiskLevel::Medium`].
#[must_use]
pub fn default_risk(tool_name: &str) -> RiskLevel {
    let segments: Vec<&str> = tool_name
        .split(['-', '_', '.'])
        .filter(|s| !s.is_empty())
        .collect();
    let hit = |hints: &[&str]| segments.iter().any(|s| hints.contains(s));
    if hit(HIGH_RISK_HINTS) {
        RiskLevel::High
    } else if hit(MEDIUM_RISK_HINTS) {
        RiskLevel::Medium
    } else if hit(LOW_RISK_HINTS) {
        RiskLevel::Low
    } else {
        RiskLevel::Medium
    }
}

/// Definition of a tool as advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name, unique and case-sensitive.
    pub name: String,

    /// What the tool does; helps the model decide when to call it.
    pub description: String,

    /// JSON schema for the tool's input.
    pub parameters: Value,

    /// Declared risk, when the tool overrides the default table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskLevel>,
}

impl ToolDefinition {
    /// Create a new tool definition.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            risk: None,
        }
    }

    /// Create a definition whose input schema is derived from a Rust type.
    #[must_use]
    pub fn for_args<T: schemars::JsonSchema>(
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        let schema = schemars::schema_for!(T);
        Self::new(
            name,
            description,
            serde_json::to_value(schema).unwrap_or_default(),
        )
    }

    /// Set the declared risk.
    #[must_use]
    pub const fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk = Some(risk);
        self
    }
}

/// Outcome of a completed tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Result payload (or an error message when `is_error`).
    pub content: Value,
    /// Whether the call failed.
    pub is_error: bool,
}

impl ToolOutcome {
    /// A successful outcome.
    #[must_use]
    pub const fn ok(content: Value) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    /// A failed outcome.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: Value::String(message.into()),
            is_error: true,
        }
    }
}

/// One tool invocation: identity, arguments, lifecycle timestamps, outcome,
/// and the permission decision that gated it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Globally unique per-invocation id.
    pub id: String,

    /// Name of the tool.
    pub name: String,

    /// Argument mapping.
    pub arguments: Value,

    /// When the call record was created (ms since epoch).
    pub created_at_ms: u64,

    /// When execution started, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,

    /// When execution ended, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<u64>,

    /// Result or error, once the call finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ToolOutcome>,

    /// The inspector's (or human's) decision for this call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<ApprovalDecision>,
}

impl ToolCallRecord {
    /// Create a record with a fresh id.
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), name, arguments)
    }

    /// Create a record with a caller-supplied id (e.g. the model's
    /// tool-use id).
    #[must_use]
    pub fn with_id(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            created_at_ms: now_ms(),
            started_at_ms: None,
            ended_at_ms: None,
            outcome: None,
            decision: None,
        }
    }

    /// Wall-clock duration of the execution, when both timestamps exist.
    #[must_use]
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at_ms, self.ended_at_ms) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }

    /// Whether the call completed without error.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcome.as_ref().is_some_and(|o| !o.is_error)
    }
}

/// Typed service handles a tool may need, keyed by type.
///
/// This is how subordinate services (an MCP manager, a memory index, a
/// vector store) reach tools without process-wide globals.
#[derive(Default, Clone)]
pub struct ServiceMap {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServiceMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a service handle, replacing any previous handle of the same
    /// type.
    pub fn insert<T: Any + Send + Sync>(&mut self, service: Arc<T>) {
        self.entries.insert(TypeId::of::<T>(), service);
    }

    /// Fetch a service handle by type.
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|arc| arc.downcast::<T>().ok())
    }

    /// Number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ServiceMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceMap")
            .field("len", &self.entries.len())
            .finish()
    }
}

/// Execution context handed to every tool invocation.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Id of the owning agent.
    pub agent_id: String,

    /// Sandbox handle, when the agent runs sandboxed.
    pub sandbox: Option<Arc<dyn Sandbox>>,

    /// Cancellation signal; tools observing it must return promptly.
    pub cancel: CancellationToken,

    /// Typed service handles.
    pub services: ServiceMap,
}

impl ToolContext {
    /// Create a context for the given agent.
    #[must_use]
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            sandbox: None,
            cancel: CancellationToken::new(),
            services: ServiceMap::new(),
        }
    }

    /// Attach a sandbox handle.
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Register a service handle.
    #[must_use]
    pub fn with_service<T: Any + Send + Sync>(mut self, service: Arc<T>) -> Self {
        self.services.insert(service);
        self
    }
}

/// The core trait implemented by tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Static name of the tool.
    const NAME: &'static str;

    /// Arguments type for the tool.
    type Args: DeserializeOwned + Send;

    /// Output type of the tool.
    type Output: Serialize + Send;

    /// Error type for tool execution.
    type Error: Into<ToolError> + Send;

    /// Get the name of the tool.
    fn name(&self) -> &'static str {
        Self::NAME
    }

    /// Get the description of the tool.
    fn description(&self) -> String;

    /// Get the JSON schema for the tool's input.
    fn parameters_schema(&self) -> Value;

    /// Declared risk, overriding the default table.
    fn risk(&self) -> Option<RiskLevel> {
        None
    }

    /// Manual fragment injected into the system prompt, if any.
    fn prompt(&self) -> Option<String> {
        None
    }

    /// Usage examples for the prompt manual.
    fn examples(&self) -> Vec<String> {
        Vec::new()
    }

    /// Execute the tool.
    async fn call(&self, args: Self::Args, ctx: &ToolContext) -> Result<Self::Output, Self::Error>;

    /// Get the tool definition advertised to the model.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_owned(),
            description: self.description(),
            parameters: self.parameters_schema(),
            risk: self.risk(),
        }
    }

    /// Call the tool with JSON arguments and return JSON output.
    async fn call_json(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError>
    where
        Self::Output: 'static,
    {
        // Providers sometimes hand arguments through as an encoded string.
        let typed_args: Self::Args = match &args {
            Value::String(s) => {
                serde_json::from_str(s).map_err(|e| ToolError::InvalidArguments(e.to_string()))?
            }
            _ => serde_json::from_value(args)
                .map_err(|e| ToolError::InvalidArguments(e.to_string()))?,
        };

        let result = self.call(typed_args, ctx).await.map_err(Into::into)?;
        serde_json::to_value(result).map_err(|e| ToolError::Execution(e.to_string()))
    }
}

/// A shared dynamic tool, as stored in the registry.
pub type BoxedTool = Arc<dyn DynTool>;

/// Object-safe version of [`Tool`] for dynamic dispatch.
#[async_trait]
pub trait DynTool: Send + Sync {
    /// Get the name of the tool.
    fn name(&self) -> &str;

    /// Get the description of the tool.
    fn description(&self) -> String;

    /// Get the tool definition.
    fn definition(&self) -> ToolDefinition;

    /// Declared risk, if any.
    fn risk(&self) -> Option<RiskLevel>;

    /// Manual fragment for the system prompt, if any.
    fn prompt(&self) -> Option<String>;

    /// Usage examples.
    fn examples(&self) -> Vec<String>;

    /// Call the tool with JSON arguments.
    async fn call_json(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError>;
}

#[async_trait]
impl<T: Tool + 'static> DynTool for T
where
    T::Output: 'static,
{
    fn name(&self) -> &str {
        Tool::name(self)
    }

    fn description(&self) -> String {
        Tool::description(self)
    }

    fn definition(&self) -> ToolDefinition {
        Tool::definition(self)
    }

    fn risk(&self) -> Option<RiskLevel> {
        Tool::risk(self)
    }

    fn prompt(&self) -> Option<String> {
        Tool::prompt(self)
    }

    fn examples(&self) -> Vec<String> {
        Tool::examples(self)
    }

    async fn call_json(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        Tool::call_json(self, args, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_risk_table() {
        assert_eq!(default_risk("read_file"), RiskLevel::Low);
        assert_eq!(default_risk("list-dir"), RiskLevel::Low);
        assert_eq!(default_risk("web.search"), RiskLevel::Low);
        assert_eq!(default_risk("write_file"), RiskLevel::Medium);
        assert_eq!(default_risk("edit"), RiskLevel::Medium);
        assert_eq!(default_risk("shell"), RiskLevel::High);
        assert_eq!(default_risk("delete_branch"), RiskLevel::High);
        assert_eq!(default_risk("http_post"), RiskLevel::High);
        // Unknown names are treated conservatively.
        assert_eq!(default_risk("frobnicate"), RiskLevel::Medium);
    }

    #[test]
    fn record_duration_and_outcome() {
        let mut record = ToolCallRecord::new("read_file", json!({"path": "x"}));
        assert!(record.duration_ms().is_none());
        assert!(!record.succeeded());

        record.started_at_ms = Some(1_000);
        record.ended_at_ms = Some(1_250);
        record.outcome = Some(ToolOutcome::ok(json!("abc")));
        assert_eq!(record.duration_ms(), Some(250));
        assert!(record.succeeded());

        record.outcome = Some(ToolOutcome::error("boom"));
        assert!(!record.succeeded());
    }

    #[test]
    fn definition_schema_from_type() {
        #[derive(serde::Deserialize, schemars::JsonSchema)]
        #[allow(dead_code)]
        struct ReadArgs {
            /// Path to read.
            path: String,
        }

        let def = ToolDefinition::for_args::<ReadArgs>("read_file", "Reads a file.")
            .with_risk(RiskLevel::Low);
        assert_eq!(def.name, "read_file");
        assert_eq!(def.risk, Some(RiskLevel::Low));
        let props = &def.parameters["properties"];
        assert!(props.get("path").is_some());
    }

    #[test]
    fn service_map_round_trip() {
        struct Memory(&'static str);

        let mut services = ServiceMap::new();
        assert!(services.is_empty());
        services.insert(Arc::new(Memory("vectors")));

        let fetched: Arc<Memory> = services.get().expect("registered");
        assert_eq!(fetched.0, "vectors");
        assert!(services.get::<String>().is_none());
    }
}
