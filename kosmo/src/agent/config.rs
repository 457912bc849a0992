//! Agent configuration.

use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::{CoreError, Result};

/// How the tools-manual prompt module selects tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolsManualMode {
    /// Emit every registered tool.
    #[default]
    All,
    /// Emit only the `include` set.
    Listed,
    /// Emit `include` minus `exclude`.
    Custom,
}

/// Configuration for the tools-manual prompt module.
#[derive(Debug, Clone, Default)]
pub struct ToolsManualConfig {
    /// Selection mode.
    pub mode: ToolsManualMode,
    /// Tool names to include (for `Listed` and `Custom`).
    pub include: Vec<String>,
    /// Tool names to exclude (for `Custom`).
    pub exclude: Vec<String>,
}

impl ToolsManualConfig {
    /// Whether a tool with this name should appear in the manual.
    #[must_use]
    pub fn selects(&self, name: &str) -> bool {
        match self.mode {
            ToolsManualMode::All => true,
            ToolsManualMode::Listed => self.include.iter().any(|n| n == name),
            ToolsManualMode::Custom => {
                self.include.iter().any(|n| n == name) && !self.exclude.iter().any(|n| n == name)
            }
        }
    }
}

/// Configuration for one agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Stable opaque agent id.
    pub id: String,

    /// Template identity, when the agent was built from one.
    pub template: Option<String>,

    /// Model identifier passed through to the provider.
    pub model: String,

    /// Output token cap.
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    pub temperature: Option<f32>,

    /// Base system instructions.
    pub instructions: Option<String>,

    /// Free-form metadata, readable by prompt-module predicates.
    pub metadata: Map<String, Value>,

    /// Per-turn iteration bound.
    pub max_steps: u32,

    /// Per-tool-call deadline.
    pub tool_timeout: Duration,

    /// Per-LLM-call deadline.
    pub llm_timeout: Duration,

    /// Deadline for a pending approval; `None` waits indefinitely.
    pub approval_timeout: Option<Duration>,

    /// Tools-manual selection for the system prompt.
    pub tools_manual: ToolsManualConfig,
}

impl AgentConfig {
    /// Default per-turn iteration bound.
    pub const DEFAULT_MAX_STEPS: u32 = 40;

    /// Create a config with defaults for everything but identity and model.
    #[must_use]
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            template: None,
            model: model.into(),
            max_tokens: None,
            temperature: None,
            instructions: None,
            metadata: Map::new(),
            max_steps: Self::DEFAULT_MAX_STEPS,
            tool_timeout: crate::tool::DEFAULT_TOOL_TIMEOUT,
            llm_timeout: crate::provider::DEFAULT_CALL_TIMEOUT,
            approval_timeout: None,
            tools_manual: ToolsManualConfig::default(),
        }
    }

    /// Set the template identity.
    #[must_use]
    pub fn template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    /// Set the output token cap.
    #[must_use]
    pub const fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the sampling temperature.
    #[must_use]
    pub const fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the base instructions.
    #[must_use]
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Set one metadata key.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Set the per-turn iteration bound.
    #[must_use]
    pub const fn max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Set the per-tool-call deadline.
    #[must_use]
    pub const fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Set the per-LLM-call deadline.
    #[must_use]
    pub const fn llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    /// Set the approval deadline.
    #[must_use]
    pub const fn approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = Some(timeout);
        self
    }

    /// Set the tools-manual configuration.
    #[must_use]
    pub fn tools_manual(mut self, tools_manual: ToolsManualConfig) -> Self {
        self.tools_manual = tools_manual;
        self
    }

    /// A string metadata value, when present.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// [`CoreError::Config`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(CoreError::config("agent id must not be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(CoreError::config("model must not be empty"));
        }
        if self.max_steps == 0 {
            return Err(CoreError::config("max_steps must be at least 1"));
        }
        if let Some(t) = self.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(CoreError::config(format!(
                "temperature {t} outside [0.0, 2.0]"
            )));
        }
        Ok(())
    }
}
