//! System prompt assembly from priority-ordered modules.
//!
//! A [`PromptModule`] is a named renderer with a priority and an
//! activation predicate. The [`PromptBuilder`] activates the modules
//! whose predicates hold against the runtime configuration, sorts them by
//! priority ascending, and joins their output with blank lines. The
//! result is deterministic for a given context, which keeps prompt tests
//! stable.

mod modules;

pub use modules::{
    BasePrompt, CodeReference, Environment, SandboxInfo, TodoReminder, ToolsManual,
};

use std::sync::Arc;

use crate::agent::AgentConfig;
use crate::tool::ToolRegistry;

/// Everything a module may read while rendering.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    /// The agent's configuration (instructions, metadata, manual config).
    pub config: &'a AgentConfig,
    /// The agent's tool registry snapshot.
    pub tools: &'a ToolRegistry,
    /// The sandbox working directory, when the agent is sandboxed.
    pub sandbox_work_dir: Option<&'a str>,
    /// Host platform tag (defaults to the compile-target OS).
    pub platform: &'a str,
}

impl<'a> PromptContext<'a> {
    /// Create a context with no sandbox and the host platform.
    #[must_use]
    pub const fn new(config: &'a AgentConfig, tools: &'a ToolRegistry) -> Self {
        Self {
            config,
            tools,
            sandbox_work_dir: None,
            platform: std::env::consts::OS,
        }
    }

    /// Set the sandbox working directory.
    #[must_use]
    pub const fn with_sandbox_work_dir(mut self, work_dir: &'a str) -> Self {
        self.sandbox_work_dir = Some(work_dir);
        self
    }

    /// Override the platform tag.
    #[must_use]
    pub const fn with_platform(mut self, platform: &'a str) -> Self {
        self.platform = platform;
        self
    }
}

/// One composable section of the system prompt.
pub trait PromptModule: Send + Sync {
    /// Module name, for diagnostics.
    fn name(&self) -> &'static str;

    /// Sort key; lower renders earlier.
    fn priority(&self) -> i32;

    /// Whether the module applies to this agent.
    fn is_active(&self, _ctx: &PromptContext<'_>) -> bool {
        true
    }

    /// Render the module's text.
    fn render(&self, ctx: &PromptContext<'_>) -> String;
}

/// Assembles the system prompt from registered modules.
#[derive(Clone, Default)]
pub struct PromptBuilder {
    modules: Vec<Arc<dyn PromptModule>>,
}

impl PromptBuilder {
    /// An empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder with every built-in module registered.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new()
            .module(BasePrompt::default())
            .module(Environment)
            .module(SandboxInfo)
            .module(ToolsManual)
            .module(TodoReminder)
            .module(CodeReference)
    }

    /// Register a module.
    #[must_use]
    pub fn module(mut self, module: impl PromptModule + 'static) -> Self {
        self.modules.push(Arc::new(module));
        self
    }

    /// Names of active modules in render order, for diagnostics.
    #[must_use]
    pub fn active_modules(&self, ctx: &PromptContext<'_>) -> Vec<&'static str> {
        let mut active: Vec<&Arc<dyn PromptModule>> = self
            .modules
            .iter()
            .filter(|m| m.is_active(ctx))
            .collect();
        active.sort_by_key(|m| m.priority());
        active.iter().map(|m| m.name()).collect()
    }

    /// Assemble the system prompt.
    #[must_use]
    pub fn build(&self, ctx: &PromptContext<'_>) -> String {
        let mut active: Vec<&Arc<dyn PromptModule>> = self
            .modules
            .iter()
            .filter(|m| m.is_active(ctx))
            .collect();
        active.sort_by_key(|m| m.priority());

        let sections: Vec<String> = active
            .iter()
            .map(|m| m.render(ctx))
            .filter(|text| !text.trim().is_empty())
            .collect();
        sections.join("\n\n")
    }
}

impl std::fmt::Debug for PromptBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptBuilder")
            .field(
                "modules",
                &self.modules.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
