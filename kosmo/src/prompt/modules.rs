//! Built-in prompt modules.
//!
//! Priorities: base-prompt (0), environment (10), sandbox (15),
//! tools-manual (20), todo-reminder (25), code-reference (30).

use std::fmt::Write as _;

use super::{PromptContext, PromptModule};

const DEFAULT_BASE_PROMPT: &str =
    "You are a capable assistant. Work step by step and use the available tools when they help.";

/// The agent's base instructions.
#[derive(Debug, Clone, Default)]
pub struct BasePrompt {
    fallback: Option<String>,
}

impl BasePrompt {
    /// Use a custom fallback for agents with no configured instructions.
    #[must_use]
    pub fn with_fallback(fallback: impl Into<String>) -> Self {
        Self {
            fallback: Some(fallback.into()),
        }
    }
}

impl PromptModule for BasePrompt {
    fn name(&self) -> &'static str {
        "base-prompt"
    }

    fn priority(&self) -> i32 {
        0
    }

    fn render(&self, ctx: &PromptContext<'_>) -> String {
        ctx.config
            .instructions
            .clone()
            .or_else(|| self.fallback.clone())
            .unwrap_or_else(|| DEFAULT_BASE_PROMPT.to_owned())
    }
}

/// Host environment facts.
#[derive(Debug, Clone, Copy, Default)]
pub struct Environment;

impl PromptModule for Environment {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn render(&self, ctx: &PromptContext<'_>) -> String {
        format!("# Environment\nPlatform: {}", ctx.platform)
    }
}

/// Sandbox notice; active only for sandboxed agents.
#[derive(Debug, Clone, Copy, Default)]
pub struct SandboxInfo;

impl PromptModule for SandboxInfo {
    fn name(&self) -> &'static str {
        "sandbox"
    }

    fn priority(&self) -> i32 {
        15
    }

    fn is_active(&self, ctx: &PromptContext<'_>) -> bool {
        ctx.sandbox_work_dir.is_some()
    }

    fn render(&self, ctx: &PromptContext<'_>) -> String {
        let work_dir = ctx.sandbox_work_dir.unwrap_or_default();
        format!(
            "# Sandbox\nCommands run inside an isolated sandbox rooted at {work_dir}. \
             Files outside it are not reachable."
        )
    }
}

/// The tool manual: names, descriptions, fragments, examples.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolsManual;

impl PromptModule for ToolsManual {
    fn name(&self) -> &'static str {
        "tools-manual"
    }

    fn priority(&self) -> i32 {
        20
    }

    fn is_active(&self, ctx: &PromptContext<'_>) -> bool {
        ctx.tools
            .names()
            .iter()
            .any(|name| ctx.config.tools_manual.selects(name))
    }

    fn render(&self, ctx: &PromptContext<'_>) -> String {
        let mut out = String::from("# Tools");
        for tool in ctx.tools.iter() {
            if !ctx.config.tools_manual.selects(tool.name()) {
                continue;
            }
            let _ = write!(out, "\n\n## {}\n{}", tool.name(), tool.description());
            if let Some(fragment) = tool.prompt() {
                let _ = write!(out, "\n{fragment}");
            }
            let examples = tool.examples();
            if !examples.is_empty() {
                out.push_str("\nExamples:");
                for example in examples {
                    let _ = write!(out, "\n- {example}");
                }
            }
        }
        out
    }
}

/// Reminder to keep the running todo list current.
#[derive(Debug, Clone, Copy, Default)]
pub struct TodoReminder;

impl PromptModule for TodoReminder {
    fn name(&self) -> &'static str {
        "todo-reminder"
    }

    fn priority(&self) -> i32 {
        25
    }

    fn is_active(&self, ctx: &PromptContext<'_>) -> bool {
        ctx.config
            .metadata
            .get("todos_enabled")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    fn render(&self, _ctx: &PromptContext<'_>) -> String {
        "# Task tracking\nKeep the todo list current: add items as you discover work and \
         mark them done as you finish."
            .to_owned()
    }
}

/// Code citation guidance; active only for code assistants.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeReference;

impl PromptModule for CodeReference {
    fn name(&self) -> &'static str {
        "code-reference"
    }

    fn priority(&self) -> i32 {
        30
    }

    fn is_active(&self, ctx: &PromptContext<'_>) -> bool {
        ctx.config.metadata_str("agent_type") == Some("code_assistant")
    }

    fn render(&self, _ctx: &PromptContext<'_>) -> String {
        "# Code references\nWhen citing code, reference it as `path:line` so readers can \
         jump straight to it."
            .to_owned()
    }
}
