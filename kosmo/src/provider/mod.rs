//! The vendor-neutral LLM provider seam.
//!
//! The core never talks HTTP itself; vendor adapters implement
//! [`Provider`] and the runtime consumes it through [`ProviderFacade`],
//! which adds retry and deadline handling.

mod retry;
mod scripted;
mod stream;

pub use retry::{DEFAULT_CALL_TIMEOUT, ProviderFacade, RetryPolicy};
pub use scripted::{ScriptedProvider, ScriptedResponse};
pub use stream::{BlockDelta, BlockStart, ChunkStream, StopReason, StreamAggregator, StreamChunk};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;
use crate::tool::ToolDefinition;
use crate::usage::Usage;

/// Vendor dialect for tool calling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolFormat {
    /// No vendor-specific shape.
    #[default]
    Generic,
    /// OpenAI-style function calling.
    OpenAi,
    /// Anthropic-style tool use blocks.
    Anthropic,
}

/// What a provider can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Supports tool/function calling.
    pub tool_calling: bool,
    /// Supports streamed responses.
    pub streaming: bool,
    /// Supports a dedicated system prompt.
    pub system_prompt: bool,
    /// Supports image inputs.
    pub vision: bool,
    /// Maximum context window in tokens.
    pub max_context_tokens: u32,
    /// The vendor's tool-calling dialect.
    pub tool_format: ToolFormat,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            tool_calling: true,
            streaming: true,
            system_prompt: true,
            vision: false,
            max_context_tokens: 128_000,
            tool_format: ToolFormat::Generic,
        }
    }
}

/// Vendor-neutral request options.
///
/// Every field has the same meaning across vendors; adapters map them to
/// vendor-specific parameters.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Cap on output tokens.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// System prompt override.
    pub system: Option<String>,
    /// Tool schemas available to the model.
    pub tools: Vec<ToolDefinition>,
}

impl ChatOptions {
    /// Create empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
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

    /// Set the system prompt.
    #[must_use]
    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the tool schemas.
    #[must_use]
    pub fn tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// A complete (non-streamed) model response.
#[derive(Debug, Clone)]
pub struct Completion {
    /// The assistant message.
    pub message: Message,
    /// Token usage for the call.
    pub usage: Usage,
}

/// The LLM provider interface consumed by the core.
#[async_trait]
pub trait Provider: Send + Sync {
    /// What this provider can do.
    fn capabilities(&self) -> Capabilities;

    /// Produce a complete response.
    async fn complete(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<Completion, ProviderError>;

    /// Produce a stream of typed chunks. The stream is finite and ordered;
    /// dropping it tears down the underlying response.
    async fn stream(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChunkStream, ProviderError>;
}
