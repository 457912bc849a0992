//! A canned provider for tests and offline development.
//!
//! [`ScriptedProvider`] replays a fixed sequence of responses, one per
//! call, streaming them through the same chunk taxonomy a live adapter
//! would produce.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;
use crate::message::{ContentBlock, Message, Role};
use crate::usage::Usage;

use super::{
    BlockStart, Capabilities, ChatOptions, ChunkStream, Completion, Provider, StopReason,
    StreamChunk,
};

/// One canned assistant response.
#[derive(Debug, Clone, Default)]
pub struct ScriptedResponse {
    blocks: Vec<ContentBlock>,
    thinking: Option<String>,
    usage: Usage,
}

impl ScriptedResponse {
    /// An empty response to build on.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A plain text response.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::new().and_text(text)
    }

    /// A response that calls one tool.
    #[must_use]
    pub fn tool_use(name: impl Into<String>, arguments: Value) -> Self {
        Self::new().and_tool_use(name, arguments)
    }

    /// Append a text block.
    #[must_use]
    pub fn and_text(mut self, text: impl Into<String>) -> Self {
        self.blocks.push(ContentBlock::text(text));
        self
    }

    /// Append a tool-use block with a generated id.
    #[must_use]
    pub fn and_tool_use(mut self, name: impl Into<String>, arguments: Value) -> Self {
        self.blocks.push(ContentBlock::tool_use(
            uuid::Uuid::new_v4().to_string(),
            name,
            arguments,
        ));
        self
    }

    /// Prefix the stream with a thinking block.
    #[must_use]
    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = Some(thinking.into());
        self
    }

    /// Report token usage with the response.
    #[must_use]
    pub const fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    fn completion(&self) -> Completion {
        Completion {
            message: Message::new(Role::Assistant, self.blocks.clone()),
            usage: self.usage,
        }
    }

    fn chunks(&self) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        let mut index = 0;

        if let Some(thinking) = &self.thinking {
            chunks.push(StreamChunk::BlockStart {
                index,
                block: BlockStart::Thinking,
            });
            chunks.push(StreamChunk::thinking_delta(index, thinking.clone()));
            chunks.push(StreamChunk::BlockStop { index });
            index += 1;
        }

        let mut saw_tool_use = false;
        for block in &self.blocks {
            match block {
                ContentBlock::Text { text } => {
                    chunks.push(StreamChunk::BlockStart {
                        index,
                        block: BlockStart::Text,
                    });
                    chunks.push(StreamChunk::text_delta(index, text.clone()));
                    chunks.push(StreamChunk::BlockStop { index });
                }
                ContentBlock::ToolUse {
                    id,
                    name,
                    arguments,
                } => {
                    saw_tool_use = true;
                    chunks.push(StreamChunk::BlockStart {
                        index,
                        block: BlockStart::ToolUse {
                            id: id.clone(),
                            name: name.clone(),
                        },
                    });
                    chunks.push(StreamChunk::tool_arguments_delta(
                        index,
                        arguments.to_string(),
                    ));
                    chunks.push(StreamChunk::BlockStop { index });
                }
                // Scripts only produce assistant output blocks.
                ContentBlock::Image { .. } | ContentBlock::ToolResult { .. } => {}
            }
            index += 1;
        }

        chunks.push(StreamChunk::MessageDelta {
            usage: Some(self.usage),
            stop_reason: Some(if saw_tool_use {
                StopReason::ToolUse
            } else {
                StopReason::EndTurn
            }),
        });
        chunks
    }
}

/// A provider that replays scripted responses in order.
///
/// When the script runs dry, calls fail with
/// [`ProviderError::InvalidRequest`] unless [`repeat_last`](Self::repeat_last)
/// is set, in which case the final response repeats forever.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    repeat_last: bool,
    capabilities: Capabilities,
}

impl ScriptedProvider {
    /// An empty script.
    #[must_use]
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            repeat_last: false,
            capabilities: Capabilities::default(),
        }
    }

    /// Append a response to the script.
    #[must_use]
    pub fn reply(self, response: ScriptedResponse) -> Self {
        self.responses
            .lock()
            .expect("script lock poisoned")
            .push_back(response);
        self
    }

    /// Keep replaying the last response once the script is exhausted.
    #[must_use]
    pub const fn repeat_last(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    /// Override the advertised capabilities.
    #[must_use]
    pub const fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    fn next_response(&self) -> Result<ScriptedResponse, ProviderError> {
        let mut responses = self.responses.lock().expect("script lock poisoned");
        if self.repeat_last && responses.len() == 1 {
            return responses
                .front()
                .cloned()
                .ok_or_else(|| ProviderError::InvalidRequest("script is empty".into()));
        }
        responses
            .pop_front()
            .ok_or_else(|| ProviderError::InvalidRequest("script exhausted".into()))
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn complete(
        &self,
        _messages: &[Message],
        _options: &ChatOptions,
    ) -> Result<Completion, ProviderError> {
        Ok(self.next_response()?.completion())
    }

    async fn stream(
        &self,
        _messages: &[Message],
        _options: &ChatOptions,
    ) -> Result<ChunkStream, ProviderError> {
        let chunks = self.next_response()?.chunks();
        Ok(Box::pin(async_stream::stream! {
            for chunk in chunks {
                yield Ok(chunk);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{BlockDelta, StreamAggregator};
    use futures::StreamExt as _;
    use serde_json::json;

    #[tokio::test]
    async fn replays_in_order() {
        let provider = ScriptedProvider::new()
            .reply(ScriptedResponse::tool_use("read_file", json!({"path": "x"})))
            .reply(ScriptedResponse::text("content is abc"));

        let first = provider
            .complete(&[], &ChatOptions::new())
            .await
            .expect("scripted");
        assert!(first.message.has_tool_use());

        let second = provider
            .complete(&[], &ChatOptions::new())
            .await
            .expect("scripted");
        assert_eq!(second.message.text().as_deref(), Some("content is abc"));

        let err = provider.complete(&[], &ChatOptions::new()).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn stream_round_trips_through_aggregator() {
        let provider = ScriptedProvider::new().reply(
            ScriptedResponse::new()
                .and_text("hello")
                .with_thinking("considering")
                .with_usage(Usage::new(3, 2)),
        );

        let mut stream = provider
            .stream(&[], &ChatOptions::new())
            .await
            .expect("scripted");
        let mut agg = StreamAggregator::new();
        let mut saw_thinking = false;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.expect("scripted chunks never fail");
            if matches!(
                chunk,
                StreamChunk::BlockDelta {
                    delta: BlockDelta::Thinking { .. },
                    ..
                }
            ) {
                saw_thinking = true;
            }
            agg.apply(&chunk);
        }

        assert!(saw_thinking);
        let completion = agg.into_completion();
        assert_eq!(completion.message.text().as_deref(), Some("hello"));
        assert_eq!(completion.usage, Usage::new(3, 2));
    }

    #[tokio::test]
    async fn repeat_last_never_exhausts() {
        let provider = ScriptedProvider::new()
            .reply(ScriptedResponse::tool_use("spin", json!({})))
            .repeat_last();

        for _ in 0..5 {
            let completion = provider
                .complete(&[], &ChatOptions::new())
                .await
                .expect("repeats");
            assert!(completion.message.has_tool_use());
        }
    }
}
