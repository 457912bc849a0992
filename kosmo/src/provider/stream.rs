//! Streaming chunk types and aggregation.
//!
//! A stream is a finite, ordered sequence of [`StreamChunk`]s: block
//! starts, deltas, stops, and a trailing message delta carrying usage.
//! [`StreamAggregator`] folds the chunks back into a [`Completion`] once
//! the stream ends.

use std::collections::BTreeMap;
use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{ContentBlock, Message, Role};
use crate::usage::Usage;

use super::Completion;

/// A boxed stream of chunks, as returned by providers.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// Reason why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of the response.
    #[default]
    EndTurn,
    /// Output token cap reached.
    MaxTokens,
    /// The model called tools.
    ToolUse,
}

/// The opening of a content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockStart {
    /// A text block begins.
    Text,
    /// A reasoning block begins.
    Thinking,
    /// A tool-use block begins.
    ToolUse {
        /// The invocation id.
        id: String,
        /// The tool name.
        name: String,
    },
}

/// An incremental update to an open content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    /// Text appended to a text block.
    Text {
        /// The delta.
        text: String,
    },
    /// Text appended to a reasoning block.
    Thinking {
        /// The delta.
        text: String,
    },
    /// Partial JSON appended to a tool-use block's arguments.
    ToolArguments {
        /// The partial JSON fragment.
        partial_json: String,
    },
}

/// One chunk of a streamed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[non_exhaustive]
pub enum StreamChunk {
    /// A content block opened.
    BlockStart {
        /// Block index within the message.
        index: usize,
        /// What kind of block.
        block: BlockStart,
    },
    /// A content block grew.
    BlockDelta {
        /// Block index within the message.
        index: usize,
        /// The increment.
        delta: BlockDelta,
    },
    /// A content block closed.
    BlockStop {
        /// Block index within the message.
        index: usize,
    },
    /// Message-level trailer.
    MessageDelta {
        /// Usage totals, when the vendor reports them.
        usage: Option<Usage>,
        /// Why generation stopped.
        stop_reason: Option<StopReason>,
    },
}

impl StreamChunk {
    /// A text delta chunk.
    #[must_use]
    pub fn text_delta(index: usize, text: impl Into<String>) -> Self {
        Self::BlockDelta {
            index,
            delta: BlockDelta::Text { text: text.into() },
        }
    }

    /// A thinking delta chunk.
    #[must_use]
    pub fn thinking_delta(index: usize, text: impl Into<String>) -> Self {
        Self::BlockDelta {
            index,
            delta: BlockDelta::Thinking { text: text.into() },
        }
    }

    /// A tool-arguments delta chunk.
    #[must_use]
    pub fn tool_arguments_delta(index: usize, partial_json: impl Into<String>) -> Self {
        Self::BlockDelta {
            index,
            delta: BlockDelta::ToolArguments {
                partial_json: partial_json.into(),
            },
        }
    }
}

#[derive(Debug, Clone)]
enum BlockBuilder {
    Text(String),
    Thinking(String),
    ToolUse {
        id: String,
        name: String,
        arguments: String,
    },
}

/// Folds stream chunks into a complete assistant message.
#[derive(Debug, Clone, Default)]
pub struct StreamAggregator {
    blocks: BTreeMap<usize, BlockBuilder>,
    usage: Usage,
    stop_reason: Option<StopReason>,
}

impl StreamAggregator {
    /// Create an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one chunk.
    pub fn apply(&mut self, chunk: &StreamChunk) {
        match chunk {
            StreamChunk::BlockStart { index, block } => {
                let builder = match block {
                    BlockStart::Text => BlockBuilder::Text(String::new()),
                    BlockStart::Thinking => BlockBuilder::Thinking(String::new()),
                    BlockStart::ToolUse { id, name } => BlockBuilder::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: String::new(),
                    },
                };
                self.blocks.insert(*index, builder);
            }
            StreamChunk::BlockDelta { index, delta } => {
                let builder = self
                    .blocks
                    .entry(*index)
                    .or_insert_with(|| BlockBuilder::Text(String::new()));
                match (builder, delta) {
                    (BlockBuilder::Text(buf), BlockDelta::Text { text })
                    | (BlockBuilder::Thinking(buf), BlockDelta::Thinking { text }) => {
                        buf.push_str(text);
                    }
                    (
                        BlockBuilder::ToolUse { arguments, .. },
                        BlockDelta::ToolArguments { partial_json },
                    ) => {
                        arguments.push_str(partial_json);
                    }
                    // Mismatched delta kind for the open block; drop it.
                    _ => {}
                }
            }
            StreamChunk::BlockStop { .. } => {}
            StreamChunk::MessageDelta { usage, stop_reason } => {
                if let Some(usage) = usage {
                    self.usage += *usage;
                }
                if stop_reason.is_some() {
                    self.stop_reason = *stop_reason;
                }
            }
        }
    }

    /// The stop reason, if one arrived.
    #[must_use]
    pub const fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Build the final completion. Thinking blocks are not part of the
    /// conversation history and are dropped here; consumers observe them
    /// as `think-chunk` events while streaming.
    #[must_use]
    pub fn into_completion(self) -> Completion {
        let mut content = Vec::with_capacity(self.blocks.len());
        for (_, builder) in self.blocks {
            match builder {
                BlockBuilder::Text(text) => {
                    if !text.is_empty() {
                        content.push(ContentBlock::Text { text });
                    }
                }
                BlockBuilder::Thinking(_) => {}
                BlockBuilder::ToolUse {
                    id,
                    name,
                    arguments,
                } => {
                    let parsed = if arguments.trim().is_empty() {
                        serde_json::Value::Object(serde_json::Map::new())
                    } else {
                        serde_json::from_str(&arguments)
                            .unwrap_or(serde_json::Value::String(arguments))
                    };
                    content.push(ContentBlock::ToolUse {
                        id,
                        name,
                        arguments: parsed,
                    });
                }
            }
        }

        Completion {
            message: Message::new(Role::Assistant, content),
            usage: self.usage,
        }
    }
}
