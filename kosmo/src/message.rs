//! Message types for the conversation history.
//!
//! A [`Message`] pairs a [`Role`] with an ordered sequence of typed
//! [`ContentBlock`]s. History is append-only within a turn; the step loop
//! is the only writer, and readers obtain copied snapshots.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// Tool results fed back to the model.
    Tool,
}

impl Role {
    /// Get the string representation of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of an image content block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ImageSource {
    /// Image referenced by URL.
    Url {
        /// The image URL.
        url: String,
    },
    /// Inline base64-encoded image data.
    Inline {
        /// Base64-encoded bytes.
        data: String,
        /// MIME type (e.g. `image/png`).
        media_type: String,
    },
}

/// One typed block within a message's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },

    /// An image, by URL or inline data.
    Image {
        /// Where the image bytes live.
        source: ImageSource,
    },

    /// A tool invocation requested by the model.
    ToolUse {
        /// Per-invocation unique id.
        id: String,
        /// Name of the tool to invoke.
        name: String,
        /// Argument mapping.
        arguments: Value,
    },

    /// The result of a tool invocation.
    ToolResult {
        /// Id of the originating tool-use block.
        tool_use_id: String,
        /// Result payload.
        content: Value,
        /// Whether the tool failed.
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    /// Create a text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create an image block referencing a URL.
    #[must_use]
    pub fn image_url(url: impl Into<String>) -> Self {
        Self::Image {
            source: ImageSource::Url { url: url.into() },
        }
    }

    /// Create a tool-use block.
    #[must_use]
    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Create a tool-result block.
    #[must_use]
    pub fn tool_result(tool_use_id: impl Into<String>, content: Value, is_error: bool) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content,
            is_error,
        }
    }

    /// Get the text if this is a text block.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Returns `true` if this is a tool-use block.
    #[must_use]
    pub const fn is_tool_use(&self) -> bool {
        matches!(self, Self::ToolUse { .. })
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced the message.
    pub role: Role,
    /// Ordered content blocks.
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// Create a message with the given role and blocks.
    #[must_use]
    pub const fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    /// Create a system message from plain text.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentBlock::text(text)])
    }

    /// Create a user message from plain text.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentBlock::text(text)])
    }

    /// Create a user message from content blocks.
    #[must_use]
    pub const fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self::new(Role::User, blocks)
    }

    /// Create an assistant message from plain text.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentBlock::text(text)])
    }

    /// Create a tool message carrying one tool-result block.
    #[must_use]
    pub fn tool_result(tool_use_id: impl Into<String>, content: Value, is_error: bool) -> Self {
        Self::new(
            Role::Tool,
            vec![ContentBlock::tool_result(tool_use_id, content, is_error)],
        )
    }

    /// Joined text of all text blocks, or `None` if there are none.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }

    /// Iterate over the tool-use blocks in this message.
    pub fn tool_uses(&self) -> impl Iterator<Item = &ContentBlock> {
        self.content.iter().filter(|b| b.is_tool_use())
    }

    /// Returns `true` if any block is a tool-use.
    #[must_use]
    pub fn has_tool_use(&self) -> bool {
        self.content.iter().any(ContentBlock::is_tool_use)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn constructors_set_roles() {
        assert_eq!(Message::system("s").role, Role::System);
        assert_eq!(Message::user("u").role, Role::User);
        assert_eq!(Message::assistant("a").role, Role::Assistant);
        assert_eq!(Message::tool_result("t1", json!("ok"), false).role, Role::Tool);
    }

    #[test]
    fn text_joins_blocks() {
        let msg = Message::new(
            Role::Assistant,
            vec![
                ContentBlock::text("one"),
                ContentBlock::tool_use("t1", "read", json!({})),
                ContentBlock::text("two"),
            ],
        );
        assert_eq!(msg.text().as_deref(), Some("one\ntwo"));
        assert!(msg.has_tool_use());
        assert_eq!(msg.tool_uses().count(), 1);
    }

    #[test]
    fn round_trips_through_json() {
        let msg = Message::new(
            Role::Assistant,
            vec![
                ContentBlock::tool_use("t1", "shell", json!({"cmd": "ls"})),
                ContentBlock::tool_result("t1", json!("dir listing"), false),
            ],
        );
        let raw = serde_json::to_string(&msg).expect("serialize");
        let back: Message = serde_json::from_str(&raw).expect("deserialize");
        assert_eq!(back, msg);
    }
}
