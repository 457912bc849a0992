//! Agent state machine.

use serde::{Deserialize, Serialize};

/// The finite states an agent moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentState {
    /// Idle, accepting user messages.
    Ready,
    /// An LLM call is in flight.
    Thinking,
    /// A tool is executing (or about to be gated).
    CallingTool,
    /// Suspended on a human permission decision.
    AwaitingApproval,
    /// The last turn failed; a new send resets to ready.
    Error,
    /// Shut down; terminal.
    Closed,
}

impl AgentState {
    /// Get the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Thinking => "thinking",
            Self::CallingTool => "calling-tool",
            Self::AwaitingApproval => "awaiting-approval",
            Self::Error => "error",
            Self::Closed => "closed",
        }
    }

    /// Whether the transition table permits `self → to`.
    ///
    /// Any state may move to `Error` or `Closed`; `Closed` is terminal.
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        if matches!(self, Self::Closed) {
            return false;
        }
        match (self, to) {
            (_, Self::Error | Self::Closed) => true,
            (Self::Ready, Self::Thinking) => true,
            (Self::Thinking, Self::CallingTool | Self::Ready) => true,
            (Self::CallingTool, Self::AwaitingApproval | Self::Thinking) => true,
            (Self::AwaitingApproval, Self::CallingTool | Self::Thinking) => true,
            (Self::Error, Self::Ready) => true,
            _ => false,
        }
    }

    /// Whether this state is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A point-in-time view of an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    /// The agent id.
    pub id: String,
    /// Current state.
    pub state: AgentState,
    /// Monotonic step counter across all turns.
    pub steps: u64,
    /// Number of messages in the history.
    pub history_len: usize,
}
