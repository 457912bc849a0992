//! Event envelopes and the per-agent publish/subscribe bus.
//!
//! Every observable thing an agent does becomes an [`Event`] on one of
//! three channels: `progress` for streaming UI, `control` for
//! human-in-the-loop decisions, `monitor` for telemetry and audit. Any
//! number of subscribers attach with independent filters and bounded
//! queues; a slow subscriber can never stall the step loop.

mod bus;

pub use bus::{DEFAULT_QUEUE_CAPACITY, EventBus, SubscribeOptions, Subscription};

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use tokio::sync::oneshot;

use crate::agent::AgentState;
use crate::inspect::{ApprovalDecision, PermissionReply};
use crate::tool::ToolCallRecord;
use crate::usage::Usage;

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// The three event channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Streaming UI: deltas, tool progress, turn completion.
    Progress,
    /// Human-in-the-loop: permission requests and decisions.
    Control,
    /// Telemetry and audit: usage, durations, state changes, errors.
    Monitor,
}

impl Channel {
    /// All three channels.
    pub const ALL: [Self; 3] = [Self::Progress, Self::Control, Self::Monitor];

    /// Get the string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Control => "control",
            Self::Monitor => "monitor",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A shareable handle to a one-shot permission reply channel.
///
/// The handle is cloned into every subscriber that receives the
/// `permission-required` event, but the underlying sender is take-once:
/// the first [`respond`](Self::respond) wins and later calls are no-ops.
#[derive(Clone)]
pub struct ReplyHandle {
    tx: Arc<Mutex<Option<oneshot::Sender<PermissionReply>>>>,
}

impl ReplyHandle {
    /// Create a handle and the receiver the step loop waits on.
    #[must_use]
    pub(crate) fn channel() -> (Self, oneshot::Receiver<PermissionReply>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Deliver a decision. Returns `false` if a decision was already
    /// delivered or the waiter has gone away.
    pub fn respond(&self, reply: PermissionReply) -> bool {
        let sender = self.tx.lock().expect("reply lock poisoned").take();
        match sender {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// Whether a decision has already been delivered.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.tx.lock().expect("reply lock poisoned").is_none()
    }
}

impl std::fmt::Debug for ReplyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyHandle")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Typed event payloads, one family per channel.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Payload {
    // --- progress ---
    /// Incremental assistant text.
    TextChunk {
        /// The text delta.
        delta: String,
    },
    /// Incremental reasoning text.
    ThinkChunk {
        /// The reasoning delta.
        delta: String,
    },
    /// A tool call is about to run (or be gated).
    ToolStart {
        /// The call record.
        call: ToolCallRecord,
    },
    /// A tool call finished, with its outcome filled in.
    ToolEnd {
        /// The completed call record.
        call: ToolCallRecord,
    },
    /// The turn ended.
    Done,

    // --- control ---
    /// A tool call needs a human decision.
    PermissionRequired {
        /// Id to pass back through `approve`.
        request_id: String,
        /// The gated call.
        call: ToolCallRecord,
        /// One-shot reply channel.
        reply: ReplyHandle,
    },
    /// A pending permission request was decided.
    PermissionDecided {
        /// The request that was decided.
        request_id: String,
        /// The decision.
        decision: ApprovalDecision,
    },

    // --- monitor ---
    /// Token usage for one LLM call.
    TokenUsage {
        /// Input/output token counts.
        usage: Usage,
    },
    /// A tool executed, with timing.
    ToolExecuted {
        /// Tool name.
        name: String,
        /// Wall-clock duration.
        duration_ms: u64,
        /// Whether it succeeded.
        ok: bool,
    },
    /// The agent transitioned state.
    StateChanged {
        /// Previous state.
        from: AgentState,
        /// New state.
        to: AgentState,
    },
    /// A failure, classified by kind.
    Error {
        /// Stable kind tag (see `CoreError::kind`).
        kind: &'static str,
        /// Human-readable message.
        message: String,
    },
    /// One generation↔tools iteration completed.
    StepComplete {
        /// Step number within the turn, starting at 1.
        step: u32,
    },
    /// An in-flight turn was cancelled.
    Cancelled,
}

impl Payload {
    /// The channel this payload travels on.
    #[must_use]
    pub const fn channel(&self) -> Channel {
        match self {
            Self::TextChunk { .. }
            | Self::ThinkChunk { .. }
            | Self::ToolStart { .. }
            | Self::ToolEnd { .. }
            | Self::Done => Channel::Progress,
            Self::PermissionRequired { .. } | Self::PermissionDecided { .. } => Channel::Control,
            Self::TokenUsage { .. }
            | Self::ToolExecuted { .. }
            | Self::StateChanged { .. }
            | Self::Error { .. }
            | Self::StepComplete { .. }
            | Self::Cancelled => Channel::Monitor,
        }
    }

    /// The event-type tag used by subscription filters.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::TextChunk { .. } => "text-chunk",
            Self::ThinkChunk { .. } => "think-chunk",
            Self::ToolStart { .. } => "tool-start",
            Self::ToolEnd { .. } => "tool-end",
            Self::Done => "done",
            Self::PermissionRequired { .. } => "permission-required",
            Self::PermissionDecided { .. } => "permission-decided",
            Self::TokenUsage { .. } => "token-usage",
            Self::ToolExecuted { .. } => "tool-executed",
            Self::StateChanged { .. } => "state-changed",
            Self::Error { .. } => "error",
            Self::StepComplete { .. } => "step-complete",
            Self::Cancelled => "cancelled",
        }
    }

    /// Serializable view of the payload with reply channels elided.
    #[must_use]
    pub fn to_record(&self) -> Value {
        match self {
            Self::TextChunk { delta } | Self::ThinkChunk { delta } => json!({ "delta": delta }),
            Self::ToolStart { call } | Self::ToolEnd { call } => {
                json!({ "call": call })
            }
            Self::Done | Self::Cancelled => Value::Null,
            Self::PermissionRequired {
                request_id, call, ..
            } => json!({ "request_id": request_id, "call": call }),
            Self::PermissionDecided {
                request_id,
                decision,
            } => json!({ "request_id": request_id, "decision": decision }),
            Self::TokenUsage { usage } => json!({ "usage": usage }),
            Self::ToolExecuted {
                name,
                duration_ms,
                ok,
            } => json!({ "name": name, "duration_ms": duration_ms, "ok": ok }),
            Self::StateChanged { from, to } => json!({ "from": from, "to": to }),
            Self::Error { kind, message } => json!({ "kind": kind, "message": message }),
            Self::StepComplete { step } => json!({ "step": step }),
        }
    }
}

/// An event envelope: who, where, when, what.
#[derive(Debug, Clone)]
pub struct Event {
    /// Id of the owning agent.
    pub agent_id: String,
    /// Strictly increasing per-agent sequence number.
    pub seq: u64,
    /// Wall-clock timestamp in ms since epoch.
    pub timestamp_ms: u64,
    /// The typed payload.
    pub payload: Payload,
}

impl Event {
    /// The channel this event travels on.
    #[must_use]
    pub const fn channel(&self) -> Channel {
        self.payload.channel()
    }

    /// The event-type tag.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    /// Serializable record of the whole envelope, suitable for session
    /// storage. Reply channels are elided.
    #[must_use]
    pub fn to_record(&self) -> Value {
        json!({
            "agent_id": self.agent_id,
            "channel": self.channel().as_str(),
            "type": self.event_type(),
            "seq": self.seq,
            "timestamp_ms": self.timestamp_ms,
            "payload": self.payload.to_record(),
        })
    }
}
