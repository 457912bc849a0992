//! Prelude module for convenient imports.
//!
//! Re-exports the most commonly used types and traits so you can get
//! started with a single `use` statement.
//!
//! ```rust,ignore
//! use kosmo::prelude::*;
//!
//! let config = AgentConfig::new("assistant", "test-model")
//!     .instructions("You are helpful.")
//!     .max_steps(20);
//! ```

pub use crate::agent::{
    Agent, AgentBuilder, AgentConfig, AgentState, AgentStatus, ToolsManualConfig, ToolsManualMode,
};
pub use crate::cosmos::{Cosmos, CosmosBuilder};
pub use crate::error::{CoreError, ProviderError, Result, StoreError, ToolError};
pub use crate::event::{
    Channel, Event, EventBus, Payload, ReplyHandle, SubscribeOptions, Subscription,
};
pub use crate::inspect::{
    ApprovalDecision, CheckOutcome, Condition, ConditionOp, Inspector, PermissionMode,
    PermissionReply, PermissionRule, RuleDecision, RuleStore,
};
pub use crate::message::{ContentBlock, ImageSource, Message, Role};
pub use crate::prompt::{PromptBuilder, PromptContext, PromptModule};
pub use crate::provider::{
    Capabilities, ChatOptions, ChunkStream, Completion, Provider, ProviderFacade, RetryPolicy,
    ScriptedProvider, ScriptedResponse, StopReason, StreamAggregator, StreamChunk, ToolFormat,
};
pub use crate::sandbox::{ExecOptions, ExecResult, Sandbox, SandboxError, SandboxFs};
pub use crate::session::{
    CreateSessionRequest, EventFilter, ListSessionsRequest, MemorySessions, SessionRecord,
    SessionService, UpdateSessionRequest,
};
pub use crate::store::{AgentSnapshot, MemoryStore, Store};
pub use crate::tool::{
    BoxedTool, Dispatcher, DynTool, RiskLevel, ServiceMap, Tool, ToolCallRecord, ToolContext,
    ToolDefinition, ToolOutcome, ToolRegistry,
};
pub use crate::usage::Usage;
