//! Agents: long-lived conversational actors.
//!
//! An [`Agent`] is a handle onto a running step loop. The handle accepts
//! user turns, resolves pending permission requests, exposes status and
//! history snapshots, and hands out event subscriptions. All execution
//! happens on the agent's own task; the handle never blocks on it except
//! in [`Agent::close`].

mod builder;
mod config;
mod runner;
mod state;

pub use builder::AgentBuilder;
pub use config::{AgentConfig, ToolsManualConfig, ToolsManualMode};
pub use state::{AgentState, AgentStatus};

pub(crate) use runner::{Command, Runner, Shared};

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, Result};
use crate::event::{Channel, EventBus, SubscribeOptions, Subscription};
use crate::inspect::{Inspector, PermissionReply};
use crate::message::{ContentBlock, Message};

/// A running agent.
///
/// Created through [`Agent::builder`] or the lifecycle manager
/// ([`Cosmos`](crate::cosmos::Cosmos)). Cheap to share: every method takes
/// `&self`.
pub struct Agent {
    shared: Arc<Shared>,
    config: AgentConfig,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    inspector: Arc<Inspector>,
    worker: Mutex<Option<JoinHandle<()>>>,
    recorder: Mutex<Option<JoinHandle<()>>>,
}

impl Agent {
    /// Create an agent builder.
    #[must_use]
    pub fn builder() -> AgentBuilder {
        AgentBuilder::new()
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        shared: Arc<Shared>,
        config: AgentConfig,
        commands: mpsc::Sender<Command>,
        cancel: CancellationToken,
        inspector: Arc<Inspector>,
        worker: JoinHandle<()>,
        recorder: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            shared,
            config,
            commands,
            cancel,
            inspector,
            worker: Mutex::new(Some(worker)),
            recorder: Mutex::new(recorder),
        }
    }

    /// The agent's id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    /// The agent's configuration.
    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// The agent's permission inspector.
    #[must_use]
    pub fn inspector(&self) -> &Arc<Inspector> {
        &self.inspector
    }

    /// The agent's event bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    /// Enqueue a plain-text user turn.
    ///
    /// # Errors
    ///
    /// [`CoreError::Closed`] when the agent has been shut down.
    pub async fn send(&self, text: impl Into<String>) -> Result<()> {
        self.send_message(Message::user(text)).await
    }

    /// Enqueue a user turn with multimodal content blocks.
    ///
    /// # Errors
    ///
    /// [`CoreError::Closed`] when the agent has been shut down.
    pub async fn send_content(&self, blocks: Vec<ContentBlock>) -> Result<()> {
        self.send_message(Message::user_blocks(blocks)).await
    }

    async fn send_message(&self, message: Message) -> Result<()> {
        if self.cancel.is_cancelled() || self.shared.state() == AgentState::Closed {
            return Err(CoreError::Closed);
        }
        self.commands
            .send(Command::Turn(message))
            .await
            .map_err(|_| CoreError::Closed)
    }

    /// Resolve a pending permission request by id.
    ///
    /// # Errors
    ///
    /// [`CoreError::Internal`] when no request with that id is pending.
    pub fn approve(&self, request_id: &str, reply: PermissionReply) -> Result<()> {
        let handle = self
            .shared
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(request_id)
            .ok_or_else(|| {
                CoreError::internal(format!("no pending permission request '{request_id}'"))
            })?;
        handle.respond(reply);
        Ok(())
    }

    /// Cancel the in-flight turn, if any. The agent stays usable.
    pub fn cancel(&self) {
        if let Some(token) = self
            .shared
            .turn_cancel
            .lock()
            .expect("turn cancel lock poisoned")
            .as_ref()
        {
            token.cancel();
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> AgentState {
        self.shared.state()
    }

    /// A point-in-time status snapshot.
    #[must_use]
    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            id: self.shared.id.clone(),
            state: self.shared.state(),
            steps: self.shared.steps.load(std::sync::atomic::Ordering::Relaxed),
            history_len: self.shared.history_len(),
        }
    }

    /// A copied snapshot of the conversation history.
    #[must_use]
    pub fn history(&self) -> Vec<Message> {
        self.shared.history_snapshot()
    }

    /// Subscribe to the given channels with default options.
    #[must_use]
    pub fn subscribe(&self, channels: impl IntoIterator<Item = Channel>) -> Subscription {
        self.shared.bus.subscribe(channels)
    }

    /// Subscribe with explicit options (filters, capacity).
    #[must_use]
    pub fn subscribe_with(&self, options: SubscribeOptions) -> Subscription {
        self.shared.bus.subscribe_with(options)
    }

    /// Shut the agent down: cancel any in-flight work, wait for the step
    /// loop to drain, and tear down every subscription. Idempotent.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature leaves room for drain failures.
    pub async fn close(&self) -> Result<()> {
        self.cancel.cancel();

        // Deny anything still waiting on a human so the loop can drain.
        let pending: Vec<_> = self
            .shared
            .pending
            .lock()
            .expect("pending lock poisoned")
            .drain()
            .collect();
        for (_, handle) in pending {
            handle.respond(PermissionReply::deny());
        }

        let worker = self.worker.lock().expect("worker lock poisoned").take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
        let recorder = self.recorder.lock().expect("recorder lock poisoned").take();
        if let Some(recorder) = recorder {
            let _ = recorder.await;
        }
        Ok(())
    }

    /// Whether the agent has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.state() == AgentState::Closed
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.shared.id)
            .field("state", &self.shared.state())
            .field("model", &self.config.model)
            .finish_non_exhaustive()
    }
}
