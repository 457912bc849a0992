//! The step loop: the execution engine behind every agent.
//!
//! One runner task per agent. It owns the conversation history, drives
//! generation↔tool cycles, gates tool calls through the inspector, and
//! publishes everything observable onto the agent's event bus. Turns are
//! serialized through a command queue; nothing else ever mutates agent
//! state.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Instant;

use futures::StreamExt as _;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::agent::{AgentConfig, AgentState};
use crate::error::{CoreError, Result, ToolError};
use crate::event::{EventBus, Payload, ReplyHandle, now_ms};
use crate::inspect::{ApprovalDecision, CheckOutcome, Inspector, PermissionReply};
use crate::message::{ContentBlock, Message};
use crate::provider::{BlockDelta, ChatOptions, Completion, ProviderFacade, StreamAggregator, StreamChunk};
use crate::sandbox::Sandbox;
use crate::store::{AgentSnapshot, Store};
use crate::tool::{Dispatcher, ServiceMap, ToolCallRecord, ToolContext, ToolOutcome};

use std::sync::Arc;

/// Bounded retry count for transient store failures.
const STORE_RETRIES: u32 = 3;

/// Commands accepted by the runner task.
pub(crate) enum Command {
    /// Run one user turn.
    Turn(Message),
}

/// State shared between the [`Agent`](super::Agent) handle and its runner.
///
/// The history and state are written only by the runner; the handle reads
/// copied snapshots.
pub(crate) struct Shared {
    pub(crate) id: String,
    pub(crate) bus: EventBus,
    pub(crate) state: RwLock<AgentState>,
    pub(crate) steps: AtomicU64,
    pub(crate) history: RwLock<Vec<Message>>,
    pub(crate) pending: Mutex<HashMap<String, ReplyHandle>>,
    pub(crate) turn_cancel: Mutex<Option<CancellationToken>>,
}

impl Shared {
    pub(crate) fn new(id: impl Into<String>, bus: EventBus, history: Vec<Message>) -> Self {
        Self {
            id: id.into(),
            bus,
            state: RwLock::new(AgentState::Ready),
            steps: AtomicU64::new(0),
            history: RwLock::new(history),
            pending: Mutex::new(HashMap::new()),
            turn_cancel: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> AgentState {
        *self.state.read().expect("state lock poisoned")
    }

    /// Apply a validated state transition and publish `state-changed`.
    pub(crate) fn set_state(&self, to: AgentState) {
        let from = {
            let mut state = self.state.write().expect("state lock poisoned");
            let from = *state;
            if from == to {
                return;
            }
            if !from.can_transition(to) {
                warn!(agent = %self.id, %from, %to, "refusing invalid state transition");
                return;
            }
            *state = to;
            from
        };
        self.bus.publish(Payload::StateChanged { from, to });
    }

    pub(crate) fn history_snapshot(&self) -> Vec<Message> {
        self.history.read().expect("history lock poisoned").clone()
    }

    pub(crate) fn history_len(&self) -> usize {
        self.history.read().expect("history lock poisoned").len()
    }
}

fn tool_error_kind(err: &ToolError) -> &'static str {
    match err {
        ToolError::NotFound(_) => "unknown-tool",
        ToolError::Timeout(_) => "timeout",
        ToolError::Cancelled => "cancelled",
        ToolError::InvalidArguments(_) | ToolError::Execution(_) => "tool",
    }
}

/// The per-agent execution engine.
pub(crate) struct Runner {
    pub(crate) shared: Arc<Shared>,
    pub(crate) config: AgentConfig,
    pub(crate) provider: ProviderFacade,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) inspector: Arc<Inspector>,
    pub(crate) store: Option<Arc<dyn Store>>,
    pub(crate) sandbox: Option<Arc<dyn Sandbox>>,
    pub(crate) services: ServiceMap,
    pub(crate) system_prompt: String,
    pub(crate) cancel: CancellationToken,
    pub(crate) commands: mpsc::Receiver<Command>,
}

impl Runner {
    /// Run until the agent is closed or the command queue is dropped.
    pub(crate) async fn run(mut self) {
        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    None => break,
                    Some(Command::Turn(message)) => self.run_turn(message).await,
                },
            }
        }
        self.finish();
    }

    /// Terminal cleanup: transition to closed and tear down the bus.
    fn finish(&self) {
        self.shared.set_state(AgentState::Closed);
        self.shared.bus.close();
    }

    async fn run_turn(&self, user: Message) {
        // A failed agent resets when its next turn is accepted.
        if self.shared.state() == AgentState::Error {
            self.shared.set_state(AgentState::Ready);
        }

        let turn = self.cancel.child_token();
        *self
            .shared
            .turn_cancel
            .lock()
            .expect("turn cancel lock poisoned") = Some(turn.clone());

        let span = info_span!(
            "turn",
            agent.id = %self.shared.id,
            agent.model = %self.config.model,
        );
        let result = self.turn_inner(user, &turn).instrument(span).await;

        self.shared
            .turn_cancel
            .lock()
            .expect("turn cancel lock poisoned")
            .take();

        match result {
            Ok(()) => {}
            Err(CoreError::Cancelled) => {
                self.shared.bus.publish(Payload::Cancelled);
                if !self.cancel.is_cancelled() {
                    // Turn-level cancel: close dangling tool-use blocks and
                    // return to service. Agent-level close is handled by
                    // finish() once the command loop exits.
                    self.close_open_tool_uses("cancelled").await;
                    self.shared.bus.publish(Payload::Done);
                    self.shared.set_state(AgentState::Ready);
                }
            }
            Err(err) => {
                error!(agent = %self.shared.id, error = %err, kind = err.kind(), "turn failed");
                self.close_open_tool_uses(err.kind()).await;
                self.shared.bus.publish(Payload::Error {
                    kind: err.kind(),
                    message: err.to_string(),
                });
                self.shared.set_state(AgentState::Error);
                self.shared.bus.publish(Payload::Done);
            }
        }

        self.save_snapshot().await;
    }

    async fn turn_inner(&self, user: Message, turn: &CancellationToken) -> Result<()> {
        self.append_message(user).await;
        self.shared.set_state(AgentState::Thinking);

        let mut step: u32 = 0;
        loop {
            if turn.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            if step >= self.config.max_steps {
                return Err(CoreError::IterationLimit {
                    steps: step,
                    max_steps: self.config.max_steps,
                });
            }
            step += 1;
            self.shared.steps.fetch_add(1, Ordering::Relaxed);
            debug!(agent = %self.shared.id, step, "starting step");

            let assistant = self.generate(turn).await?;
            self.append_message(assistant.clone()).await;

            let tool_uses: Vec<ContentBlock> = assistant.tool_uses().cloned().collect();
            if tool_uses.is_empty() {
                self.shared.set_state(AgentState::Ready);
                self.shared.bus.publish(Payload::StepComplete { step });
                self.shared.bus.publish(Payload::Done);
                return Ok(());
            }

            for block in &tool_uses {
                self.run_tool(block, turn).await?;
            }
            self.shared.bus.publish(Payload::StepComplete { step });
            self.shared.set_state(AgentState::Thinking);
        }
    }

    /// One LLM call: stream chunks into progress events and fold them
    /// into the assistant message.
    async fn generate(&self, turn: &CancellationToken) -> Result<Message> {
        let history = self.shared.history_snapshot();
        let options = ChatOptions {
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            system: (!self.system_prompt.is_empty()).then(|| self.system_prompt.clone()),
            tools: self.dispatcher.registry().definitions(),
        };

        let bus = &self.shared.bus;
        let work = async {
            if self.provider.capabilities().streaming {
                let mut stream = self.provider.stream(&history, &options).await?;
                let mut aggregator = StreamAggregator::new();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk?;
                    match &chunk {
                        StreamChunk::BlockDelta {
                            delta: BlockDelta::Text { text },
                            ..
                        } => bus.publish(Payload::TextChunk {
                            delta: text.clone(),
                        }),
                        StreamChunk::BlockDelta {
                            delta: BlockDelta::Thinking { text },
                            ..
                        } => bus.publish(Payload::ThinkChunk {
                            delta: text.clone(),
                        }),
                        _ => {}
                    }
                    aggregator.apply(&chunk);
                }
                Ok::<Completion, CoreError>(aggregator.into_completion())
            } else {
                let completion = self.provider.complete(&history, &options).await?;
                if let Some(text) = completion.message.text() {
                    bus.publish(Payload::TextChunk { delta: text });
                }
                Ok(completion)
            }
        };

        let completion = tokio::select! {
            () = turn.cancelled() => return Err(CoreError::Cancelled),
            outcome = tokio::time::timeout(self.config.llm_timeout, work) => match outcome {
                Ok(result) => result?,
                Err(_) => {
                    return Err(CoreError::Timeout(format!(
                        "LLM call exceeded {}ms",
                        self.config.llm_timeout.as_millis()
                    )));
                }
            },
        };

        if !completion.usage.is_zero() {
            bus.publish(Payload::TokenUsage {
                usage: completion.usage,
            });
        }
        Ok(completion.message)
    }

    /// Process one tool-use block: permission check, optional approval
    /// wait, execution, result append.
    async fn run_tool(&self, block: &ContentBlock, turn: &CancellationToken) -> Result<()> {
        let ContentBlock::ToolUse {
            id,
            name,
            arguments,
        } = block
        else {
            return Ok(());
        };
        let mut record = ToolCallRecord::with_id(id.clone(), name.clone(), arguments.clone());

        self.shared.set_state(AgentState::CallingTool);
        self.shared.bus.publish(Payload::ToolStart {
            call: record.clone(),
        });

        let declared_risk = self
            .dispatcher
            .registry()
            .get(name)
            .and_then(|tool| tool.risk());

        let approved = match self.inspector.check(&record, declared_risk) {
            CheckOutcome::Allow => {
                record.decision = Some(ApprovalDecision::Allow);
                true
            }
            CheckOutcome::Deny { reason } => {
                record.decision = Some(ApprovalDecision::Deny);
                self.finish_denied(&mut record, &reason).await;
                false
            }
            CheckOutcome::Require { reason } => {
                self.await_approval(&mut record, &reason, turn).await?
            }
        };

        if approved {
            self.execute_tool(&mut record, turn).await?;
        }
        self.shared.set_state(AgentState::Thinking);
        Ok(())
    }

    /// Suspend on a human decision delivered through the control channel.
    async fn await_approval(
        &self,
        record: &mut ToolCallRecord,
        reason: &str,
        turn: &CancellationToken,
    ) -> Result<bool> {
        debug!(agent = %self.shared.id, tool = %record.name, reason, "approval required");
        self.shared.set_state(AgentState::AwaitingApproval);

        let (reply_handle, reply_rx) = ReplyHandle::channel();
        let request_id = uuid::Uuid::new_v4().to_string();
        self.shared
            .pending
            .lock()
            .expect("pending lock poisoned")
            .insert(request_id.clone(), reply_handle.clone());
        self.shared.bus.publish(Payload::PermissionRequired {
            request_id: request_id.clone(),
            call: record.clone(),
            reply: reply_handle,
        });

        let wait = async {
            match self.config.approval_timeout {
                Some(limit) => tokio::time::timeout(limit, reply_rx)
                    .await
                    .ok()
                    .and_then(std::result::Result::ok),
                None => reply_rx.await.ok(),
            }
        };
        let reply = tokio::select! {
            () = turn.cancelled() => {
                self.shared
                    .pending
                    .lock()
                    .expect("pending lock poisoned")
                    .remove(&request_id);
                return Err(CoreError::Cancelled);
            }
            reply = wait => reply,
        };
        self.shared
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(&request_id);

        // A dropped reply channel or an elapsed deadline denies.
        let reply = reply.unwrap_or_else(PermissionReply::deny);
        self.shared.bus.publish(Payload::PermissionDecided {
            request_id,
            decision: reply.decision,
        });
        if reply.remember {
            self.inspector.remember(record, reply.decision);
        }

        match reply.decision {
            ApprovalDecision::Allow => {
                record.decision = Some(ApprovalDecision::Allow);
                Ok(true)
            }
            ApprovalDecision::Deny => {
                record.decision = Some(ApprovalDecision::Deny);
                let reason = reply
                    .note
                    .clone()
                    .unwrap_or_else(|| "refused by user".to_owned());
                self.finish_denied(record, &reason).await;
                Ok(false)
            }
        }
    }

    /// Close out a denied call: error result block, tool-end, monitor error.
    async fn finish_denied(&self, record: &mut ToolCallRecord, reason: &str) {
        let message = format!("Tool '{}' was denied: {reason}", record.name);
        record.ended_at_ms = Some(now_ms());
        record.outcome = Some(ToolOutcome::error(message.clone()));

        self.append_message(Message::tool_result(
            &record.id,
            Value::String(message.clone()),
            true,
        ))
        .await;
        self.shared.bus.publish(Payload::ToolEnd {
            call: record.clone(),
        });
        self.shared.bus.publish(Payload::Error {
            kind: "permission-denied",
            message,
        });
    }

    /// Dispatch an approved call and record its outcome.
    async fn execute_tool(
        &self,
        record: &mut ToolCallRecord,
        turn: &CancellationToken,
    ) -> Result<()> {
        self.shared.set_state(AgentState::CallingTool);
        record.started_at_ms = Some(now_ms());

        let ctx = ToolContext {
            agent_id: self.shared.id.clone(),
            sandbox: self.sandbox.clone(),
            cancel: turn.child_token(),
            services: self.services.clone(),
        };

        let started = Instant::now();
        let result = self.dispatcher.dispatch(record, &ctx).await;
        record.ended_at_ms = Some(now_ms());
        let duration_ms = started.elapsed().as_millis() as u64;

        let (outcome, failure) = match result {
            Ok(value) => (ToolOutcome::ok(value), None),
            Err(ToolError::Cancelled) => {
                // Close the block so history stays consistent, then let the
                // turn unwind as cancelled.
                let outcome = ToolOutcome::error(format!("Tool '{}' was cancelled", record.name));
                record.outcome = Some(outcome.clone());
                self.append_message(Message::tool_result(&record.id, outcome.content, true))
                    .await;
                self.shared.bus.publish(Payload::ToolEnd {
                    call: record.clone(),
                });
                return Err(CoreError::Cancelled);
            }
            Err(err) => {
                let kind = tool_error_kind(&err);
                (ToolOutcome::error(err.to_string()), Some((kind, err.to_string())))
            }
        };

        record.outcome = Some(outcome.clone());
        self.append_message(Message::tool_result(
            &record.id,
            outcome.content.clone(),
            outcome.is_error,
        ))
        .await;
        self.shared.bus.publish(Payload::ToolEnd {
            call: record.clone(),
        });
        self.shared.bus.publish(Payload::ToolExecuted {
            name: record.name.clone(),
            duration_ms,
            ok: !outcome.is_error,
        });
        if let Some((kind, message)) = failure {
            self.shared.bus.publish(Payload::Error { kind, message });
        }
        Ok(())
    }

    /// Append to history and persist, retrying transient store failures a
    /// bounded number of times before surfacing a `monitor:error`.
    async fn append_message(&self, message: Message) {
        {
            let mut history = self.shared.history.write().expect("history lock poisoned");
            history.push(message.clone());
        }

        let Some(store) = &self.store else {
            return;
        };
        let mut attempts: u32 = 0;
        loop {
            match store.append_message(&self.shared.id, &message).await {
                Ok(()) => return,
                Err(err) if err.is_transient() && attempts < STORE_RETRIES => {
                    attempts += 1;
                    tokio::time::sleep(std::time::Duration::from_millis(
                        50 * u64::from(attempts),
                    ))
                    .await;
                }
                Err(err) => {
                    warn!(agent = %self.shared.id, error = %err, "message persistence failed");
                    self.shared.bus.publish(Payload::Error {
                        kind: "store",
                        message: err.to_string(),
                    });
                    return;
                }
            }
        }
    }

    /// Persist a full snapshot at turn boundaries. Non-fatal.
    async fn save_snapshot(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let snapshot = AgentSnapshot {
            messages: self.shared.history_snapshot(),
            sequence: self.shared.bus.next_seq(),
            state: self.shared.state(),
        };
        let Ok(blob) = serde_json::to_value(&snapshot) else {
            return;
        };
        if let Err(err) = store.save_snapshot(&self.shared.id, &blob).await {
            warn!(agent = %self.shared.id, error = %err, "snapshot persistence failed");
            self.shared.bus.publish(Payload::Error {
                kind: "store",
                message: err.to_string(),
            });
        }
    }

    /// Append error results for any tool-use block that never got one, so
    /// a failed turn leaves the history consistent.
    async fn close_open_tool_uses(&self, kind: &str) {
        let open: Vec<String> = {
            let history = self.shared.history.read().expect("history lock poisoned");
            let mut used: Vec<String> = Vec::new();
            let mut resolved: HashSet<String> = HashSet::new();
            for message in history.iter() {
                for block in &message.content {
                    match block {
                        ContentBlock::ToolUse { id, .. } => used.push(id.clone()),
                        ContentBlock::ToolResult { tool_use_id, .. } => {
                            resolved.insert(tool_use_id.clone());
                        }
                        _ => {}
                    }
                }
            }
            used.into_iter().filter(|id| !resolved.contains(id)).collect()
        };

        for id in open {
            self.append_message(Message::tool_result(
                &id,
                Value::String(format!("aborted: {kind}")),
                true,
            ))
            .await;
        }
    }
}
