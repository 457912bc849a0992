//! End-to-end scenarios for the kosmo runtime.

#![allow(clippy::unwrap_used, clippy::panic, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kosmo::prelude::*;
use serde::Deserialize;
use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Test tools
// ---------------------------------------------------------------------------

/// Low-risk file reader returning canned content.
#[derive(Debug, Clone, Copy, Default)]
struct ReadFileTool;

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    #[allow(dead_code)]
    path: String,
}

#[async_trait]
impl Tool for ReadFileTool {
    const NAME: &'static str = "read-file";
    type Args = ReadFileArgs;
    type Output = String;
    type Error = ToolError;

    fn description(&self) -> String {
        "Reads a file and returns its contents.".to_owned()
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"]
        })
    }

    fn risk(&self) -> Option<RiskLevel> {
        Some(RiskLevel::Low)
    }

    async fn call(&self, _args: Self::Args, _ctx: &ToolContext) -> Result<String, ToolError> {
        Ok("abc".to_owned())
    }
}

/// High-risk shell tool (risk comes from the built-in name table).
#[derive(Debug, Clone, Copy, Default)]
struct ShellTool;

#[derive(Debug, Deserialize)]
struct ShellArgs {
    cmd: String,
}

#[async_trait]
impl Tool for ShellTool {
    const NAME: &'static str = "shell";
    type Args = ShellArgs;
    type Output = String;
    type Error = ToolError;

    fn description(&self) -> String {
        "Runs a shell command.".to_owned()
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "cmd": { "type": "string" } },
            "required": ["cmd"]
        })
    }

    async fn call(&self, args: Self::Args, _ctx: &ToolContext) -> Result<String, ToolError> {
        Ok(format!("ran: {}", args.cmd))
    }
}

/// Harmless tool used to drive the loop around without approvals.
#[derive(Debug, Clone, Copy, Default)]
struct SpinTool;

#[async_trait]
impl Tool for SpinTool {
    const NAME: &'static str = "spin";
    type Args = Value;
    type Output = &'static str;
    type Error = ToolError;

    fn description(&self) -> String {
        "Does nothing, successfully.".to_owned()
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    fn risk(&self) -> Option<RiskLevel> {
        Some(RiskLevel::Low)
    }

    async fn call(&self, _args: Value, _ctx: &ToolContext) -> Result<&'static str, ToolError> {
        Ok("ok")
    }
}

/// A provider whose calls never complete; used for cancellation races.
#[derive(Debug, Clone, Copy, Default)]
struct HangingProvider;

#[async_trait]
impl Provider for HangingProvider {
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    async fn complete(
        &self,
        _messages: &[Message],
        _options: &ChatOptions,
    ) -> Result<Completion, ProviderError> {
        futures::future::pending().await
    }

    async fn stream(
        &self,
        _messages: &[Message],
        _options: &ChatOptions,
    ) -> Result<ChunkStream, ProviderError> {
        Ok(Box::pin(futures::stream::pending()))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Route tracing output through the test harness when `RUST_LOG` is set.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn next_event(sub: &mut Subscription) -> Event {
    tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("timed out waiting for event")
        .expect("subscription closed early")
}

/// Collect events until (and including) `progress:done`.
async fn collect_until_done(sub: &mut Subscription) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        let event = next_event(sub).await;
        let done = event.event_type() == "done";
        events.push(event);
        if done {
            return events;
        }
    }
}

fn event_types(events: &[Event]) -> Vec<&'static str> {
    events.iter().map(Event::event_type).collect()
}

/// Every tool-use block must have exactly one matching tool-result.
fn assert_history_consistent(history: &[Message]) {
    let mut results: HashMap<&str, usize> = HashMap::new();
    for message in history {
        for block in &message.content {
            if let ContentBlock::ToolResult { tool_use_id, .. } = block {
                *results.entry(tool_use_id.as_str()).or_default() += 1;
            }
        }
    }
    for message in history {
        for block in &message.content {
            if let ContentBlock::ToolUse { id, .. } = block {
                assert_eq!(
                    results.get(id.as_str()),
                    Some(&1),
                    "tool-use {id} must have exactly one result"
                );
            }
        }
    }
}

fn echo_agent(script: ScriptedProvider) -> Arc<Agent> {
    Agent::builder()
        .config(AgentConfig::new("test-agent", "test-model"))
        .provider(Arc::new(script))
        .build()
        .expect("agent builds")
}

fn tool_agent(script: ScriptedProvider) -> Arc<Agent> {
    let tools = ToolRegistry::builder()
        .tool(ReadFileTool)
        .tool(ShellTool)
        .tool(SpinTool)
        .build();
    Agent::builder()
        .config(AgentConfig::new("test-agent", "test-model"))
        .provider(Arc::new(script))
        .tools(tools)
        .build()
        .expect("agent builds")
}

// ---------------------------------------------------------------------------
// Scenario 1: plain echo turn
// ---------------------------------------------------------------------------

#[tokio::test]
async fn plain_echo_turn() {
    init_tracing();
    let agent = echo_agent(ScriptedProvider::new().reply(ScriptedResponse::text("hello")));
    let mut progress = agent.subscribe([Channel::Progress]);

    agent.send("hi").await.expect("send accepted");
    let events = collect_until_done(&mut progress).await;

    assert_eq!(event_types(&events), vec!["text-chunk", "done"]);
    match &events[0].payload {
        Payload::TextChunk { delta } => assert_eq!(delta, "hello"),
        other => panic!("expected text chunk, got {other:?}"),
    }

    assert_eq!(agent.state(), AgentState::Ready);
    let history = agent.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].text().as_deref(), Some("hi"));
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].text().as_deref(), Some("hello"));

    agent.close().await.expect("close");
}

// ---------------------------------------------------------------------------
// Scenario 2: single tool call, auto-approved
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_tool_call_auto_approved() {
    let agent = tool_agent(
        ScriptedProvider::new()
            .reply(ScriptedResponse::tool_use("read-file", json!({"path": "x"})))
            .reply(ScriptedResponse::text("content is abc")),
    );
    let mut progress = agent.subscribe([Channel::Progress]);
    let mut control = agent.subscribe([Channel::Control]);

    agent.send("what's in x?").await.expect("send accepted");
    let events = collect_until_done(&mut progress).await;

    assert_eq!(
        event_types(&events),
        vec!["tool-start", "tool-end", "text-chunk", "done"]
    );
    match &events[1].payload {
        Payload::ToolEnd { call } => {
            assert_eq!(call.name, "read-file");
            assert!(call.succeeded());
            assert_eq!(
                call.outcome.as_ref().unwrap().content,
                json!("abc")
            );
        }
        other => panic!("expected tool end, got {other:?}"),
    }

    // Low risk under smart approval: no human in the loop.
    assert!(control.try_recv().is_none());

    let history = agent.history();
    assert_history_consistent(&history);
    let last = history.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.text().as_deref(), Some("content is abc"));

    agent.close().await.expect("close");
}

// ---------------------------------------------------------------------------
// Scenario 3: high-risk tool, human decides
// ---------------------------------------------------------------------------

#[tokio::test]
async fn high_risk_tool_human_approves() {
    let agent = tool_agent(
        ScriptedProvider::new()
            .reply(ScriptedResponse::tool_use("shell", json!({"cmd": "ls"})))
            .reply(ScriptedResponse::text("done listing")),
    );
    let mut progress = agent.subscribe([Channel::Progress]);
    let mut control = agent.subscribe([Channel::Control]);

    agent.send("list the directory").await.expect("send accepted");

    let request = next_event(&mut control).await;
    assert_eq!(request.event_type(), "permission-required");
    assert_eq!(agent.state(), AgentState::AwaitingApproval);

    let Payload::PermissionRequired { call, reply, .. } = &request.payload else {
        panic!("expected permission request");
    };
    assert_eq!(call.name, "shell");
    assert!(reply.respond(PermissionReply::allow()));

    let decided = next_event(&mut control).await;
    assert_eq!(decided.event_type(), "permission-decided");

    let events = collect_until_done(&mut progress).await;
    let types = event_types(&events);
    assert!(types.contains(&"tool-end"));
    let history = agent.history();
    assert_history_consistent(&history);
    // The tool actually ran.
    assert!(history.iter().any(|m| {
        m.content.iter().any(|b| {
            matches!(b, ContentBlock::ToolResult { content, is_error, .. }
                if !is_error && content == &json!("ran: ls"))
        })
    }));

    agent.close().await.expect("close");
}

#[tokio::test]
async fn high_risk_tool_human_denies() {
    let agent = tool_agent(
        ScriptedProvider::new()
            .reply(ScriptedResponse::tool_use("shell", json!({"cmd": "rm -rf /"})))
            .reply(ScriptedResponse::text("understood, stopping")),
    );
    let mut control = agent.subscribe([Channel::Control]);
    let mut progress = agent.subscribe([Channel::Progress]);

    agent.send("clean up").await.expect("send accepted");

    let request = next_event(&mut control).await;
    let Payload::PermissionRequired { request_id, .. } = &request.payload else {
        panic!("expected permission request");
    };

    // Deny through the ingress surface rather than the event's handle.
    agent
        .approve(request_id, PermissionReply::deny().with_note("too dangerous"))
        .expect("request pending");

    let events = collect_until_done(&mut progress).await;
    assert!(event_types(&events).contains(&"tool-end"));

    let history = agent.history();
    assert_history_consistent(&history);
    let denied = history.iter().find_map(|m| {
        m.content.iter().find_map(|b| match b {
            ContentBlock::ToolResult {
                content, is_error, ..
            } if *is_error => Some(content.clone()),
            _ => None,
        })
    });
    let denied = denied.expect("denied tool-result present");
    assert!(denied.as_str().unwrap().contains("denied"));

    // The loop continued to the model's follow-up.
    assert_eq!(
        agent.history().last().unwrap().text().as_deref(),
        Some("understood, stopping")
    );
    assert_eq!(agent.state(), AgentState::Ready);

    agent.close().await.expect("close");
}

// ---------------------------------------------------------------------------
// Scenario 4: iteration limit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn iteration_limit_ends_turn_in_error() {
    let tools = ToolRegistry::builder().tool(SpinTool).build();
    let agent = Agent::builder()
        .config(AgentConfig::new("spinner", "test-model").max_steps(3))
        .provider(Arc::new(
            ScriptedProvider::new()
                .reply(ScriptedResponse::tool_use("spin", json!({})))
                .repeat_last(),
        ))
        .tools(tools)
        .build()
        .expect("agent builds");
    let mut all = agent.subscribe([Channel::Progress, Channel::Monitor]);

    agent.send("go").await.expect("send accepted");
    let events = collect_until_done(&mut all).await;

    let executed = events
        .iter()
        .filter(|e| e.event_type() == "tool-executed")
        .count();
    assert_eq!(executed, 3);

    let error_at = events
        .iter()
        .position(|e| {
            matches!(
                &e.payload,
                Payload::Error { kind, .. } if *kind == "iteration-limit"
            )
        })
        .expect("iteration-limit error emitted");
    let done_at = events.len() - 1;
    assert!(error_at < done_at, "error precedes done");

    assert_eq!(agent.state(), AgentState::Error);
    assert_history_consistent(&agent.history());

    agent.close().await.expect("close");
}

// ---------------------------------------------------------------------------
// Scenario 5: subscriber overflow
// ---------------------------------------------------------------------------

#[tokio::test]
async fn subscriber_overflow_drops_oldest() {
    let bus = EventBus::new("overflow-test");
    let mut sub = bus.subscribe_with(
        SubscribeOptions::channels([Channel::Progress])
            .event_types(["text-chunk"])
            .capacity(4),
    );

    for i in 0..10 {
        bus.publish(Payload::TextChunk {
            delta: i.to_string(),
        });
    }

    assert_eq!(sub.dropped(), 6);
    let deltas: Vec<String> = sub
        .drain()
        .into_iter()
        .map(|e| match e.payload {
            Payload::TextChunk { delta } => delta,
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    assert_eq!(deltas, vec!["6", "7", "8", "9"]);
}

// ---------------------------------------------------------------------------
// Scenario 6: resume after restart
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resume_after_restart() -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());

    // First lifetime: create, converse, shut down.
    {
        let provider = Arc::new(ScriptedProvider::new().reply(ScriptedResponse::text("hello")));
        let cosmos = Cosmos::builder(provider)
            .store(Arc::clone(&store) as Arc<dyn Store>)
            .build();
        let agent = cosmos
            .create(AgentConfig::new("agent-a", "test-model"))
            .await?;
        let mut progress = agent.subscribe([Channel::Progress]);
        agent.send("hi").await?;
        let _ = collect_until_done(&mut progress).await;
        cosmos.shutdown().await;
    }

    // Second lifetime: same store, fresh manager.
    let provider = Arc::new(ScriptedProvider::new());
    let cosmos = Cosmos::builder(provider)
        .store(Arc::clone(&store) as Arc<dyn Store>)
        .build();
    let agent = cosmos
        .resume("agent-a", AgentConfig::new("agent-a", "test-model"))
        .await?;

    assert_eq!(agent.state(), AgentState::Ready);
    let history = agent.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].text().as_deref(), Some("hi"));
    assert_eq!(history[1].text().as_deref(), Some("hello"));

    cosmos.shutdown().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Laws
// ---------------------------------------------------------------------------

#[tokio::test]
async fn close_is_idempotent() {
    let agent = echo_agent(ScriptedProvider::new());
    let mut monitor = agent.subscribe([Channel::Monitor]);

    agent.close().await.expect("first close");
    assert_eq!(agent.state(), AgentState::Closed);

    // Drain everything the close produced.
    while monitor.recv().await.is_some() {}

    agent.close().await.expect("second close");
    assert_eq!(agent.state(), AgentState::Closed);
    assert!(monitor.try_recv().is_none(), "no new events after re-close");
}

#[tokio::test]
async fn closed_agent_rejects_send() {
    let agent = echo_agent(ScriptedProvider::new());
    agent.close().await.expect("close");
    let err = agent.send("too late").await.unwrap_err();
    assert!(matches!(err, CoreError::Closed));
}

#[tokio::test]
async fn cancellation_race_during_thinking() {
    let agent = Agent::builder()
        .config(AgentConfig::new("hanging", "test-model"))
        .provider(Arc::new(HangingProvider))
        .build()
        .expect("agent builds");

    agent.send("think forever").await.expect("send accepted");
    // Let the turn reach the provider call.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(agent.state(), AgentState::Thinking);

    tokio::time::timeout(Duration::from_secs(5), agent.close())
        .await
        .expect("close finishes within grace")
        .expect("close succeeds");

    assert_eq!(agent.state(), AgentState::Closed);
    // No half-applied tool results: only the user message landed.
    let history = agent.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::User);
}

#[tokio::test]
async fn turn_cancel_returns_agent_to_ready() {
    let agent = Agent::builder()
        .config(AgentConfig::new("hanging", "test-model"))
        .provider(Arc::new(HangingProvider))
        .build()
        .expect("agent builds");
    let mut monitor = agent.subscribe([Channel::Monitor]);

    agent.send("think forever").await.expect("send accepted");
    tokio::time::sleep(Duration::from_millis(50)).await;
    agent.cancel();

    // The cancelled marker arrives, then the agent is usable again.
    loop {
        let event = next_event(&mut monitor).await;
        if event.event_type() == "cancelled" {
            break;
        }
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(agent.state(), AgentState::Ready);

    agent.close().await.expect("close");
}

#[tokio::test]
async fn remembered_approval_skips_permission_event() {
    let agent = tool_agent(
        ScriptedProvider::new()
            .reply(ScriptedResponse::tool_use("shell", json!({"cmd": "ls"})))
            .reply(ScriptedResponse::text("first"))
            .reply(ScriptedResponse::tool_use("shell", json!({"cmd": "ls"})))
            .reply(ScriptedResponse::text("second")),
    );
    let mut progress = agent.subscribe([Channel::Progress]);
    let mut control = agent.subscribe([Channel::Control]);

    agent.send("list").await.expect("send accepted");
    let request = next_event(&mut control).await;
    let Payload::PermissionRequired { reply, .. } = &request.payload else {
        panic!("expected permission request");
    };
    reply.respond(PermissionReply::allow().remembered());
    let _ = collect_until_done(&mut progress).await;

    // Identical call in a new turn: no permission-required this time.
    agent.send("again").await.expect("send accepted");
    let _ = collect_until_done(&mut progress).await;

    let control_types: Vec<&str> = std::iter::from_fn(|| control.try_recv())
        .map(|e| e.event_type())
        .collect();
    assert_eq!(
        control_types
            .iter()
            .filter(|t| **t == "permission-required")
            .count(),
        0,
        "remembered decision bypasses the control channel"
    );

    agent.close().await.expect("close");
}

#[tokio::test]
async fn event_sequence_is_strictly_increasing() {
    let agent = tool_agent(
        ScriptedProvider::new()
            .reply(ScriptedResponse::tool_use("read-file", json!({"path": "x"})))
            .reply(ScriptedResponse::text("done")),
    );
    let mut all = agent.subscribe(Channel::ALL);

    agent.send("go").await.expect("send accepted");
    let events = collect_until_done(&mut all).await;

    let mut last: Option<u64> = None;
    for event in &events {
        if let Some(prev) = last {
            assert!(event.seq > prev, "sequence must strictly increase");
        }
        last = Some(event.seq);
    }

    agent.close().await.expect("close");
}

#[tokio::test]
async fn error_state_resets_on_next_send() {
    let tools = ToolRegistry::builder().tool(SpinTool).build();
    let agent = Agent::builder()
        .config(AgentConfig::new("recovering", "test-model").max_steps(1))
        .provider(Arc::new(
            ScriptedProvider::new()
                .reply(ScriptedResponse::tool_use("spin", json!({})))
                .reply(ScriptedResponse::text("recovered")),
        ))
        .tools(tools)
        .build()
        .expect("agent builds");
    let mut progress = agent.subscribe([Channel::Progress]);

    agent.send("first").await.expect("send accepted");
    let _ = collect_until_done(&mut progress).await;
    assert_eq!(agent.state(), AgentState::Error);

    agent.send("second").await.expect("send accepted after error");
    let _ = collect_until_done(&mut progress).await;
    assert_eq!(agent.state(), AgentState::Ready);
    assert_eq!(
        agent.history().last().unwrap().text().as_deref(),
        Some("recovered")
    );

    agent.close().await.expect("close");
}

#[tokio::test]
async fn session_service_records_events() {
    let sessions = Arc::new(MemorySessions::new());
    let agent = Agent::builder()
        .config(AgentConfig::new("recorded", "test-model"))
        .provider(Arc::new(
            ScriptedProvider::new().reply(ScriptedResponse::text("hello")),
        ))
        .sessions(Arc::clone(&sessions) as Arc<dyn SessionService>)
        .build()
        .expect("agent builds");
    let mut progress = agent.subscribe([Channel::Progress]);

    agent.send("hi").await.expect("send accepted");
    let _ = collect_until_done(&mut progress).await;
    agent.close().await.expect("close");

    let recorded = sessions
        .events("recorded", EventFilter::default())
        .await
        .expect("events stored");
    assert!(
        recorded
            .iter()
            .any(|e| e.get("type").and_then(Value::as_str) == Some("done")),
        "done event recorded into the session"
    );
    assert!(
        recorded
            .iter()
            .any(|e| e.get("type").and_then(Value::as_str) == Some("state-changed")),
        "state transitions recorded into the session"
    );
}
