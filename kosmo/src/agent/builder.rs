//! Agent construction and wiring.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::event::{EventBus, SubscribeOptions};
use crate::inspect::Inspector;
use crate::message::Message;
use crate::prompt::{PromptBuilder, PromptContext};
use crate::provider::{Provider, ProviderFacade, RetryPolicy};
use crate::sandbox::Sandbox;
use crate::session::{CreateSessionRequest, SessionService};
use crate::store::Store;
use crate::tool::{Dispatcher, ServiceMap, ToolRegistry};

use super::{Agent, AgentConfig, Runner, Shared};

/// Commands queued ahead of the step loop before `send` backpressures.
const COMMAND_QUEUE_CAPACITY: usize = 16;

/// Builder wiring an [`Agent`]'s collaborators together.
pub struct AgentBuilder {
    config: Option<AgentConfig>,
    provider: Option<Arc<dyn Provider>>,
    retry: RetryPolicy,
    tools: ToolRegistry,
    inspector: Option<Arc<Inspector>>,
    store: Option<Arc<dyn Store>>,
    sessions: Option<Arc<dyn SessionService>>,
    sandbox: Option<Arc<dyn Sandbox>>,
    services: ServiceMap,
    prompt: PromptBuilder,
    history: Vec<Message>,
}

impl AgentBuilder {
    /// Create a builder with defaults everywhere.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: None,
            provider: None,
            retry: RetryPolicy::default(),
            tools: ToolRegistry::new(),
            inspector: None,
            store: None,
            sessions: None,
            sandbox: None,
            services: ServiceMap::new(),
            prompt: PromptBuilder::with_defaults(),
            history: Vec::new(),
        }
    }

    /// Set the agent configuration (required).
    #[must_use]
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the LLM provider (required).
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the provider retry policy.
    #[must_use]
    pub const fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the tool registry snapshot.
    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Set the permission inspector.
    #[must_use]
    pub fn inspector(mut self, inspector: Arc<Inspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    /// Set the message store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the session service; events will be recorded into it.
    #[must_use]
    pub fn sessions(mut self, sessions: Arc<dyn SessionService>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Set the sandbox handle.
    #[must_use]
    pub fn sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    /// Register a typed service for tool contexts.
    #[must_use]
    pub fn service<T: std::any::Any + Send + Sync>(mut self, service: Arc<T>) -> Self {
        self.services.insert(service);
        self
    }

    /// Replace the prompt builder.
    #[must_use]
    pub fn prompt(mut self, prompt: PromptBuilder) -> Self {
        self.prompt = prompt;
        self
    }

    /// Seed the conversation history (used when resuming from a store).
    #[must_use]
    pub fn history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    /// Validate the configuration, assemble the system prompt, and spawn
    /// the step loop. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`CoreError::Config`] when the configuration is invalid or a
    /// required collaborator is missing.
    pub fn build(self) -> Result<Arc<Agent>> {
        let config = self
            .config
            .ok_or_else(|| CoreError::config("agent config is required"))?;
        config.validate()?;
        let provider = self
            .provider
            .ok_or_else(|| CoreError::config("provider is required"))?;
        let inspector = self
            .inspector
            .unwrap_or_else(|| Arc::new(Inspector::new(crate::inspect::PermissionMode::default())));

        let sandbox_work_dir = self.sandbox.as_ref().map(|s| s.work_dir());
        let prompt_ctx = {
            let ctx = PromptContext::new(&config, &self.tools);
            match sandbox_work_dir.as_deref() {
                Some(dir) => ctx.with_sandbox_work_dir(dir),
                None => ctx,
            }
        };
        let system_prompt = self.prompt.build(&prompt_ctx);

        let bus = EventBus::new(&config.id);
        let shared = Arc::new(Shared::new(&config.id, bus.clone(), self.history));
        let cancel = CancellationToken::new();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);

        let facade = ProviderFacade::new(provider)
            .with_retry(self.retry)
            .with_call_timeout(config.llm_timeout);
        let dispatcher = Dispatcher::new(self.tools).with_timeout(config.tool_timeout);

        let recorder = self
            .sessions
            .map(|sessions| spawn_recorder(&bus, sessions, config.id.clone()));

        let runner = Runner {
            shared: Arc::clone(&shared),
            config: config.clone(),
            provider: facade,
            dispatcher,
            inspector: Arc::clone(&inspector),
            store: self.store,
            sandbox: self.sandbox,
            services: self.services,
            system_prompt,
            cancel: cancel.clone(),
            commands: commands_rx,
        };
        let worker = tokio::spawn(runner.run());

        Ok(Arc::new(Agent::from_parts(
            shared,
            config,
            commands_tx,
            cancel,
            inspector,
            worker,
            recorder,
        )))
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AgentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentBuilder")
            .field("config", &self.config)
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

/// Record every observable event into session storage; failures are
/// logged and swallowed.
fn spawn_recorder(
    bus: &EventBus,
    sessions: Arc<dyn SessionService>,
    agent_id: String,
) -> JoinHandle<()> {
    let mut subscription = bus.subscribe_with(SubscribeOptions::all());
    tokio::spawn(async move {
        let _ = sessions
            .create(CreateSessionRequest {
                id: Some(agent_id.clone()),
                agent_id: agent_id.clone(),
                metadata: Value::Null,
            })
            .await;
        while let Some(event) = subscription.recv().await {
            if let Err(err) = sessions.append_event(&agent_id, &event.to_record()).await {
                debug!(agent = %agent_id, error = %err, "session event append failed");
            }
        }
    })
}
