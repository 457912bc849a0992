//! Cosmos: the bounded registry of live agents.
//!
//! Cosmos owns shared collaborators (provider, store, sessions, tools,
//! permission defaults) and hands out [`Agent`] instances keyed by id. It
//! bounds how many agents run at once, resumes agents from the store, and
//! tears everything down on shutdown.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::agent::{Agent, AgentConfig};
use crate::error::{CoreError, Result, StoreError};
use crate::inspect::{Inspector, PermissionMode, PermissionRule, RuleStore};
use crate::prompt::PromptBuilder;
use crate::provider::{Provider, RetryPolicy};
use crate::session::SessionService;
use crate::store::Store;
use crate::tool::ToolRegistry;

/// Default registry capacity.
pub const DEFAULT_CAPACITY: usize = 128;

struct CosmosDefaults {
    provider: Arc<dyn Provider>,
    retry: RetryPolicy,
    tools: ToolRegistry,
    store: Option<Arc<dyn Store>>,
    sessions: Option<Arc<dyn SessionService>>,
    rule_store: Option<Arc<dyn RuleStore>>,
    mode: PermissionMode,
    rules: Vec<PermissionRule>,
    prompt: PromptBuilder,
}

/// The lifecycle manager: a bounded, concurrently accessible registry of
/// running agents.
pub struct Cosmos {
    agents: RwLock<HashMap<String, Arc<Agent>>>,
    capacity: usize,
    defaults: CosmosDefaults,
}

impl Cosmos {
    /// Create a builder.
    #[must_use]
    pub fn builder(provider: Arc<dyn Provider>) -> CosmosBuilder {
        CosmosBuilder::new(provider)
    }

    /// Number of live agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.read().expect("registry lock poisoned").len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The registry capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Create a new agent.
    ///
    /// # Errors
    ///
    /// [`CoreError::Config`] when the id is already registered, the
    /// registry is full, or the configuration is invalid.
    pub async fn create(&self, config: AgentConfig) -> Result<Arc<Agent>> {
        self.create_with_history(config, Vec::new()).await
    }

    async fn create_with_history(
        &self,
        config: AgentConfig,
        history: Vec<crate::message::Message>,
    ) -> Result<Arc<Agent>> {
        config.validate()?;

        // Reserve the slot before doing any construction work.
        {
            let agents = self.agents.read().expect("registry lock poisoned");
            if agents.contains_key(&config.id) {
                return Err(CoreError::config(format!(
                    "agent '{}' already exists",
                    config.id
                )));
            }
            if agents.len() >= self.capacity {
                return Err(CoreError::config(format!(
                    "registry full ({} agents)",
                    self.capacity
                )));
            }
        }

        let inspector = Arc::new(self.new_inspector());
        if let Err(err) = inspector.load_from_store().await {
            warn!(agent = %config.id, error = %err, "rule load failed; using in-memory rules");
        }

        let id = config.id.clone();
        let mut builder = Agent::builder()
            .config(config)
            .provider(Arc::clone(&self.defaults.provider))
            .retry(self.defaults.retry)
            .tools(self.defaults.tools.clone())
            .inspector(inspector)
            .prompt(self.defaults.prompt.clone())
            .history(history);
        if let Some(store) = &self.defaults.store {
            builder = builder.store(Arc::clone(store));
        }
        if let Some(sessions) = &self.defaults.sessions {
            builder = builder.sessions(Arc::clone(sessions));
        }
        let agent = builder.build()?;

        let mut agents = self.agents.write().expect("registry lock poisoned");
        if agents.contains_key(&id) {
            // Lost a race; close the one we just built.
            drop(agents);
            let _ = agent.close().await;
            return Err(CoreError::config(format!("agent '{id}' already exists")));
        }
        if agents.len() >= self.capacity {
            drop(agents);
            let _ = agent.close().await;
            return Err(CoreError::config(format!(
                "registry full ({} agents)",
                self.capacity
            )));
        }
        agents.insert(id.clone(), Arc::clone(&agent));
        drop(agents);

        info!(agent = %id, "agent created");
        Ok(agent)
    }

    fn new_inspector(&self) -> Inspector {
        let inspector =
            Inspector::new(self.defaults.mode).with_rules(self.defaults.rules.iter().cloned());
        match &self.defaults.rule_store {
            Some(store) => inspector.with_store(Arc::clone(store)),
            None => inspector,
        }
    }

    /// Fetch a live agent by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Agent>> {
        self.agents
            .read()
            .expect("registry lock poisoned")
            .get(id)
            .cloned()
    }

    /// Return the live agent with this id, or reconstruct it from the
    /// store's message history.
    ///
    /// # Errors
    ///
    /// [`CoreError::Store`] with a not-found error when the store has no
    /// record of the agent; [`CoreError::Config`] as for `create`.
    pub async fn resume(&self, id: &str, config: AgentConfig) -> Result<Arc<Agent>> {
        if let Some(agent) = self.get(id) {
            return Ok(agent);
        }
        let store = self
            .defaults
            .store
            .as_ref()
            .ok_or_else(|| CoreError::Store(StoreError::NotFound(id.to_owned())))?;
        let history = store.load_messages(id).await?;
        info!(agent = %id, messages = history.len(), "resuming agent from store");
        self.create_with_history(config, history).await
    }

    /// Ids of live agents, sorted; optionally filtered by prefix.
    #[must_use]
    pub fn list(&self, prefix: Option<&str>) -> Vec<String> {
        let mut ids: Vec<String> = self
            .agents
            .read()
            .expect("registry lock poisoned")
            .keys()
            .filter(|id| prefix.is_none_or(|p| id.starts_with(p)))
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Close an agent and drop it from the registry. The store is not
    /// purged, so the agent can be resumed later. Returns whether the
    /// agent existed.
    pub async fn remove(&self, id: &str) -> bool {
        let agent = self
            .agents
            .write()
            .expect("registry lock poisoned")
            .remove(id);
        match agent {
            Some(agent) => {
                let _ = agent.close().await;
                info!(agent = %id, "agent removed");
                true
            }
            None => false,
        }
    }

    /// Close every agent and empty the registry.
    pub async fn shutdown(&self) {
        let agents: Vec<Arc<Agent>> = {
            let mut map = self.agents.write().expect("registry lock poisoned");
            map.drain().map(|(_, agent)| agent).collect()
        };
        for agent in agents {
            let _ = agent.close().await;
        }
        info!("cosmos shut down");
    }
}

impl std::fmt::Debug for Cosmos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cosmos")
            .field("agents", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Builder for [`Cosmos`].
pub struct CosmosBuilder {
    provider: Arc<dyn Provider>,
    retry: RetryPolicy,
    tools: ToolRegistry,
    store: Option<Arc<dyn Store>>,
    sessions: Option<Arc<dyn SessionService>>,
    rule_store: Option<Arc<dyn RuleStore>>,
    mode: PermissionMode,
    rules: Vec<PermissionRule>,
    prompt: PromptBuilder,
    capacity: usize,
}

impl CosmosBuilder {
    /// Create a builder around the shared provider.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            retry: RetryPolicy::default(),
            tools: ToolRegistry::new(),
            store: None,
            sessions: None,
            rule_store: None,
            mode: PermissionMode::default(),
            rules: Vec::new(),
            prompt: PromptBuilder::with_defaults(),
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Set the provider retry policy.
    #[must_use]
    pub const fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the shared tool registry.
    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Set the message store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the session service.
    #[must_use]
    pub fn sessions(mut self, sessions: Arc<dyn SessionService>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Set the rule store used by each agent's inspector.
    #[must_use]
    pub fn rule_store(mut self, rule_store: Arc<dyn RuleStore>) -> Self {
        self.rule_store = Some(rule_store);
        self
    }

    /// Set the default permission mode.
    #[must_use]
    pub const fn permission_mode(mut self, mode: PermissionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Seed permission rules for every agent.
    #[must_use]
    pub fn rules(mut self, rules: impl IntoIterator<Item = PermissionRule>) -> Self {
        self.rules.extend(rules);
        self
    }

    /// Replace the prompt builder.
    #[must_use]
    pub fn prompt(mut self, prompt: PromptBuilder) -> Self {
        self.prompt = prompt;
        self
    }

    /// Set the registry capacity (minimum 1).
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Build the lifecycle manager.
    #[must_use]
    pub fn build(self) -> Cosmos {
        Cosmos {
            agents: RwLock::new(HashMap::new()),
            capacity: self.capacity,
            defaults: CosmosDefaults {
                provider: self.provider,
                retry: self.retry,
                tools: self.tools,
                store: self.store,
                sessions: self.sessions,
                rule_store: self.rule_store,
                mode: self.mode,
                rules: self.rules,
                prompt: self.prompt,
            },
        }
    }
}

impl std::fmt::Debug for CosmosBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CosmosBuilder")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
