//! The persistence seam consumed by the core.
//!
//! The runtime never persists its own state; it hands messages and
//! snapshots to a [`Store`]. [`MemoryStore`] is the in-process reference
//! implementation, used by tests and by deployments that do not need
//! durability.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::AgentState;
use crate::error::StoreError;
use crate::inspect::{PermissionRule, RuleStore};
use crate::message::Message;

/// The persisted shape of an agent: everything needed to resume it.
///
/// `(messages, sequence, state)` round-trip losslessly through
/// [`Store::save_snapshot`] / the blob the store hands back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    /// The conversation history.
    pub messages: Vec<Message>,
    /// The event sequence counter at snapshot time.
    pub sequence: u64,
    /// The agent state at snapshot time.
    pub state: AgentState,
}

/// External message/snapshot persistence.
///
/// Errors distinguish *not-found* from *transient*; the core retries
/// transient failures a bounded number of times, then surfaces the
/// failure as a `monitor:error` event and moves on.
#[async_trait]
pub trait Store: Send + Sync {
    /// Load the full message history for an agent.
    async fn load_messages(&self, agent_id: &str) -> Result<Vec<Message>, StoreError>;

    /// Append one message to an agent's history.
    async fn append_message(&self, agent_id: &str, message: &Message) -> Result<(), StoreError>;

    /// Persist an opaque snapshot blob for an agent.
    async fn save_snapshot(&self, agent_id: &str, blob: &Value) -> Result<(), StoreError>;
}

#[derive(Default)]
struct MemoryStoreInner {
    messages: HashMap<String, Vec<Message>>,
    snapshots: HashMap<String, Value>,
    rules: Vec<PermissionRule>,
}

/// In-memory [`Store`] (and [`RuleStore`]) implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any history exists for the agent.
    #[must_use]
    pub fn contains(&self, agent_id: &str) -> bool {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .messages
            .contains_key(agent_id)
    }

    /// The last saved snapshot for the agent, if any.
    #[must_use]
    pub fn snapshot(&self, agent_id: &str) -> Option<Value> {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .snapshots
            .get(agent_id)
            .cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_messages(&self, agent_id: &str) -> Result<Vec<Message>, StoreError> {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .messages
            .get(agent_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(agent_id.to_owned()))
    }

    async fn append_message(&self, agent_id: &str, message: &Message) -> Result<(), StoreError> {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .messages
            .entry(agent_id.to_owned())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn save_snapshot(&self, agent_id: &str, blob: &Value) -> Result<(), StoreError> {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .snapshots
            .insert(agent_id.to_owned(), blob.clone());
        Ok(())
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn load_rules(&self) -> Result<Vec<PermissionRule>, StoreError> {
        Ok(self
            .inner
            .lock()
            .expect("store lock poisoned")
            .rules
            .clone())
    }

    async fn save_rules(&self, rules: &[PermissionRule]) -> Result<(), StoreError> {
        self.inner.lock().expect("store lock poisoned").rules = rules.to_vec();
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("store lock poisoned");
        f.debug_struct("MemoryStore")
            .field("agents", &inner.messages.len())
            .field("snapshots", &inner.snapshots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messages_round_trip() {
        let store = MemoryStore::new();
        assert!(store.load_messages("a1").await.unwrap_err().is_not_found());

        store
            .append_message("a1", &Message::user("hi"))
            .await
            .expect("append");
        store
            .append_message("a1", &Message::assistant("hello"))
            .await
            .expect("append");

        let messages = store.load_messages("a1").await.expect("load");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text().as_deref(), Some("hi"));
        assert!(store.contains("a1"));
        assert!(!store.contains("a2"));
    }

    #[tokio::test]
    async fn snapshot_round_trips_losslessly() {
        let store = MemoryStore::new();
        let snapshot = AgentSnapshot {
            messages: vec![Message::user("hi"), Message::assistant("hello")],
            sequence: 9,
            state: AgentState::Ready,
        };
        let blob = serde_json::to_value(&snapshot).expect("serialize");
        store.save_snapshot("a1", &blob).await.expect("save");

        let loaded = store.snapshot("a1").expect("present");
        let back: AgentSnapshot = serde_json::from_value(loaded).expect("deserialize");
        assert_eq!(back.messages, snapshot.messages);
        assert_eq!(back.sequence, 9);
        assert_eq!(back.state, AgentState::Ready);
    }

    #[tokio::test]
    async fn rules_round_trip() {
        use crate::inspect::{PermissionRule, RuleDecision};

        let store = MemoryStore::new();
        let rules = vec![PermissionRule::new("shell", RuleDecision::Ask)];
        RuleStore::save_rules(&store, &rules).await.expect("save");
        let loaded = RuleStore::load_rules(&store).await.expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].pattern, "shell");
    }
}
