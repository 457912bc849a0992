//! Session recording: the audit trail consumed by front-ends.
//!
//! When an agent is wired with a [`SessionService`], every observable
//! event is appended to session storage. Persistence failures here are
//! never fatal; the runtime logs and keeps going.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::event::{Channel, now_ms};

/// A stored session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Session id.
    pub id: String,
    /// Owning agent id.
    pub agent_id: String,
    /// Creation time, ms since epoch.
    pub created_at_ms: u64,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Value,
}

/// Request to create a session.
#[derive(Debug, Clone, Default)]
pub struct CreateSessionRequest {
    /// Explicit session id; generated when absent.
    pub id: Option<String>,
    /// Owning agent id.
    pub agent_id: String,
    /// Free-form metadata.
    pub metadata: Value,
}

/// Request to update a session's metadata.
#[derive(Debug, Clone)]
pub struct UpdateSessionRequest {
    /// Session id.
    pub id: String,
    /// Replacement metadata.
    pub metadata: Value,
}

/// Request to list sessions.
#[derive(Debug, Clone, Default)]
pub struct ListSessionsRequest {
    /// Restrict to one agent.
    pub agent_id: Option<String>,
    /// Cap the result count.
    pub limit: Option<usize>,
}

/// Filter for stored events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Restrict to one channel.
    pub channel: Option<Channel>,
    /// Restrict to these event types (empty = all).
    pub event_types: Vec<String>,
}

impl EventFilter {
    fn matches(&self, record: &Value) -> bool {
        if let Some(channel) = self.channel
            && record.get("channel").and_then(Value::as_str) != Some(channel.as_str())
        {
            return false;
        }
        if self.event_types.is_empty() {
            return true;
        }
        record
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|t| self.event_types.iter().any(|want| want == t))
    }
}

/// Session persistence consumed by the core.
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Create a session.
    async fn create(&self, req: CreateSessionRequest) -> Result<SessionRecord, StoreError>;

    /// Fetch a session by id.
    async fn get(&self, id: &str) -> Result<SessionRecord, StoreError>;

    /// Append one event record to a session.
    async fn append_event(&self, session_id: &str, event: &Value) -> Result<(), StoreError>;

    /// Fetch stored events, filtered.
    async fn events(&self, session_id: &str, filter: EventFilter)
    -> Result<Vec<Value>, StoreError>;

    /// Update session metadata.
    async fn update(&self, req: UpdateSessionRequest) -> Result<SessionRecord, StoreError>;

    /// Delete a session and its events.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// List sessions.
    async fn list(&self, req: ListSessionsRequest) -> Result<Vec<SessionRecord>, StoreError>;
}

#[derive(Default)]
struct MemorySessionsInner {
    sessions: HashMap<String, SessionRecord>,
    events: HashMap<String, Vec<Value>>,
}

/// In-memory [`SessionService`] implementation.
#[derive(Default)]
pub struct MemorySessions {
    inner: Mutex<MemorySessionsInner>,
}

impl MemorySessions {
    /// Create an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionService for MemorySessions {
    async fn create(&self, req: CreateSessionRequest) -> Result<SessionRecord, StoreError> {
        let record = SessionRecord {
            id: req
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            agent_id: req.agent_id,
            created_at_ms: now_ms(),
            metadata: req.metadata,
        };
        let mut inner = self.inner.lock().expect("session lock poisoned");
        inner.sessions.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<SessionRecord, StoreError> {
        self.inner
            .lock()
            .expect("session lock poisoned")
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))
    }

    async fn append_event(&self, session_id: &str, event: &Value) -> Result<(), StoreError> {
        self.inner
            .lock()
            .expect("session lock poisoned")
            .events
            .entry(session_id.to_owned())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn events(
        &self,
        session_id: &str,
        filter: EventFilter,
    ) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .inner
            .lock()
            .expect("session lock poisoned")
            .events
            .get(session_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| filter.matches(e))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update(&self, req: UpdateSessionRequest) -> Result<SessionRecord, StoreError> {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        let record = inner
            .sessions
            .get_mut(&req.id)
            .ok_or_else(|| StoreError::NotFound(req.id.clone()))?;
        record.metadata = req.metadata;
        Ok(record.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        inner.sessions.remove(id);
        inner.events.remove(id);
        Ok(())
    }

    async fn list(&self, req: ListSessionsRequest) -> Result<Vec<SessionRecord>, StoreError> {
        let inner = self.inner.lock().expect("session lock poisoned");
        let mut records: Vec<SessionRecord> = inner
            .sessions
            .values()
            .filter(|s| {
                req.agent_id
                    .as_deref()
                    .is_none_or(|agent| s.agent_id == agent)
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms));
        if let Some(limit) = req.limit {
            records.truncate(limit);
        }
        Ok(records)
    }
}

impl std::fmt::Debug for MemorySessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("session lock poisoned");
        f.debug_struct("MemorySessions")
            .field("sessions", &inner.sessions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_append_filter() {
        let sessions = MemorySessions::new();
        let record = sessions
            .create(CreateSessionRequest {
                id: Some("s1".into()),
                agent_id: "a1".into(),
                metadata: json!({"source": "test"}),
            })
            .await
            .expect("create");
        assert_eq!(record.id, "s1");

        sessions
            .append_event("s1", &json!({"channel": "progress", "type": "done"}))
            .await
            .expect("append");
        sessions
            .append_event(
                "s1",
                &json!({"channel": "monitor", "type": "state-changed"}),
            )
            .await
            .expect("append");

        let all = sessions
            .events("s1", EventFilter::default())
            .await
            .expect("events");
        assert_eq!(all.len(), 2);

        let monitor_only = sessions
            .events(
                "s1",
                EventFilter {
                    channel: Some(Channel::Monitor),
                    event_types: Vec::new(),
                },
            )
            .await
            .expect("events");
        assert_eq!(monitor_only.len(), 1);

        let done_only = sessions
            .events(
                "s1",
                EventFilter {
                    channel: None,
                    event_types: vec!["done".into()],
                },
            )
            .await
            .expect("events");
        assert_eq!(done_only.len(), 1);
    }

    #[tokio::test]
    async fn list_and_delete() {
        let sessions = MemorySessions::new();
        for agent in ["a1", "a1", "a2"] {
            let _ = sessions
                .create(CreateSessionRequest {
                    id: None,
                    agent_id: agent.into(),
                    metadata: Value::Null,
                })
                .await
                .expect("create");
        }

        let a1 = sessions
            .list(ListSessionsRequest {
                agent_id: Some("a1".into()),
                limit: None,
            })
            .await
            .expect("list");
        assert_eq!(a1.len(), 2);

        let id = a1[0].id.clone();
        sessions.delete(&id).await.expect("delete");
        assert!(sessions.get(&id).await.unwrap_err().is_not_found());
    }
}
