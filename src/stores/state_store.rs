//! Durable backend for payload and step-state contents.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::fmt;
use std::sync::RwLock;

/// Address of one durable record.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum StateKey {
    Payload { session: String },
    Step { session: String, index: usize },
    /// Last tick handled for a session, used to answer replays.
    Journal { session: String },
    /// Output of the tick that created a session, keyed by the trigger id.
    Trigger { id: String },
}

impl StateKey {
    pub fn payload(session: impl Into<String>) -> Self {
        StateKey::Payload {
            session: session.into(),
        }
    }

    pub fn step(session: impl Into<String>, index: usize) -> Self {
        StateKey::Step {
            session: session.into(),
            index,
        }
    }

    pub fn journal(session: impl Into<String>) -> Self {
        StateKey::Journal {
            session: session.into(),
        }
    }

    pub fn trigger(id: impl Into<String>) -> Self {
        StateKey::Trigger { id: id.into() }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKey::Payload { session } => write!(f, "payload/{session}"),
            StateKey::Step { session, index } => write!(f, "step-state/{session}/{index}"),
            StateKey::Journal { session } => write!(f, "tick-journal/{session}"),
            StateKey::Trigger { id } => write!(f, "trigger-journal/{id}"),
        }
    }
}

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum StateStoreError {
    #[error("state backend error for {key}: {message}")]
    #[diagnostic(
        code(steploom::state_store::backend),
        help("Check backend connectivity and permissions.")
    )]
    Backend { key: String, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Memento(#[from] crate::memento::MementoError),
}

pub type Result<T> = std::result::Result<T, StateStoreError>;

/// Durable key-value backend. `load` returns `None` for records never saved.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, key: &StateKey) -> Result<Option<Value>>;

    async fn save(&self, key: &StateKey, value: Value) -> Result<()>;

    /// Delete a record. Removing a missing record is not an error.
    async fn remove(&self, key: &StateKey) -> Result<()>;
}

/// Process-local backend for tests and single-process drivers.
#[derive(Default)]
pub struct InMemoryStateStore {
    inner: RwLock<FxHashMap<String, Value>>,
}

impl InMemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self, key: &StateKey) -> Result<Option<Value>> {
        let map = self.inner.read().map_err(|e| StateStoreError::Backend {
            key: key.to_string(),
            message: format!("lock poisoned: {e}"),
        })?;
        Ok(map.get(&key.to_string()).cloned())
    }

    async fn save(&self, key: &StateKey, value: Value) -> Result<()> {
        let mut map = self.inner.write().map_err(|e| StateStoreError::Backend {
            key: key.to_string(),
            message: format!("lock poisoned: {e}"),
        })?;
        map.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &StateKey) -> Result<()> {
        let mut map = self.inner.write().map_err(|e| StateStoreError::Backend {
            key: key.to_string(),
            message: format!("lock poisoned: {e}"),
        })?;
        map.remove(&key.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn save_then_load() {
        let store = InMemoryStateStore::new();
        let key = StateKey::step("sess-1", 2);
        assert!(store.load(&key).await.unwrap().is_none());
        store.save(&key, json!({"a": 1})).await.unwrap();
        assert_eq!(store.load(&key).await.unwrap(), Some(json!({"a": 1})));
        assert!(store.load(&StateKey::payload("sess-1")).await.unwrap().is_none());
        assert_eq!(store.len(), 1);

        store.remove(&key).await.unwrap();
        store.remove(&key).await.unwrap();
        assert!(store.load(&key).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn keys_render_distinctly() {
        assert_eq!(StateKey::payload("s").to_string(), "payload/s");
        assert_eq!(StateKey::step("s", 4).to_string(), "step-state/s/4");
        assert_eq!(StateKey::journal("s").to_string(), "tick-journal/s");
        assert_eq!(StateKey::trigger("t-1").to_string(), "trigger-journal/t-1");
    }
}
