//! Workflow-wide payload shared by every step of an instance.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::state_store::{StateKey, StateStore, StateStoreError};
use super::{StateError, from_value, to_value};
use crate::memento::{self, MementoError, MementoRecord, Stateful, current_schema_version};

/// Read-mostly workflow input plus the read/write `meta` and `output` areas.
///
/// Lookups through [`WorkflowPayload::value`] see `meta` first, then the
/// top-level keys of the input object, so a step can override an input
/// value for the steps after it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkflowPayload {
    input: Value,
    meta: BTreeMap<String, Value>,
    output: BTreeMap<String, Value>,
}

impl WorkflowPayload {
    pub fn new(input: Value) -> Self {
        Self {
            input,
            meta: BTreeMap::new(),
            output: BTreeMap::new(),
        }
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        self.meta
            .get(key)
            .or_else(|| self.input.as_object().and_then(|o| o.get(key)))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StateError> {
        self.value(key).map(|v| from_value(key, v)).transpose()
    }

    pub fn must_get<T: DeserializeOwned>(&self, key: &str) -> Result<T, StateError> {
        self.get(key)?.ok_or_else(|| StateError::MissingKey {
            key: key.to_string(),
        })
    }

    pub fn set_meta<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<(), StateError> {
        let key = key.into();
        let value = to_value(&key, value)?;
        self.meta.insert(key, value);
        Ok(())
    }

    pub fn remove_meta(&mut self, key: &str) -> Option<Value> {
        self.meta.remove(key)
    }

    pub fn meta(&self) -> &BTreeMap<String, Value> {
        &self.meta
    }

    pub fn set_output<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<(), StateError> {
        let key = key.into();
        let value = to_value(&key, value)?;
        self.output.insert(key, value);
        Ok(())
    }

    pub fn output(&self) -> &BTreeMap<String, Value> {
        &self.output
    }

    /// Replace the contents with the durable copy, if one was saved.
    pub async fn load(
        &mut self,
        store: &dyn StateStore,
        session: &str,
    ) -> Result<bool, StateStoreError> {
        let Some(value) = store.load(&StateKey::payload(session)).await? else {
            return Ok(false);
        };
        memento::restore(self, Some(&value))?;
        Ok(true)
    }

    pub async fn save(&self, store: &dyn StateStore, session: &str) -> Result<(), StateStoreError> {
        let value = memento::capture(self)?;
        store.save(&StateKey::payload(session), value).await
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowPayloadMemento {
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub meta: BTreeMap<String, Value>,
    #[serde(default)]
    pub output: BTreeMap<String, Value>,
}

impl Default for WorkflowPayloadMemento {
    fn default() -> Self {
        Self {
            schema_version: current_schema_version(),
            input: Value::Null,
            meta: BTreeMap::new(),
            output: BTreeMap::new(),
        }
    }
}

impl MementoRecord for WorkflowPayloadMemento {
    const COMPONENT: &'static str = "workflow payload";

    fn schema_version(&self) -> u32 {
        self.schema_version
    }
}

impl Stateful for WorkflowPayload {
    type Memento = WorkflowPayloadMemento;

    fn memento(&self) -> WorkflowPayloadMemento {
        WorkflowPayloadMemento {
            schema_version: current_schema_version(),
            input: self.input.clone(),
            meta: self.meta.clone(),
            output: self.output.clone(),
        }
    }

    fn set_memento(&mut self, memento: WorkflowPayloadMemento) -> Result<(), MementoError> {
        self.input = memento.input;
        self.meta = memento.meta;
        self.output = memento.output;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::InMemoryStateStore;
    use serde_json::json;

    #[test]
    fn meta_shadows_input() {
        let mut payload = WorkflowPayload::new(json!({"region": "us-east-1", "size": 3}));
        assert_eq!(payload.must_get::<String>("region").unwrap(), "us-east-1");
        payload.set_meta("region", &"eu-west-1").unwrap();
        assert_eq!(payload.must_get::<String>("region").unwrap(), "eu-west-1");
        assert_eq!(payload.get::<u32>("size").unwrap(), Some(3));
        assert_eq!(payload.get::<u32>("absent").unwrap(), None);
    }

    #[test]
    fn missing_and_misshapen_keys_are_errors() {
        let payload = WorkflowPayload::new(json!({"size": "large"}));
        assert!(matches!(
            payload.must_get::<u32>("nope"),
            Err(StateError::MissingKey { .. })
        ));
        assert!(matches!(
            payload.get::<u32>("size"),
            Err(StateError::Shape { .. })
        ));
    }

    #[test]
    fn memento_round_trip_is_lossless() {
        let mut payload = WorkflowPayload::new(json!({"a": 1}));
        payload.set_meta("bucket", &"b-1").unwrap();
        payload.set_output("arn", &"arn:aws:s3:::b-1").unwrap();
        let before = payload.clone();
        let m = payload.memento();
        payload.set_memento(m).unwrap();
        assert_eq!(payload, before);
    }

    #[test]
    fn unstarted_payload_memento_is_empty() {
        let m = WorkflowPayload::default().memento();
        assert_eq!(m, WorkflowPayloadMemento::default());
    }

    #[tokio::test]
    async fn load_prefers_durable_copy() {
        let store = InMemoryStateStore::new();
        let mut payload = WorkflowPayload::new(json!({}));
        assert!(!payload.load(&store, "s1").await.unwrap());

        payload.set_meta("k", &42).unwrap();
        payload.save(&store, "s1").await.unwrap();

        let mut stale = WorkflowPayload::new(json!({}));
        assert!(stale.load(&store, "s1").await.unwrap());
        assert_eq!(stale.get::<u32>("k").unwrap(), Some(42));
    }
}
