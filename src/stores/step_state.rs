//! Per-step scratch space that survives between a step's own ticks.
//!
//! A polling step typically records the id of the resource it created in
//! `start` and reads it back in its check method several invocations later.

use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::state_store::{StateKey, StateStore, StateStoreError};
use super::{StateError, from_value, to_value};
use crate::memento::{MementoError, MementoRecord, Stateful, current_schema_version};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepState {
    values: BTreeMap<String, Value>,
}

impl StepState {
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StateError> {
        self.values.get(key).map(|v| from_value(key, v)).transpose()
    }

    pub fn must_get<T: DeserializeOwned>(&self, key: &str) -> Result<T, StateError> {
        self.get(key)?.ok_or_else(|| StateError::MissingKey {
            key: key.to_string(),
        })
    }

    pub fn set<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<(), StateError> {
        let key = key.into();
        let value = to_value(&key, value)?;
        self.values.insert(key, value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Hands out one [`StepState`] per plan index, created on first use.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepStateProvider {
    states: FxHashMap<usize, StepState>,
}

impl StepStateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, index: usize) -> Option<&StepState> {
        self.states.get(&index)
    }

    pub fn state_mut(&mut self, index: usize) -> &mut StepState {
        self.states.entry(index).or_default()
    }

    /// Drop the state of `index` and of every later step.
    pub fn reset_from(&mut self, index: usize) {
        self.states.retain(|&i, _| i < index);
    }

    /// Replace the state of `index` with its durable copy, if one was saved.
    pub async fn load(
        &mut self,
        store: &dyn StateStore,
        session: &str,
        index: usize,
    ) -> Result<bool, StateStoreError> {
        let key = StateKey::step(session, index);
        let Some(value) = store.load(&key).await? else {
            return Ok(false);
        };
        let values: BTreeMap<String, Value> = serde_json::from_value(value).map_err(|e| {
            StateStoreError::Backend {
                key: key.to_string(),
                message: format!("stored step state is not an object: {e}"),
            }
        })?;
        self.states.insert(index, StepState { values });
        Ok(true)
    }

    pub async fn save(
        &self,
        store: &dyn StateStore,
        session: &str,
        index: usize,
    ) -> Result<(), StateStoreError> {
        let Some(state) = self.states.get(&index) else {
            return Ok(());
        };
        let value = serde_json::to_value(&state.values).map_err(|e| StateStoreError::Backend {
            key: StateKey::step(session, index).to_string(),
            message: e.to_string(),
        })?;
        store.save(&StateKey::step(session, index), value).await
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStateProviderMemento {
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub states: BTreeMap<usize, BTreeMap<String, Value>>,
}

impl Default for StepStateProviderMemento {
    fn default() -> Self {
        Self {
            schema_version: current_schema_version(),
            states: BTreeMap::new(),
        }
    }
}

impl MementoRecord for StepStateProviderMemento {
    const COMPONENT: &'static str = "step state provider";

    fn schema_version(&self) -> u32 {
        self.schema_version
    }
}

impl Stateful for StepStateProvider {
    type Memento = StepStateProviderMemento;

    fn memento(&self) -> StepStateProviderMemento {
        StepStateProviderMemento {
            schema_version: current_schema_version(),
            states: self
                .states
                .iter()
                .map(|(index, state)| (*index, state.values.clone()))
                .collect(),
        }
    }

    fn set_memento(&mut self, memento: StepStateProviderMemento) -> Result<(), MementoError> {
        self.states = memento
            .states
            .into_iter()
            .map(|(index, values)| (index, StepState { values }))
            .collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memento;
    use crate::stores::InMemoryStateStore;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn states_are_created_lazily_per_index() {
        let mut provider = StepStateProvider::new();
        assert!(provider.state(0).is_none());
        provider.state_mut(0).set("STATE_BUCKET", &"b-1").unwrap();
        provider.state_mut(3).set("STATE_TRIES", &2).unwrap();
        assert_eq!(
            provider.state(0).unwrap().must_get::<String>("STATE_BUCKET").unwrap(),
            "b-1"
        );
        assert!(provider.state(1).is_none());
        assert_eq!(provider.state(3).unwrap().get::<u32>("STATE_TRIES").unwrap(), Some(2));
    }

    #[test]
    fn reset_drops_the_index_and_everything_after() {
        let mut provider = StepStateProvider::new();
        for index in 0..4 {
            provider.state_mut(index).set("n", &index).unwrap();
        }
        provider.reset_from(1);
        assert!(provider.state(0).is_some());
        assert!((1..4).all(|i| provider.state(i).is_none()));
    }

    #[test]
    fn memento_survives_json() {
        let mut provider = StepStateProvider::new();
        provider.state_mut(1).set("id", &"vol-123").unwrap();
        let json = memento::capture(&provider).unwrap();
        let mut restored = StepStateProvider::new();
        memento::restore(&mut restored, Some(&json)).unwrap();
        assert_eq!(restored, provider);
    }

    #[tokio::test]
    async fn durable_sync_round_trip() {
        let store = InMemoryStateStore::new();
        let mut provider = StepStateProvider::new();
        provider.state_mut(2).set("id", &"gw-9").unwrap();
        provider.save(&store, "sess", 2).await.unwrap();
        provider.save(&store, "sess", 5).await.unwrap();
        assert_eq!(store.len(), 1);

        let mut other = StepStateProvider::new();
        assert!(other.load(&store, "sess", 2).await.unwrap());
        assert!(!other.load(&store, "sess", 5).await.unwrap());
        assert_eq!(other.state(2), provider.state(2));
    }

    fn values_strategy() -> impl Strategy<Value = BTreeMap<usize, BTreeMap<String, i64>>> {
        prop::collection::btree_map(
            0usize..16,
            prop::collection::btree_map("[A-Z_]{1,10}", any::<i64>(), 0..4),
            0..6,
        )
    }

    proptest! {
        #[test]
        fn prop_set_memento_of_memento_is_noop(entries in values_strategy()) {
            let mut provider = StepStateProvider::new();
            for (index, values) in &entries {
                let state = provider.state_mut(*index);
                for (k, v) in values {
                    state.set(k.clone(), &json!(v)).unwrap();
                }
            }
            let before = provider.clone();
            let m = provider.memento();
            provider.set_memento(m).unwrap();
            prop_assert_eq!(provider, before);
        }
    }
}
