//! Last-tick journal used to answer replayed invocations.
//!
//! An at-least-once scheduler may deliver the same continuation twice. The
//! journal remembers, per session, a fingerprint of the last tick input and
//! the output it produced; an identical input gets the recorded output back
//! without touching any step. Triggers that carry a `triggerId` are journaled
//! the same way, so a redelivered trigger does not create a second instance.
//!
//! The in-process copy holds at most `capacity` entries, oldest evicted
//! first. Finished sessions leave it as soon as their entry is in the
//! durable store.

use rustc_hash::{FxHashMap, FxHasher};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::hash::Hasher;
use std::sync::RwLock;

use super::tick::{TickInput, TickOutput};
use crate::observers::catch_if_error;
use crate::stores::{StateKey, StateStore, StateStoreError};

pub const DEFAULT_JOURNAL_CAPACITY: usize = 1024;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct JournalEntry {
    fingerprint: u64,
    output: TickOutput,
}

/// Stable hash of a tick input. `serde_json` maps are ordered, so equal
/// inputs always render to the same text.
pub(crate) fn fingerprint(tick: &TickInput) -> u64 {
    let mut hasher = FxHasher::default();
    match serde_json::to_vec(tick) {
        Ok(bytes) => hasher.write(&bytes),
        Err(e) => tracing::warn!(error = %e, "tick input not serializable; replay detection off"),
    }
    hasher.finish()
}

/// What a journal entry is filed under.
#[derive(Clone, Copy, Debug)]
pub(crate) enum JournalSlot<'a> {
    /// Continuation ticks of a session.
    Session(&'a str),
    /// The tick that created a session from a trigger with this id.
    Trigger(&'a str),
}

impl JournalSlot<'_> {
    fn map_key(&self) -> String {
        match self {
            JournalSlot::Session(session) => format!("session/{session}"),
            JournalSlot::Trigger(id) => format!("trigger/{id}"),
        }
    }

    fn state_key(&self) -> StateKey {
        match self {
            JournalSlot::Session(session) => StateKey::journal(*session),
            JournalSlot::Trigger(id) => StateKey::trigger(*id),
        }
    }
}

#[derive(Default)]
struct Entries {
    map: FxHashMap<String, JournalEntry>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
}

impl Entries {
    fn insert(&mut self, key: String, entry: JournalEntry, capacity: usize) {
        self.remove(&key);
        self.order.push_back(key.clone());
        self.map.insert(key, entry);
        while self.map.len() > capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.map.remove(&oldest);
        }
    }

    fn remove(&mut self, key: &str) {
        if self.map.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }
}

/// Entries live in process memory and, when a durable store is configured,
/// in that store as well.
pub struct TickJournal {
    entries: RwLock<Entries>,
    capacity: usize,
}

impl Default for TickJournal {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_JOURNAL_CAPACITY)
    }
}

impl TickJournal {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            capacity,
        }
    }

    pub(crate) async fn replayed(
        &self,
        slot: JournalSlot<'_>,
        fingerprint: u64,
        store: Option<&dyn StateStore>,
    ) -> Option<TickOutput> {
        let local = self
            .entries
            .read()
            .ok()
            .and_then(|entries| entries.map.get(&slot.map_key()).cloned());
        let entry = match (local, store) {
            (Some(entry), _) => Some(entry),
            (None, Some(store)) => match store.load(&slot.state_key()).await {
                Ok(value) => value.and_then(|v| serde_json::from_value::<JournalEntry>(v).ok()),
                Err(e) => {
                    catch_if_error(Err(e), "journal load");
                    None
                }
            },
            (None, None) => None,
        };
        entry
            .filter(|e| e.fingerprint == fingerprint)
            .map(|e| e.output)
    }

    pub(crate) async fn record(
        &self,
        slot: JournalSlot<'_>,
        fingerprint: u64,
        output: &TickOutput,
        store: Option<&dyn StateStore>,
    ) {
        let entry = JournalEntry {
            fingerprint,
            output: output.clone(),
        };
        let mut durable = false;
        if let Some(store) = store {
            let key = slot.state_key();
            let saved = match serde_json::to_value(&entry) {
                Ok(value) => store.save(&key, value).await,
                Err(e) => Err(StateStoreError::Backend {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
            };
            durable = saved.is_ok();
            catch_if_error(saved, "journal save");
        }

        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        if durable && output.decision().is_terminal() {
            entries.remove(&slot.map_key());
        } else {
            entries.insert(slot.map_key(), entry, self.capacity);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.read().map(|e| e.map.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::InMemoryStateStore;
    use crate::workflow_loop::Decision;
    use serde_json::json;

    fn output() -> TickOutput {
        TickOutput::new(&Decision::Loop, Default::default(), None)
    }

    fn passed() -> TickOutput {
        TickOutput::new(&Decision::Pass, Default::default(), None)
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = TickInput::trigger("wf", 1, json!({"x": 1}));
        let b = TickInput::trigger("wf", 1, json!({"x": 2}));
        assert_eq!(fingerprint(&a), fingerprint(&a.clone()));
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[tokio::test]
    async fn only_the_same_fingerprint_is_replayed() {
        let journal = TickJournal::default();
        journal.record(JournalSlot::Session("wi-1"), 42, &output(), None).await;
        let slot = JournalSlot::Session("wi-1");
        assert_eq!(journal.replayed(slot, 42, None).await, Some(output()));
        assert_eq!(journal.replayed(slot, 43, None).await, None);
        assert_eq!(journal.replayed(JournalSlot::Session("wi-2"), 42, None).await, None);
        assert_eq!(journal.replayed(JournalSlot::Trigger("wi-1"), 42, None).await, None);
    }

    #[tokio::test]
    async fn durable_copy_survives_a_new_process() {
        let backing = InMemoryStateStore::new();
        let store: &dyn StateStore = &backing;
        TickJournal::default()
            .record(JournalSlot::Session("wi-1"), 7, &output(), Some(store))
            .await;
        let fresh = TickJournal::default();
        let replayed = fresh.replayed(JournalSlot::Session("wi-1"), 7, Some(store)).await;
        assert_eq!(replayed, Some(output()));
        assert_eq!(backing.len(), 1);
    }

    #[tokio::test]
    async fn terminal_entries_leave_memory_once_durable() {
        let backing = InMemoryStateStore::new();
        let store: &dyn StateStore = &backing;
        let journal = TickJournal::default();
        journal.record(JournalSlot::Session("wi-1"), 1, &output(), Some(store)).await;
        assert_eq!(journal.len(), 1);
        journal.record(JournalSlot::Session("wi-1"), 2, &passed(), Some(store)).await;
        assert_eq!(journal.len(), 0);
        let replayed = journal.replayed(JournalSlot::Session("wi-1"), 2, Some(store)).await;
        assert_eq!(replayed, Some(passed()));
    }

    #[tokio::test]
    async fn terminal_entries_stay_without_a_durable_store() {
        let journal = TickJournal::default();
        journal.record(JournalSlot::Session("wi-1"), 2, &passed(), None).await;
        assert_eq!(journal.replayed(JournalSlot::Session("wi-1"), 2, None).await, Some(passed()));
    }

    #[tokio::test]
    async fn oldest_sessions_are_evicted_past_capacity() {
        let journal = TickJournal::with_capacity(2);
        for session in ["wi-1", "wi-2", "wi-3"] {
            journal.record(JournalSlot::Session(session), 1, &output(), None).await;
        }
        journal.record(JournalSlot::Session("wi-2"), 2, &output(), None).await;
        journal.record(JournalSlot::Session("wi-4"), 1, &output(), None).await;
        assert_eq!(journal.len(), 2);
        assert_eq!(journal.replayed(JournalSlot::Session("wi-1"), 1, None).await, None);
        assert_eq!(journal.replayed(JournalSlot::Session("wi-3"), 1, None).await, None);
        assert!(journal.replayed(JournalSlot::Session("wi-2"), 2, None).await.is_some());
        assert!(journal.replayed(JournalSlot::Session("wi-4"), 1, None).await.is_some());
    }
}
