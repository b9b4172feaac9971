//! Key-value stores carried across ticks.
//!
//! - [`WorkflowPayload`]: workflow-wide input plus shared `meta` and `output` areas.
//! - [`StepState`]: per-step scratch space, handed out by [`StepStateProvider`].
//! - [`StateStore`]: optional durable backend the payload and step state are
//!   synced with around every step tick.
//!
//! Both in-memory stores travel inside the tick continuation as mementos; the
//! durable backend only refreshes them.

pub mod payload;
pub mod state_store;
pub mod step_state;

pub use payload::{WorkflowPayload, WorkflowPayloadMemento};
pub use state_store::{InMemoryStateStore, StateKey, StateStore, StateStoreError};
pub use step_state::{StepState, StepStateProvider, StepStateProviderMemento};

use miette::Diagnostic;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Errors raised by typed access to payload or step-state values.
#[derive(Debug, Error, Diagnostic)]
pub enum StateError {
    #[error("required key `{key}` is missing")]
    #[diagnostic(
        code(steploom::state::missing_key),
        help("Set the key in an earlier step or provide it in the workflow input.")
    )]
    MissingKey { key: String },

    #[error("value under `{key}` has an unexpected shape: {source}")]
    #[diagnostic(code(steploom::state::shape))]
    Shape {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

pub(crate) fn from_value<T: DeserializeOwned>(key: &str, value: &Value) -> Result<T, StateError> {
    T::deserialize(value).map_err(|source| StateError::Shape {
        key: key.to_string(),
        source,
    })
}

pub(crate) fn to_value<T: Serialize>(key: &str, value: &T) -> Result<Value, StateError> {
    serde_json::to_value(value).map_err(|source| StateError::Shape {
        key: key.to_string(),
        source,
    })
}
