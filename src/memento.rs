/*!
Memento codec: explicit serde records for every stateful engine component.

A memento is the plain JSON snapshot a component hands back at the end of a
tick and receives again at the start of the next one. Each record type
carries a `schemaVersion`; decoding refuses records written by a newer
engine instead of silently dropping fields it does not know.

Absent or `null` values decode to the record's `Default`, which is what a
component that never ran reports, so the very first tick needs no special
casing.
*/

use miette::Diagnostic;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Schema version written by this build.
pub const MEMENTO_SCHEMA_VERSION: u32 = 1;

pub(crate) fn current_schema_version() -> u32 {
    MEMENTO_SCHEMA_VERSION
}

#[derive(Debug, Error, Diagnostic)]
pub enum MementoError {
    #[error("{component} memento has schema version {found}, this engine reads up to {supported}")]
    #[diagnostic(
        code(steploom::memento::unsupported_version),
        help("A newer engine wrote this continuation; resume it with that engine version.")
    )]
    UnsupportedVersion {
        component: &'static str,
        found: u32,
        supported: u32,
    },

    #[error("{component} memento is malformed: {source}")]
    #[diagnostic(
        code(steploom::memento::serde),
        help("Ensure the continuation passed back is the unmodified output of the previous tick.")
    )]
    Serde {
        component: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{component} memento is inconsistent: {message}")]
    #[diagnostic(code(steploom::memento::inconsistent))]
    Inconsistent {
        component: &'static str,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, MementoError>;

/// A serializable memento record.
pub trait MementoRecord: Serialize + DeserializeOwned + Default {
    /// Name used in error messages.
    const COMPONENT: &'static str;

    fn schema_version(&self) -> u32;
}

/// A component whose in-memory state can be captured and restored.
///
/// `set_memento(memento())` must leave the component unchanged.
pub trait Stateful {
    type Memento: MementoRecord;

    fn memento(&self) -> Self::Memento;

    fn set_memento(&mut self, memento: Self::Memento) -> Result<()>;
}

/// Encode a memento record into a JSON value.
pub fn encode<M: MementoRecord>(memento: &M) -> Result<Value> {
    serde_json::to_value(memento).map_err(|source| MementoError::Serde {
        component: M::COMPONENT,
        source,
    })
}

/// Decode a memento record; `None` and `null` yield the default record.
pub fn decode<M: MementoRecord>(value: Option<&Value>) -> Result<M> {
    let memento: M = match value {
        None | Some(Value::Null) => return Ok(M::default()),
        Some(v) => M::deserialize(v).map_err(|source| MementoError::Serde {
            component: M::COMPONENT,
            source,
        })?,
    };
    if memento.schema_version() > MEMENTO_SCHEMA_VERSION {
        return Err(MementoError::UnsupportedVersion {
            component: M::COMPONENT,
            found: memento.schema_version(),
            supported: MEMENTO_SCHEMA_VERSION,
        });
    }
    Ok(memento)
}

/// Capture a component's state straight into JSON.
pub fn capture<S: Stateful>(component: &S) -> Result<Value> {
    encode(&component.memento())
}

/// Restore a component from an optional JSON memento.
pub fn restore<S: Stateful>(component: &mut S, value: Option<&Value>) -> Result<()> {
    let memento = decode::<S::Memento>(value)?;
    component.set_memento(memento)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct CounterMemento {
        #[serde(default = "current_schema_version")]
        schema_version: u32,
        #[serde(default)]
        count: u32,
    }

    impl MementoRecord for CounterMemento {
        const COMPONENT: &'static str = "counter";

        fn schema_version(&self) -> u32 {
            self.schema_version
        }
    }

    #[test]
    fn absent_and_null_decode_to_default() {
        assert_eq!(decode::<CounterMemento>(None).unwrap(), CounterMemento::default());
        assert_eq!(
            decode::<CounterMemento>(Some(&Value::Null)).unwrap(),
            CounterMemento::default()
        );
    }

    #[test]
    fn empty_object_decodes_with_current_version() {
        let m = decode::<CounterMemento>(Some(&json!({}))).unwrap();
        assert_eq!(m.schema_version, MEMENTO_SCHEMA_VERSION);
        assert_eq!(m.count, 0);
    }

    #[test]
    fn newer_schema_is_rejected() {
        let err = decode::<CounterMemento>(Some(&json!({"schemaVersion": 99, "count": 1})))
            .unwrap_err();
        assert!(matches!(
            err,
            MementoError::UnsupportedVersion { component: "counter", found: 99, .. }
        ));
    }

    #[test]
    fn malformed_record_names_component() {
        let err = decode::<CounterMemento>(Some(&json!({"count": "many"}))).unwrap_err();
        assert!(err.to_string().starts_with("counter memento is malformed"));
    }
}
