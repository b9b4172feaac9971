//! Fatal engine errors.
//!
//! These never become a `fail` decision: they are returned to whoever invoked
//! the tick and are not retried by the engine. Step failures take the other
//! route and travel inside [`Decision::Fail`](crate::workflow_loop::Decision::Fail).

use miette::Diagnostic;
use thiserror::Error;

use crate::memento::MementoError;
use crate::runtimes::instance_store::InstanceStoreError;
use crate::step::StepError;
use crate::types::StepKey;

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("trigger metadata is missing `{field}` and no session id was given")]
    #[diagnostic(
        code(steploom::engine::missing_trigger_field),
        help("A fresh trigger needs meta.workflowId and meta.workflowVersion.")
    )]
    MissingTriggerField { field: &'static str },

    #[error("no step implementation registered for {key}")]
    #[diagnostic(
        code(steploom::engine::unknown_step_template),
        help("Register a factory for this template id and version in the StepRegistry.")
    )]
    UnknownStepTemplate { key: StepKey },

    #[error("a step implementation is already registered for {key}")]
    #[diagnostic(code(steploom::engine::duplicate_step_template))]
    DuplicateStepTemplate { key: StepKey },

    #[error("step factory for {key} failed: {source}")]
    #[diagnostic(code(steploom::engine::step_factory))]
    StepFactory {
        key: StepKey,
        #[source]
        source: StepError,
    },

    #[error("step index {index} is outside the plan of {len} steps")]
    #[diagnostic(code(steploom::engine::step_index))]
    StepIndexOutOfRange { index: usize, len: usize },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Memento(#[from] MementoError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    InstanceStore(#[from] InstanceStoreError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
