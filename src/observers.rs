//! Lifecycle events and the observer interfaces that consume them.
//!
//! The loops notify observers synchronously, in registration order, at every
//! transition. Observers never influence a tick: an observer error is logged
//! and dropped (see [`catch_if_error`]).

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::runtimes::instance_store::InstanceStoreError;
use crate::types::{ErrorInfo, WorkflowInstance};

/// Workflow-level transitions.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum WorkflowEvent {
    WorkflowStarted,
    WorkflowPaused { seconds: u64 },
    WorkflowResuming,
    WorkflowPassed,
    WorkflowFailed { error: ErrorInfo },
}

impl WorkflowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::WorkflowStarted => "workflowStarted",
            WorkflowEvent::WorkflowPaused { .. } => "workflowPaused",
            WorkflowEvent::WorkflowResuming => "workflowResuming",
            WorkflowEvent::WorkflowPassed => "workflowPassed",
            WorkflowEvent::WorkflowFailed { .. } => "workflowFailed",
        }
    }
}

/// Step-level transitions, plus the tick brackets and step messages.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum StepLoopEvent {
    BeforeStepLoopTick,
    AfterStepLoopTick,
    StepLoopStarted,
    StepLoopSkipped,
    StepLoopStepPausing { seconds: u64, attempts_left: u32 },
    StepLoopStepResuming,
    StepLoopStepMaxPauseReached { max_attempts: u32 },
    StepLoopPassed,
    StepLoopFailed { error: ErrorInfo },
    StepLoopRequestingGoTo { target: usize },
    StepLoopMessage { text: String },
}

impl StepLoopEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StepLoopEvent::BeforeStepLoopTick => "beforeStepLoopTick",
            StepLoopEvent::AfterStepLoopTick => "afterStepLoopTick",
            StepLoopEvent::StepLoopStarted => "stepLoopStarted",
            StepLoopEvent::StepLoopSkipped => "stepLoopSkipped",
            StepLoopEvent::StepLoopStepPausing { .. } => "stepLoopStepPausing",
            StepLoopEvent::StepLoopStepResuming => "stepLoopStepResuming",
            StepLoopEvent::StepLoopStepMaxPauseReached { .. } => "stepLoopStepMaxPauseReached",
            StepLoopEvent::StepLoopPassed => "stepLoopPassed",
            StepLoopEvent::StepLoopFailed { .. } => "stepLoopFailed",
            StepLoopEvent::StepLoopRequestingGoTo { .. } => "stepLoopRequestingGoTo",
            StepLoopEvent::StepLoopMessage { .. } => "stepLoopMessage",
        }
    }
}

impl fmt::Display for WorkflowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowEvent::WorkflowPaused { seconds } => write!(f, "{} ({seconds}s)", self.name()),
            WorkflowEvent::WorkflowFailed { error } => write!(f, "{}: {error}", self.name()),
            _ => f.write_str(self.name()),
        }
    }
}

impl fmt::Display for StepLoopEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepLoopEvent::StepLoopStepPausing {
                seconds,
                attempts_left,
            } => write!(f, "{} ({seconds}s, {attempts_left} attempts left)", self.name()),
            StepLoopEvent::StepLoopFailed { error } => write!(f, "{}: {error}", self.name()),
            StepLoopEvent::StepLoopRequestingGoTo { target } => {
                write!(f, "{} -> step {target}", self.name())
            }
            StepLoopEvent::StepLoopMessage { text } => write!(f, "{}: {text}", self.name()),
            _ => f.write_str(self.name()),
        }
    }
}

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum ObserverError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] InstanceStoreError),

    #[error("observer failed: {message}")]
    #[diagnostic(code(steploom::observer::other))]
    Other { message: String },
}

#[async_trait]
pub trait WorkflowObserver: Send + Sync {
    async fn on_workflow_event(
        &self,
        instance: &WorkflowInstance,
        event: &WorkflowEvent,
    ) -> Result<(), ObserverError>;
}

#[async_trait]
pub trait StepLoopObserver: Send + Sync {
    async fn on_step_event(
        &self,
        instance: &WorkflowInstance,
        index: usize,
        event: &StepLoopEvent,
    ) -> Result<(), ObserverError>;
}

/// Log-and-drop for results whose failure must not affect the tick.
pub fn catch_if_error<E: fmt::Display>(result: Result<(), E>, what: &str) {
    if let Err(e) = result {
        tracing::warn!(target: "steploom::observers", error = %e, "{what} failed; continuing");
    }
}

/// Ordered list of observers of one kind.
pub struct Observers<O: ?Sized> {
    list: Vec<Arc<O>>,
}

impl<O: ?Sized> Default for Observers<O> {
    fn default() -> Self {
        Self { list: Vec::new() }
    }
}

impl<O: ?Sized> Clone for Observers<O> {
    fn clone(&self) -> Self {
        Self {
            list: self.list.clone(),
        }
    }
}

impl<O: ?Sized> Observers<O> {
    pub fn push(&mut self, observer: Arc<O>) {
        self.list.push(observer);
    }

    /// Append every observer of `other`, keeping order.
    pub fn extend_from(&mut self, other: &Self) {
        self.list.extend(other.list.iter().cloned());
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

impl Observers<dyn WorkflowObserver> {
    pub async fn notify(&self, instance: &WorkflowInstance, event: &WorkflowEvent) {
        tracing::debug!(instance = %instance.id, event = %event, "workflow event");
        for observer in &self.list {
            catch_if_error(
                observer.on_workflow_event(instance, event).await,
                event.name(),
            );
        }
    }
}

impl Observers<dyn StepLoopObserver> {
    pub async fn notify(&self, instance: &WorkflowInstance, index: usize, event: &StepLoopEvent) {
        tracing::debug!(instance = %instance.id, step = index, event = %event, "step event");
        for observer in &self.list {
            catch_if_error(
                observer.on_step_event(instance, index, event).await,
                event.name(),
            );
        }
    }
}
