use std::fmt;

use crate::observers::{StepLoopEvent, WorkflowEvent};
use crate::types::ErrorInfo;

/// Item carried on the event bus.
#[derive(Clone, Debug)]
pub enum Event {
    Workflow(WorkflowRecord),
    Step(StepRecordEvent),
}

impl Event {
    pub fn workflow(instance_id: impl Into<String>, event: &WorkflowEvent) -> Self {
        let error = match event {
            WorkflowEvent::WorkflowFailed { error } => Some(error.clone()),
            _ => None,
        };
        Event::Workflow(WorkflowRecord {
            instance_id: instance_id.into(),
            message: event.to_string(),
            error,
        })
    }

    pub fn step(instance_id: impl Into<String>, index: usize, event: &StepLoopEvent) -> Self {
        let error = match event {
            StepLoopEvent::StepLoopFailed { error } => Some(error.clone()),
            _ => None,
        };
        Event::Step(StepRecordEvent {
            instance_id: instance_id.into(),
            index,
            message: event.to_string(),
            error,
        })
    }

    /// Label the formatter prints once per run of events with the same scope.
    pub fn scope_label(&self) -> &str {
        match self {
            Event::Workflow(w) => &w.instance_id,
            Event::Step(s) => &s.instance_id,
        }
    }

    /// The failure a `*Failed` event carries.
    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            Event::Workflow(w) => w.error.as_ref(),
            Event::Step(s) => s.error.as_ref(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Workflow(w) => write!(f, "[workflow] {}", w.message),
            Event::Step(s) => write!(f, "[step {}] {}", s.index, s.message),
        }
    }
}

#[derive(Clone, Debug)]
pub struct WorkflowRecord {
    pub instance_id: String,
    pub message: String,
    pub error: Option<ErrorInfo>,
}

#[derive(Clone, Debug)]
pub struct StepRecordEvent {
    pub instance_id: String,
    pub index: usize,
    pub message: String,
    pub error: Option<ErrorInfo>,
}
