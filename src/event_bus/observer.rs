use async_trait::async_trait;

use super::event::Event;
use crate::observers::{
    ObserverError, StepLoopEvent, StepLoopObserver, WorkflowEvent, WorkflowObserver,
};
use crate::types::WorkflowInstance;

/// Forwards lifecycle events onto an [`EventBus`](super::EventBus) channel.
///
/// Tick brackets are dropped; they carry no information for a reader.
#[derive(Clone)]
pub struct EventBusObserver {
    sender: flume::Sender<Event>,
}

impl EventBusObserver {
    pub fn new(sender: flume::Sender<Event>) -> Self {
        Self { sender }
    }

    fn send(&self, event: Event) -> Result<(), ObserverError> {
        self.sender.send(event).map_err(|e| ObserverError::Other {
            message: format!("event bus closed: {e}"),
        })
    }
}

#[async_trait]
impl WorkflowObserver for EventBusObserver {
    async fn on_workflow_event(
        &self,
        instance: &WorkflowInstance,
        event: &WorkflowEvent,
    ) -> Result<(), ObserverError> {
        self.send(Event::workflow(instance.id.clone(), event))
    }
}

#[async_trait]
impl StepLoopObserver for EventBusObserver {
    async fn on_step_event(
        &self,
        instance: &WorkflowInstance,
        index: usize,
        event: &StepLoopEvent,
    ) -> Result<(), ObserverError> {
        if matches!(
            event,
            StepLoopEvent::BeforeStepLoopTick | StepLoopEvent::AfterStepLoopTick
        ) {
            return Ok(());
        }
        self.send(Event::step(instance.id.clone(), index, event))
    }
}
