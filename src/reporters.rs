//! Observers that persist lifecycle events onto the instance record.

use async_trait::async_trait;
use std::sync::Arc;

use crate::observers::{
    ObserverError, StepLoopEvent, StepLoopObserver, WorkflowEvent, WorkflowObserver,
};
use crate::runtimes::instance_store::{InstanceStore, StepStatusChange, WorkflowStatusChange};
use crate::types::{StepStatus, WorkflowInstance, WorkflowStatus};

pub struct WorkflowReporter {
    store: Arc<dyn InstanceStore>,
}

impl WorkflowReporter {
    pub fn new(store: Arc<dyn InstanceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl WorkflowObserver for WorkflowReporter {
    async fn on_workflow_event(
        &self,
        instance: &WorkflowInstance,
        event: &WorkflowEvent,
    ) -> Result<(), ObserverError> {
        let (status, error) = match event {
            WorkflowEvent::WorkflowStarted | WorkflowEvent::WorkflowResuming => {
                (WorkflowStatus::InProgress, None)
            }
            WorkflowEvent::WorkflowPaused { .. } => (WorkflowStatus::Paused, None),
            WorkflowEvent::WorkflowPassed => (WorkflowStatus::Done, None),
            WorkflowEvent::WorkflowFailed { error } => (WorkflowStatus::Error, Some(error.clone())),
        };
        self.store
            .change_workflow_status(WorkflowStatusChange {
                instance_id: instance.id.clone(),
                status,
                error,
            })
            .await?;
        Ok(())
    }
}

/// Persists per-step status. One reporter serves every step of an instance.
pub struct StepReporter {
    store: Arc<dyn InstanceStore>,
}

impl StepReporter {
    pub fn new(store: Arc<dyn InstanceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StepLoopObserver for StepReporter {
    async fn on_step_event(
        &self,
        instance: &WorkflowInstance,
        index: usize,
        event: &StepLoopEvent,
    ) -> Result<(), ObserverError> {
        let change = |status| StepStatusChange::new(instance.id.clone(), index, status);
        let change = match event {
            StepLoopEvent::BeforeStepLoopTick | StepLoopEvent::AfterStepLoopTick => return Ok(()),
            StepLoopEvent::StepLoopStarted | StepLoopEvent::StepLoopStepResuming => {
                change(StepStatus::InProgress)
            }
            StepLoopEvent::StepLoopStepPausing {
                seconds,
                attempts_left,
            } => change(StepStatus::Paused).with_message(format!(
                "waiting {seconds}s, {attempts_left} attempts left"
            )),
            StepLoopEvent::StepLoopStepMaxPauseReached { max_attempts } => {
                change(StepStatus::InProgress)
                    .with_message(format!("gave up waiting after {max_attempts} attempts"))
            }
            StepLoopEvent::StepLoopSkipped => change(StepStatus::Skipped),
            StepLoopEvent::StepLoopRequestingGoTo { target } => {
                change(StepStatus::Done).with_message(format!("goto step {target}"))
            }
            StepLoopEvent::StepLoopPassed => change(StepStatus::Done),
            StepLoopEvent::StepLoopFailed { error } => {
                change(StepStatus::Error).with_error(error.clone())
            }
            StepLoopEvent::StepLoopMessage { text } => {
                change(StepStatus::InProgress).with_message(text.clone())
            }
        };
        self.store.change_step_status(change).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observers::Observers;
    use crate::runtimes::instance_store::{CreateInstanceRequest, InMemoryInstanceStore};
    use crate::types::{ErrorInfo, RequestContext, StepDescriptor};
    use serde_json::json;

    async fn setup() -> (Arc<InMemoryInstanceStore>, WorkflowInstance) {
        let store = Arc::new(InMemoryInstanceStore::new());
        store
            .define(
                "wf",
                1,
                vec![
                    StepDescriptor::new(0, "pass", 1),
                    StepDescriptor::new(1, "pass", 1),
                ],
            )
            .unwrap();
        let instance = store
            .create_instance(
                &RequestContext::default(),
                CreateInstanceRequest {
                    workflow_id: "wf".into(),
                    workflow_version: 1,
                    status: WorkflowStatus::NotStarted,
                },
                &json!({}),
            )
            .await
            .unwrap();
        (store, instance)
    }

    #[tokio::test]
    async fn goto_origin_is_done_with_a_message() {
        let (store, instance) = setup().await;
        let mut observers: Observers<dyn StepLoopObserver> = Observers::default();
        observers.push(Arc::new(StepReporter::new(store.clone())));

        for event in [
            StepLoopEvent::StepLoopStarted,
            StepLoopEvent::StepLoopRequestingGoTo { target: 1 },
            StepLoopEvent::StepLoopPassed,
        ] {
            observers.notify(&instance, 0, &event).await;
        }

        let stored = store.get(&instance.id).unwrap().unwrap();
        assert_eq!(stored.step_records[0].status, StepStatus::Done);
        assert_eq!(stored.step_records[0].message.as_deref(), Some("goto step 1"));
    }

    #[tokio::test]
    async fn failure_is_recorded_on_step_and_workflow() {
        let (store, instance) = setup().await;
        let error = ErrorInfo::msg("disk full");
        StepReporter::new(store.clone())
            .on_step_event(&instance, 1, &StepLoopEvent::StepLoopFailed { error: error.clone() })
            .await
            .unwrap();
        WorkflowReporter::new(store.clone())
            .on_workflow_event(&instance, &WorkflowEvent::WorkflowFailed { error: error.clone() })
            .await
            .unwrap();

        let stored = store.get(&instance.id).unwrap().unwrap();
        assert_eq!(stored.status, WorkflowStatus::Error);
        assert_eq!(stored.error, Some(error.clone()));
        assert_eq!(stored.step_records[1].error, Some(error));
        assert_eq!(stored.step_records[1].status, StepStatus::Error);
    }

    #[tokio::test]
    async fn tick_brackets_are_not_persisted() {
        let (store, instance) = setup().await;
        StepReporter::new(store.clone())
            .on_step_event(&instance, 0, &StepLoopEvent::BeforeStepLoopTick)
            .await
            .unwrap();
        assert_eq!(store.get(&instance.id).unwrap().unwrap().revision, 0);
    }
}
