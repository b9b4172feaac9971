//! Workflow-level state machine: walks the plan one step loop at a time and
//! turns each step result into a [`Decision`] for the caller.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::Result;
use crate::memento::{MementoError, MementoRecord, Stateful, current_schema_version};
use crate::observers::{Observers, WorkflowEvent, WorkflowObserver};
use crate::provider::StepLoopProvider;
use crate::scope::TickScope;
use crate::step_loop::StepLoopTick;
use crate::types::{ErrorInfo, WorkflowStatus};

/// What the caller should do after a tick. Exactly one per tick.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "camelCase")]
pub enum Decision {
    /// Tick again immediately.
    Loop,
    /// Tick again after `seconds`.
    Wait { seconds: u64 },
    /// The workflow finished.
    Pass,
    /// The workflow failed.
    Fail(ErrorInfo),
}

impl Decision {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Decision::Pass | Decision::Fail(_))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkflowLoopStatus {
    #[default]
    NotStarted,
    Running,
    WaitingOnStep,
    Done,
    Failed,
}

impl From<WorkflowLoopStatus> for WorkflowStatus {
    fn from(status: WorkflowLoopStatus) -> Self {
        match status {
            WorkflowLoopStatus::NotStarted => WorkflowStatus::NotStarted,
            WorkflowLoopStatus::Running => WorkflowStatus::InProgress,
            WorkflowLoopStatus::WaitingOnStep => WorkflowStatus::Paused,
            WorkflowLoopStatus::Done => WorkflowStatus::Done,
            WorkflowLoopStatus::Failed => WorkflowStatus::Error,
        }
    }
}

pub struct WorkflowLoop {
    provider: StepLoopProvider,
    status: WorkflowLoopStatus,
    failure: Option<ErrorInfo>,
    observers: Observers<dyn WorkflowObserver>,
}

impl WorkflowLoop {
    pub fn new(provider: StepLoopProvider) -> Self {
        Self {
            provider,
            status: WorkflowLoopStatus::NotStarted,
            failure: None,
            observers: Observers::default(),
        }
    }

    pub fn status(&self) -> WorkflowLoopStatus {
        self.status
    }

    pub fn provider(&self) -> &StepLoopProvider {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut StepLoopProvider {
        &mut self.provider
    }

    pub fn observers_mut(&mut self) -> &mut Observers<dyn WorkflowObserver> {
        &mut self.observers
    }

    /// Advance the workflow by one step tick.
    ///
    /// Fatal errors (unknown template, inconsistent memento) are returned as
    /// `Err`; everything a step does wrong ends up in [`Decision::Fail`].
    #[instrument(skip_all, fields(instance = %scope.instance.id, status = ?self.status))]
    pub async fn tick(&mut self, scope: &mut TickScope<'_>) -> Result<Decision> {
        let instance = scope.instance;
        match self.status {
            WorkflowLoopStatus::Done => return Ok(Decision::Pass),
            WorkflowLoopStatus::Failed => {
                let error = self
                    .failure
                    .clone()
                    .unwrap_or_else(|| ErrorInfo::msg("workflow failed"));
                return Ok(Decision::Fail(error));
            }
            WorkflowLoopStatus::NotStarted => {
                self.status = WorkflowLoopStatus::Running;
                tracing::info!(steps = instance.step_count(), "workflow started");
                self.observers
                    .notify(instance, &WorkflowEvent::WorkflowStarted)
                    .await;
            }
            WorkflowLoopStatus::WaitingOnStep => {
                self.status = WorkflowLoopStatus::Running;
                self.observers
                    .notify(instance, &WorkflowEvent::WorkflowResuming)
                    .await;
            }
            WorkflowLoopStatus::Running => {}
        }

        let index = self.provider.current_index();
        if index >= instance.step_count() {
            return Ok(self.finish(scope).await);
        }

        scope.workflow_status = self.status.into();
        let result = {
            let step_loop = self.provider.get_or_create(index, instance)?;
            step_loop.tick(scope).await
        };

        let decision = match result {
            StepLoopTick::Passed { goto } => {
                let next = goto.unwrap_or(index + 1);
                if next <= index {
                    scope.reset_steps_from(next).await;
                }
                self.provider.advance_to(next);
                if next >= instance.step_count() {
                    self.finish(scope).await
                } else {
                    Decision::Loop
                }
            }
            StepLoopTick::Skipped => {
                self.provider.advance_to(index + 1);
                if index + 1 >= instance.step_count() {
                    self.finish(scope).await
                } else {
                    Decision::Loop
                }
            }
            StepLoopTick::Started => Decision::Loop,
            StepLoopTick::Waiting { seconds } => {
                self.status = WorkflowLoopStatus::WaitingOnStep;
                self.observers
                    .notify(instance, &WorkflowEvent::WorkflowPaused { seconds })
                    .await;
                Decision::Wait { seconds }
            }
            StepLoopTick::Failed(error) => {
                self.status = WorkflowLoopStatus::Failed;
                self.failure = Some(error.clone());
                tracing::error!(step = index, error = %error, "workflow failed");
                self.observers
                    .notify(
                        instance,
                        &WorkflowEvent::WorkflowFailed {
                            error: error.clone(),
                        },
                    )
                    .await;
                Decision::Fail(error)
            }
        };
        Ok(decision)
    }

    async fn finish(&mut self, scope: &TickScope<'_>) -> Decision {
        self.status = WorkflowLoopStatus::Done;
        tracing::info!("workflow passed");
        self.observers
            .notify(scope.instance, &WorkflowEvent::WorkflowPassed)
            .await;
        Decision::Pass
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowLoopMemento {
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub status: WorkflowLoopStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ErrorInfo>,
}

impl Default for WorkflowLoopMemento {
    fn default() -> Self {
        Self {
            schema_version: current_schema_version(),
            status: WorkflowLoopStatus::NotStarted,
            failure: None,
        }
    }
}

impl MementoRecord for WorkflowLoopMemento {
    const COMPONENT: &'static str = "workflow loop";

    fn schema_version(&self) -> u32 {
        self.schema_version
    }
}

impl Stateful for WorkflowLoop {
    type Memento = WorkflowLoopMemento;

    fn memento(&self) -> WorkflowLoopMemento {
        WorkflowLoopMemento {
            schema_version: current_schema_version(),
            status: self.status,
            failure: self.failure.clone(),
        }
    }

    fn set_memento(
        &mut self,
        memento: WorkflowLoopMemento,
    ) -> std::result::Result<(), MementoError> {
        if memento.status == WorkflowLoopStatus::Failed && memento.failure.is_none() {
            return Err(MementoError::Inconsistent {
                component: WorkflowLoopMemento::COMPONENT,
                message: "workflow is failed but carries no error".into(),
            });
        }
        self.status = memento.status;
        self.failure = memento.failure;
        Ok(())
    }
}
