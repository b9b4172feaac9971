//! Per-step state machine.
//!
//! ```text
//! NotStarted ──start──▶ Running ──▶ Passed | Failed | Skipped
//!                          │  ▲
//!                    wait  ▼  │ check true / then_call
//!                     WaitingOnCheck ──attempts exhausted──▶ otherwise_call | Failed
//! ```
//!
//! Terminal states are sticky: ticking a passed, failed or skipped loop again
//! reports the same result without touching the step implementation, which is
//! what makes replayed ticks harmless.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::memento::{MementoError, MementoRecord, Stateful, current_schema_version};
use crate::observers::{Observers, StepLoopEvent, StepLoopObserver};
use crate::scope::TickScope;
use crate::step::{Step, StepError, StepOutcome, StepResult, WaitSpec};
use crate::types::{ErrorInfo, StepDescriptor};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepLoopStatus {
    #[default]
    NotStarted,
    Running,
    WaitingOnCheck,
    Passed,
    Failed,
    Skipped,
}

impl StepLoopStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepLoopStatus::Passed | StepLoopStatus::Failed | StepLoopStatus::Skipped
        )
    }
}

/// Result of one step loop tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepLoopTick {
    Skipped,
    /// Waiting with a zero-second interval: tick again right away.
    Started,
    Waiting { seconds: u64 },
    Passed { goto: Option<usize> },
    Failed(ErrorInfo),
}

pub struct StepLoop {
    descriptor: StepDescriptor,
    step: Box<dyn Step>,
    plan_len: usize,
    status: StepLoopStatus,
    wait: Option<WaitSpec>,
    goto: Option<usize>,
    error: Option<ErrorInfo>,
    observers: Observers<dyn StepLoopObserver>,
}

impl StepLoop {
    pub fn new(descriptor: StepDescriptor, step: Box<dyn Step>, plan_len: usize) -> Self {
        Self {
            descriptor,
            step,
            plan_len,
            status: StepLoopStatus::NotStarted,
            wait: None,
            goto: None,
            error: None,
            observers: Observers::default(),
        }
    }

    pub fn index(&self) -> usize {
        self.descriptor.index
    }

    pub fn descriptor(&self) -> &StepDescriptor {
        &self.descriptor
    }

    pub fn status(&self) -> StepLoopStatus {
        self.status
    }

    pub fn wait_spec(&self) -> Option<&WaitSpec> {
        self.wait.as_ref()
    }

    pub fn observers_mut(&mut self) -> &mut Observers<dyn StepLoopObserver> {
        &mut self.observers
    }

    /// Run one unit of this step's work, bracketed by a durable state sync.
    #[instrument(skip_all, fields(step = self.descriptor.index, status = ?self.status))]
    pub async fn tick(&mut self, scope: &mut TickScope<'_>) -> StepLoopTick {
        if self.status.is_terminal() {
            return self.settled();
        }

        let index = self.descriptor.index;
        self.observers
            .notify(scope.instance, index, &StepLoopEvent::BeforeStepLoopTick)
            .await;
        scope.load_for_step(index).await;

        let result = match self.status {
            StepLoopStatus::WaitingOnCheck => self.run_check(scope).await,
            _ => self.run_start(scope).await,
        };

        scope.save_for_step(index).await;
        self.observers
            .notify(scope.instance, index, &StepLoopEvent::AfterStepLoopTick)
            .await;
        result
    }

    /// The stored result of a passed, skipped or failed loop.
    fn settled(&self) -> StepLoopTick {
        match self.status {
            StepLoopStatus::Skipped => StepLoopTick::Skipped,
            StepLoopStatus::Failed => StepLoopTick::Failed(
                self.error
                    .clone()
                    .unwrap_or_else(|| ErrorInfo::msg("step failed")),
            ),
            _ => StepLoopTick::Passed { goto: self.goto },
        }
    }

    async fn run_start(&mut self, scope: &mut TickScope<'_>) -> StepLoopTick {
        let index = self.descriptor.index;
        if self.descriptor.skippable {
            let skip = {
                let mut ctx = scope.step_context(&self.descriptor, &self.observers);
                self.step.should_skip(&mut ctx).await
            };
            match skip {
                Ok(true) => {
                    self.status = StepLoopStatus::Skipped;
                    tracing::info!(step = index, "step skipped");
                    self.observers
                        .notify(scope.instance, index, &StepLoopEvent::StepLoopSkipped)
                        .await;
                    return StepLoopTick::Skipped;
                }
                Ok(false) => {}
                Err(e) => return self.fail(e, scope).await,
            }
        }

        self.status = StepLoopStatus::Running;
        tracing::info!(step = index, template = %self.descriptor.key(), "step started");
        self.observers
            .notify(scope.instance, index, &StepLoopEvent::StepLoopStarted)
            .await;

        let outcome = {
            let mut ctx = scope.step_context(&self.descriptor, &self.observers);
            self.step.start(&mut ctx).await
        };
        self.apply(outcome, scope).await
    }

    async fn run_check(&mut self, scope: &mut TickScope<'_>) -> StepLoopTick {
        let index = self.descriptor.index;
        let Some(mut wait) = self.wait.clone() else {
            let e = StepError::InvalidWait {
                reason: "step is waiting without a wait specification".into(),
            };
            return self.fail(e, scope).await;
        };

        self.observers
            .notify(scope.instance, index, &StepLoopEvent::StepLoopStepResuming)
            .await;

        let checked = {
            let mut ctx = scope.step_context(&self.descriptor, &self.observers);
            self.step.check(&wait.check_method, &mut ctx).await
        };

        match checked {
            Err(e) => self.fail(e, scope).await,
            Ok(true) => {
                self.wait = None;
                self.status = StepLoopStatus::Running;
                match wait.then_call.as_deref() {
                    Some(method) => {
                        let outcome = self.call(method, scope).await;
                        self.apply(outcome, scope).await
                    }
                    None => self.pass(None, scope).await,
                }
            }
            Ok(false) => {
                wait.counter = wait.counter.saturating_sub(1);
                if wait.counter > 0 {
                    return self.pause(wait, scope).await;
                }

                tracing::warn!(
                    step = index,
                    attempts = wait.max_attempts,
                    "wait attempts exhausted"
                );
                self.observers
                    .notify(
                        scope.instance,
                        index,
                        &StepLoopEvent::StepLoopStepMaxPauseReached {
                            max_attempts: wait.max_attempts,
                        },
                    )
                    .await;
                self.wait = None;
                self.status = StepLoopStatus::Running;
                match wait.otherwise_call.as_deref() {
                    Some(method) => {
                        let outcome = self.call(method, scope).await;
                        self.apply(outcome, scope).await
                    }
                    None => {
                        let e = StepError::Timeout {
                            index,
                            check_method: wait.check_method.clone(),
                            attempts: wait.max_attempts,
                        };
                        self.fail(e, scope).await
                    }
                }
            }
        }
    }

    async fn call(&mut self, method: &str, scope: &mut TickScope<'_>) -> StepResult<StepOutcome> {
        let mut ctx = scope.step_context(&self.descriptor, &self.observers);
        self.step.call(method, &mut ctx).await
    }

    async fn apply(
        &mut self,
        outcome: StepResult<StepOutcome>,
        scope: &mut TickScope<'_>,
    ) -> StepLoopTick {
        match outcome {
            Ok(StepOutcome::Pass) => self.pass(None, scope).await,
            Ok(StepOutcome::GoTo(target)) => {
                if target >= self.plan_len {
                    let e = StepError::InvalidGoTo {
                        target,
                        len: self.plan_len,
                    };
                    return self.fail(e, scope).await;
                }
                self.observers
                    .notify(
                        scope.instance,
                        self.descriptor.index,
                        &StepLoopEvent::StepLoopRequestingGoTo { target },
                    )
                    .await;
                self.pass(Some(target), scope).await
            }
            Ok(StepOutcome::Wait(mut spec)) => {
                if let Err(e) = spec.validate() {
                    return self.fail(e, scope).await;
                }
                spec.counter = spec.max_attempts;
                self.pause(spec, scope).await
            }
            Err(e) => self.fail(e, scope).await,
        }
    }

    async fn pause(&mut self, wait: WaitSpec, scope: &mut TickScope<'_>) -> StepLoopTick {
        let seconds = wait.seconds;
        let attempts_left = wait.counter;
        self.status = StepLoopStatus::WaitingOnCheck;
        self.wait = Some(wait);
        self.observers
            .notify(
                scope.instance,
                self.descriptor.index,
                &StepLoopEvent::StepLoopStepPausing {
                    seconds,
                    attempts_left,
                },
            )
            .await;
        if seconds == 0 {
            StepLoopTick::Started
        } else {
            StepLoopTick::Waiting { seconds }
        }
    }

    async fn pass(&mut self, goto: Option<usize>, scope: &mut TickScope<'_>) -> StepLoopTick {
        self.status = StepLoopStatus::Passed;
        self.goto = goto;
        self.wait = None;
        tracing::info!(step = self.descriptor.index, ?goto, "step passed");
        self.observers
            .notify(scope.instance, self.descriptor.index, &StepLoopEvent::StepLoopPassed)
            .await;
        StepLoopTick::Passed { goto }
    }

    /// Run the compensation hook, then settle in `Failed`. A failing hook is
    /// logged; the original error is the one reported.
    async fn fail(&mut self, error: StepError, scope: &mut TickScope<'_>) -> StepLoopTick {
        let index = self.descriptor.index;
        let info = ErrorInfo::from_error(&error, scope.stack_limit);
        tracing::error!(step = index, error = %info, "step failed");

        let hook = {
            let mut ctx = scope.step_context(&self.descriptor, &self.observers);
            self.step.on_fail(&mut ctx, &error).await
        };
        if let Err(hook_error) = hook {
            tracing::warn!(step = index, error = %hook_error, "on_fail hook failed");
        }

        self.status = StepLoopStatus::Failed;
        self.wait = None;
        self.error = Some(info.clone());
        self.observers
            .notify(
                scope.instance,
                index,
                &StepLoopEvent::StepLoopFailed {
                    error: info.clone(),
                },
            )
            .await;
        StepLoopTick::Failed(info)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepLoopMemento {
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub status: StepLoopStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<WaitSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goto: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl Default for StepLoopMemento {
    fn default() -> Self {
        Self {
            schema_version: current_schema_version(),
            status: StepLoopStatus::NotStarted,
            wait: None,
            goto: None,
            error: None,
        }
    }
}

impl MementoRecord for StepLoopMemento {
    const COMPONENT: &'static str = "step loop";

    fn schema_version(&self) -> u32 {
        self.schema_version
    }
}

impl Stateful for StepLoop {
    type Memento = StepLoopMemento;

    fn memento(&self) -> StepLoopMemento {
        StepLoopMemento {
            schema_version: current_schema_version(),
            status: self.status,
            wait: self.wait.clone(),
            goto: self.goto,
            error: self.error.clone(),
        }
    }

    fn set_memento(&mut self, memento: StepLoopMemento) -> Result<(), MementoError> {
        if memento.status == StepLoopStatus::WaitingOnCheck && memento.wait.is_none() {
            return Err(MementoError::Inconsistent {
                component: StepLoopMemento::COMPONENT,
                message: format!("step {} is waiting but has no wait spec", self.descriptor.index),
            });
        }
        self.status = memento.status;
        self.wait = memento.wait;
        self.goto = memento.goto;
        self.error = memento.error;
        Ok(())
    }
}
