//! The contract every step implementation fulfils.
//!
//! A step is rebuilt from its factory on every tick; anything it needs to
//! remember between ticks goes into its [`StepState`] or the shared
//! [`WorkflowPayload`]. Poll loops are declared with a [`WaitSpec`] naming
//! the methods to call later, which keeps the whole wait serializable.

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::container::ServiceContainer;
use crate::observers::{Observers, StepLoopEvent, StepLoopObserver};
use crate::stores::{StateError, StepState, WorkflowPayload};
use crate::types::{StepDescriptor, WorkflowInstance, WorkflowStatus};

#[derive(Debug, Error, Diagnostic)]
pub enum StepError {
    #[error("{message}")]
    #[diagnostic(code(steploom::step::failed))]
    Failed { message: String },

    #[error("step {index} timed out waiting on `{check_method}` after {attempts} attempts")]
    #[diagnostic(
        code(steploom::step::timeout),
        help("Raise max_attempts, lengthen the wait, or provide an otherwise_call branch.")
    )]
    Timeout {
        index: usize,
        check_method: String,
        attempts: u32,
    },

    #[error("step does not implement method `{method}`")]
    #[diagnostic(
        code(steploom::step::unknown_method),
        help("Every method named by a WaitSpec must be handled by the step's call/check.")
    )]
    UnknownMethod { method: String },

    #[error("invalid wait request: {reason}")]
    #[diagnostic(code(steploom::step::invalid_wait))]
    InvalidWait { reason: String },

    #[error("goto target {target} is outside the plan of {len} steps")]
    #[diagnostic(code(steploom::step::invalid_goto))]
    InvalidGoTo { target: usize, len: usize },

    #[error(transparent)]
    #[diagnostic(transparent)]
    State(#[from] StateError),

    #[error("{context}")]
    #[diagnostic(code(steploom::step::source))]
    Source {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StepError {
    pub fn failed(message: impl Into<String>) -> Self {
        StepError::Failed {
            message: message.into(),
        }
    }

    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        StepError::Source {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

pub type StepResult<T> = std::result::Result<T, StepError>;

/// Request to poll `check_method` every `seconds`, at most `max_attempts` times.
///
/// `counter` counts down from `max_attempts`; it is owned by the step loop and
/// persisted with it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitSpec {
    pub seconds: u64,
    pub max_attempts: u32,
    pub check_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub then_call: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otherwise_call: Option<String>,
    #[serde(default)]
    pub counter: u32,
}

impl WaitSpec {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 1;

    /// `WaitSpec::seconds(20).max_attempts(60).until("is_ready").then_call("finish")`
    pub fn seconds(seconds: u64) -> Self {
        Self {
            seconds,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            check_method: String::new(),
            then_call: None,
            otherwise_call: None,
            counter: 0,
        }
    }

    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn until(mut self, check_method: impl Into<String>) -> Self {
        self.check_method = check_method.into();
        self
    }

    #[must_use]
    pub fn then_call(mut self, method: impl Into<String>) -> Self {
        self.then_call = Some(method.into());
        self
    }

    #[must_use]
    pub fn otherwise_call(mut self, method: impl Into<String>) -> Self {
        self.otherwise_call = Some(method.into());
        self
    }

    pub(crate) fn validate(&self) -> StepResult<()> {
        if self.check_method.is_empty() {
            return Err(StepError::InvalidWait {
                reason: "no check method given (use `until`)".into(),
            });
        }
        if self.max_attempts == 0 {
            return Err(StepError::InvalidWait {
                reason: "max_attempts must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// What a step asks the loop to do next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step is finished.
    Pass,
    /// Enter (or continue) a poll loop.
    Wait(WaitSpec),
    /// Finished; continue the workflow at the given plan index.
    GoTo(usize),
}

impl From<WaitSpec> for StepOutcome {
    fn from(spec: WaitSpec) -> Self {
        StepOutcome::Wait(spec)
    }
}

/// Everything a step can see and touch during one call.
pub struct StepContext<'a> {
    pub input: &'a Value,
    pub instance: &'a WorkflowInstance,
    pub step: &'a StepDescriptor,
    pub payload: &'a mut WorkflowPayload,
    pub state: &'a mut StepState,
    pub container: &'a ServiceContainer,
    pub workflow_status: WorkflowStatus,
    pub(crate) observers: &'a Observers<dyn StepLoopObserver>,
}

impl StepContext<'_> {
    pub fn index(&self) -> usize {
        self.step.index
    }

    pub fn config(&self) -> &Value {
        &self.step.config
    }

    /// Publish a progress message for this step.
    pub async fn report(&self, text: impl Into<String>) {
        let event = StepLoopEvent::StepLoopMessage { text: text.into() };
        self.observers
            .notify(self.instance, self.step.index, &event)
            .await;
    }
}

#[async_trait]
pub trait Step: Send + Sync {
    async fn start(&mut self, ctx: &mut StepContext<'_>) -> StepResult<StepOutcome>;

    /// Dispatch for `then_call` / `otherwise_call` methods.
    async fn call(&mut self, method: &str, _ctx: &mut StepContext<'_>) -> StepResult<StepOutcome> {
        Err(StepError::UnknownMethod {
            method: method.to_string(),
        })
    }

    /// Dispatch for `check_method`; `true` ends the wait.
    async fn check(&mut self, method: &str, _ctx: &mut StepContext<'_>) -> StepResult<bool> {
        Err(StepError::UnknownMethod {
            method: method.to_string(),
        })
    }

    /// Compensation hook run once when the step fails.
    async fn on_fail(&mut self, _ctx: &mut StepContext<'_>, _error: &StepError) -> StepResult<()> {
        Ok(())
    }

    /// Consulted before `start` for steps whose descriptor is `skippable`.
    async fn should_skip(&mut self, _ctx: &mut StepContext<'_>) -> StepResult<bool> {
        Ok(false)
    }
}
