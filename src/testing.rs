//! Shared fixtures for unit tests.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::container::ServiceContainer;
use crate::observers::{
    ObserverError, StepLoopEvent, StepLoopObserver, WorkflowEvent, WorkflowObserver,
};
use crate::registry::StepRegistry;
use crate::scope::TickScope;
use crate::step::{Step, StepContext, StepError, StepOutcome, StepResult, WaitSpec};
use crate::stores::{StateStore, StepStateProvider, WorkflowPayload};
use crate::types::{StepDescriptor, StepRecord, WorkflowInstance, WorkflowStatus};

/// Passes on start.
#[derive(Default)]
pub struct PassStep;

#[async_trait]
impl Step for PassStep {
    async fn start(&mut self, _ctx: &mut StepContext<'_>) -> StepResult<StepOutcome> {
        Ok(StepOutcome::Pass)
    }
}

/// Bumps `meta.count` and records its own index in `meta.visits`.
#[derive(Default)]
pub struct CountingStep;

#[async_trait]
impl Step for CountingStep {
    async fn start(&mut self, ctx: &mut StepContext<'_>) -> StepResult<StepOutcome> {
        let count: u64 = ctx.payload.get("count")?.unwrap_or(0);
        ctx.payload.set_meta("count", &(count + 1))?;
        let mut visits: Vec<usize> = ctx.payload.get("visits")?.unwrap_or_default();
        visits.push(ctx.index());
        ctx.payload.set_meta("visits", &visits)?;
        Ok(StepOutcome::Pass)
    }
}

/// Polls `is_ready` until it has been asked `readyAfter` times, then calls `finish`.
///
/// Config: `seconds`, `maxAttempts`, `readyAfter` (0 = never), `otherwise`.
#[derive(Default)]
pub struct PollingStep;

impl PollingStep {
    fn cfg(ctx: &StepContext<'_>, key: &str, default: u64) -> u64 {
        ctx.config().get(key).and_then(Value::as_u64).unwrap_or(default)
    }
}

#[async_trait]
impl Step for PollingStep {
    async fn start(&mut self, ctx: &mut StepContext<'_>) -> StepResult<StepOutcome> {
        ctx.state.set("polls", &0_u64)?;
        let mut spec = WaitSpec::seconds(Self::cfg(ctx, "seconds", 20))
            .max_attempts(Self::cfg(ctx, "maxAttempts", 60) as u32)
            .until("is_ready")
            .then_call("finish");
        if let Some(method) = ctx.config().get("otherwise").and_then(Value::as_str) {
            spec = spec.otherwise_call(method);
        }
        Ok(spec.into())
    }

    async fn check(&mut self, method: &str, ctx: &mut StepContext<'_>) -> StepResult<bool> {
        if method != "is_ready" {
            return Err(StepError::UnknownMethod {
                method: method.into(),
            });
        }
        let polls: u64 = ctx.state.must_get("polls")?;
        ctx.state.set("polls", &(polls + 1))?;
        let ready_after = Self::cfg(ctx, "readyAfter", 1);
        Ok(ready_after != 0 && polls + 1 >= ready_after)
    }

    async fn call(&mut self, method: &str, ctx: &mut StepContext<'_>) -> StepResult<StepOutcome> {
        match method {
            "finish" => {
                let polls: u64 = ctx.state.must_get("polls")?;
                ctx.payload.set_output("polls", &polls)?;
                Ok(StepOutcome::Pass)
            }
            "fallback" => {
                ctx.payload.set_output("fallback", &true)?;
                Ok(StepOutcome::Pass)
            }
            other => Err(StepError::UnknownMethod {
                method: other.into(),
            }),
        }
    }
}

/// Fails on start and counts `on_fail` invocations.
#[derive(Clone, Default)]
pub struct FailingStep {
    pub on_fail_calls: Arc<AtomicUsize>,
    pub hook_fails: bool,
}

impl FailingStep {
    pub fn calls(&self) -> usize {
        self.on_fail_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Step for FailingStep {
    async fn start(&mut self, _ctx: &mut StepContext<'_>) -> StepResult<StepOutcome> {
        Err(StepError::with_source(
            "volume attach failed",
            std::io::Error::other("device busy"),
        ))
    }

    async fn on_fail(&mut self, _ctx: &mut StepContext<'_>, _error: &StepError) -> StepResult<()> {
        self.on_fail_calls.fetch_add(1, Ordering::SeqCst);
        if self.hook_fails {
            return Err(StepError::failed("cleanup failed too"));
        }
        Ok(())
    }
}

/// Jumps to `config.target` the first `config.times` visits, then passes.
#[derive(Default)]
pub struct GotoStep;

#[async_trait]
impl Step for GotoStep {
    async fn start(&mut self, ctx: &mut StepContext<'_>) -> StepResult<StepOutcome> {
        let target = ctx.config().get("target").and_then(Value::as_u64).unwrap_or(0) as usize;
        let times = ctx.config().get("times").and_then(Value::as_u64).unwrap_or(1);
        let jumps: u64 = ctx.payload.get("jumps")?.unwrap_or(0);
        if jumps >= times {
            return Ok(StepOutcome::Pass);
        }
        ctx.payload.set_meta("jumps", &(jumps + 1))?;
        Ok(StepOutcome::GoTo(target))
    }
}

/// Bumps its own `tally` step state and appends the new value to `meta.tallies`.
#[derive(Default)]
pub struct TallyStep;

#[async_trait]
impl Step for TallyStep {
    async fn start(&mut self, ctx: &mut StepContext<'_>) -> StepResult<StepOutcome> {
        let tally = ctx.state.get::<u64>("tally")?.unwrap_or(0) + 1;
        ctx.state.set("tally", &tally)?;
        let mut tallies: Vec<u64> = ctx.payload.get("tallies")?.unwrap_or_default();
        tallies.push(tally);
        ctx.payload.set_meta("tallies", &tallies)?;
        Ok(StepOutcome::Pass)
    }
}

/// Skipped whenever the payload carries `skipOptional: true`.
#[derive(Default)]
pub struct SkippableStep;

#[async_trait]
impl Step for SkippableStep {
    async fn start(&mut self, ctx: &mut StepContext<'_>) -> StepResult<StepOutcome> {
        ctx.payload.set_output("optionalRan", &true)?;
        Ok(StepOutcome::Pass)
    }

    async fn should_skip(&mut self, ctx: &mut StepContext<'_>) -> StepResult<bool> {
        Ok(ctx.payload.get::<bool>("skipOptional")?.unwrap_or(false))
    }
}

/// Reports a message and passes.
#[derive(Default)]
pub struct ChattyStep;

#[async_trait]
impl Step for ChattyStep {
    async fn start(&mut self, ctx: &mut StepContext<'_>) -> StepResult<StepOutcome> {
        ctx.report("half way there").await;
        Ok(StepOutcome::Pass)
    }
}

/// Records event names from both observer kinds.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn names(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, name: &str) -> usize {
        self.names().iter().filter(|n| *n == name).count()
    }

    fn push(&self, name: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push(name.to_string());
        }
    }
}

#[async_trait]
impl WorkflowObserver for RecordingObserver {
    async fn on_workflow_event(
        &self,
        _instance: &WorkflowInstance,
        event: &WorkflowEvent,
    ) -> Result<(), ObserverError> {
        self.push(event.name());
        Ok(())
    }
}

#[async_trait]
impl StepLoopObserver for RecordingObserver {
    async fn on_step_event(
        &self,
        _instance: &WorkflowInstance,
        _index: usize,
        event: &StepLoopEvent,
    ) -> Result<(), ObserverError> {
        self.push(event.name());
        Ok(())
    }
}

/// Registry with every fixture step under version 1.
pub fn fixture_registry() -> StepRegistry {
    let mut registry = StepRegistry::new();
    registry.register_default::<PassStep>("pass", 1).unwrap();
    registry.register_default::<CountingStep>("count", 1).unwrap();
    registry.register_default::<PollingStep>("poll", 1).unwrap();
    registry.register_default::<GotoStep>("goto", 1).unwrap();
    registry.register_default::<SkippableStep>("optional", 1).unwrap();
    registry.register_default::<ChattyStep>("chatty", 1).unwrap();
    registry.register_default::<FailingStep>("fail", 1).unwrap();
    registry.register_default::<TallyStep>("tally", 1).unwrap();
    registry
}

/// `n` pass steps.
pub fn sample_instance(n: usize) -> WorkflowInstance {
    instance_with((0..n).map(|i| StepDescriptor::new(i, "pass", 1)).collect())
}

pub fn instance_with(steps: Vec<StepDescriptor>) -> WorkflowInstance {
    let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    WorkflowInstance {
        id: "wi-test".into(),
        workflow_id: "wf-test".into(),
        workflow_version: 1,
        status: WorkflowStatus::NotStarted,
        step_records: vec![StepRecord::default(); steps.len()],
        steps,
        error: None,
        created_at: at,
        updated_at: at,
        revision: 0,
    }
}

/// Owns the data a [`TickScope`] borrows.
pub struct Harness {
    pub session: String,
    pub input: Value,
    pub instance: WorkflowInstance,
    pub payload: WorkflowPayload,
    pub states: StepStateProvider,
    pub container: ServiceContainer,
    pub store: Option<Arc<dyn StateStore>>,
}

impl Harness {
    pub fn new(instance: WorkflowInstance, input: Value) -> Self {
        Self {
            session: instance.id.clone(),
            payload: WorkflowPayload::new(input.clone()),
            input,
            instance,
            states: StepStateProvider::new(),
            container: ServiceContainer::new(),
            store: None,
        }
    }

    pub fn empty(steps: Vec<StepDescriptor>) -> Self {
        Self::new(instance_with(steps), json!({}))
    }

    pub fn scope(&mut self) -> TickScope<'_> {
        TickScope {
            session: &self.session,
            input: &self.input,
            instance: &self.instance,
            payload: &mut self.payload,
            states: &mut self.states,
            container: &self.container,
            state_store: self.store.as_deref(),
            workflow_status: WorkflowStatus::InProgress,
            stack_limit: 2048,
        }
    }
}
