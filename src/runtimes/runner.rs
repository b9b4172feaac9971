use std::sync::Arc;
use tracing::instrument;

use super::instance_store::{CreateInstanceRequest, InstanceStore, WorkflowStatusChange};
use super::journal::{self, JournalSlot, TickJournal};
use super::runtime_config::RuntimeConfig;
use super::tick::{LoopState, TickInput, TickOutput};
use crate::container::ServiceContainer;
use crate::error::{EngineError, Result};
use crate::event_bus::{EventBus, EventBusObserver};
use crate::memento::{capture, restore};
use crate::observers::{Observers, StepLoopObserver, WorkflowObserver, catch_if_error};
use crate::provider::StepLoopProvider;
use crate::registry::StepRegistry;
use crate::reporters::{StepReporter, WorkflowReporter};
use crate::scope::TickScope;
use crate::step_loop::StepLoop;
use crate::stores::{StateStore, StepStateProvider, WorkflowPayload};
use crate::types::{ErrorInfo, WorkflowInstance, WorkflowStatus};
use crate::workflow_loop::WorkflowLoop;

/// Entry point for one tick: rehydrate from the continuation, advance the
/// workflow by one step tick, and serialize everything back.
///
/// The runner itself is stateless between ticks apart from the replay
/// journal, so any process holding the same registry and stores can serve
/// the next tick of a session.
pub struct TickRunner {
    registry: Arc<StepRegistry>,
    container: Arc<ServiceContainer>,
    instances: Arc<dyn InstanceStore>,
    state_store: Option<Arc<dyn StateStore>>,
    workflow_observers: Observers<dyn WorkflowObserver>,
    step_observers: Observers<dyn StepLoopObserver>,
    pub(super) journal: TickJournal,
    config: RuntimeConfig,
}

impl TickRunner {
    /// A runner whose status reporters write to `instances`.
    pub fn new(registry: StepRegistry, instances: Arc<dyn InstanceStore>) -> Self {
        let mut workflow_observers: Observers<dyn WorkflowObserver> = Observers::default();
        workflow_observers.push(Arc::new(WorkflowReporter::new(instances.clone())));
        let mut step_observers: Observers<dyn StepLoopObserver> = Observers::default();
        step_observers.push(Arc::new(StepReporter::new(instances.clone())));
        Self {
            registry: Arc::new(registry),
            container: Arc::new(ServiceContainer::new()),
            instances,
            state_store: None,
            workflow_observers,
            step_observers,
            journal: TickJournal::with_capacity(RuntimeConfig::default().journal_capacity),
            config: RuntimeConfig::default(),
        }
    }

    #[must_use]
    pub fn with_container(mut self, container: ServiceContainer) -> Self {
        self.container = Arc::new(container);
        self
    }

    #[must_use]
    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(store);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.journal = TickJournal::with_capacity(config.journal_capacity);
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_workflow_observer(mut self, observer: Arc<dyn WorkflowObserver>) -> Self {
        self.workflow_observers.push(observer);
        self
    }

    #[must_use]
    pub fn with_step_observer(mut self, observer: Arc<dyn StepLoopObserver>) -> Self {
        self.step_observers.push(observer);
        self
    }

    /// Mirror every lifecycle event onto `bus`.
    #[must_use]
    pub fn with_event_bus(self, bus: &EventBus) -> Self {
        let observer = Arc::new(EventBusObserver::new(bus.get_sender()));
        self.with_workflow_observer(observer.clone())
            .with_step_observer(observer)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Run one tick.
    ///
    /// Returns `Err` only for fatal conditions (missing trigger fields,
    /// unknown templates, unreadable mementos, instance store failures).
    #[instrument(skip(self, tick), fields(session = tick.session_id().unwrap_or("<new>")), err)]
    pub async fn run_tick(&self, tick: &TickInput) -> Result<TickOutput> {
        let fingerprint = journal::fingerprint(tick);
        let store = self.state_store.as_deref();

        let slot = match (tick.session_id(), tick.meta.trigger_id.as_deref()) {
            (Some(session), _) => Some(JournalSlot::Session(session)),
            (None, Some(trigger_id)) => Some(JournalSlot::Trigger(trigger_id)),
            (None, None) => None,
        };
        if let Some(slot) = slot {
            if let Some(output) = self.journal.replayed(slot, fingerprint, store).await {
                tracing::info!(?slot, "replayed tick answered from journal");
                return Ok(output);
            }
        }

        let (instance, created) = match tick.session_id() {
            Some(session) => (self.instances.must_find_instance(session).await?, false),
            None => (self.create_instance(tick).await?, true),
        };

        let state = tick.loop_state.clone().unwrap_or_default();
        let mut workflow_loop = self.rehydrate(&state)?;
        let mut payload = WorkflowPayload::new(tick.input.clone());
        if !state.wp.is_null() {
            restore(&mut payload, Some(&state.wp))?;
        }
        let mut states = StepStateProvider::new();
        restore(&mut states, Some(&state.ssp))?;

        let decision = {
            let mut scope = TickScope {
                session: &instance.id,
                input: &tick.input,
                instance: &instance,
                payload: &mut payload,
                states: &mut states,
                container: &self.container,
                state_store: store,
                workflow_status: instance.status,
                stack_limit: self.config.stack_limit,
            };
            workflow_loop.tick(&mut scope).await?
        };
        tracing::debug!(
            ?decision,
            step = workflow_loop.provider().current_index(),
            "tick decided"
        );

        let next = LoopState {
            memento: capture(&workflow_loop)?,
            slp: capture(workflow_loop.provider())?,
            wp: capture(&payload)?,
            ssp: capture(&states)?,
            session_id: None,
        };
        let output = TickOutput::new(&decision, next, created.then(|| instance.id.clone()));
        if let Some(slot) = slot {
            self.journal.record(slot, fingerprint, &output, store).await;
        }
        Ok(output)
    }

    async fn create_instance(&self, tick: &TickInput) -> Result<WorkflowInstance> {
        let workflow_id = tick
            .meta
            .workflow_id
            .clone()
            .ok_or(EngineError::MissingTriggerField {
                field: "workflowId",
            })?;
        let workflow_version = tick
            .meta
            .workflow_version
            .ok_or(EngineError::MissingTriggerField {
                field: "workflowVersion",
            })?;

        let instance = self
            .instances
            .create_instance(
                &tick.meta.request_context,
                CreateInstanceRequest {
                    workflow_id,
                    workflow_version,
                    status: WorkflowStatus::NotStarted,
                },
                &tick.input,
            )
            .await?;

        if let Err(e) = self.registry.validate_plan(&instance.steps) {
            let change = WorkflowStatusChange {
                instance_id: instance.id.clone(),
                status: WorkflowStatus::Error,
                error: Some(ErrorInfo::from_error(&e, self.config.stack_limit)),
            };
            catch_if_error(
                self.instances.change_workflow_status(change).await,
                "marking invalid plan",
            );
            return Err(e);
        }
        Ok(instance)
    }

    fn rehydrate(&self, state: &LoopState) -> Result<WorkflowLoop> {
        let mut provider = StepLoopProvider::new(self.registry.clone(), self.container.clone());
        restore(&mut provider, Some(&state.slp))?;
        let step_observers = self.step_observers.clone();
        provider.on_created(Arc::new(move |step_loop: &mut StepLoop| {
            step_loop.observers_mut().extend_from(&step_observers);
        }));

        let mut workflow_loop = WorkflowLoop::new(provider);
        restore(&mut workflow_loop, Some(&state.memento))?;
        workflow_loop
            .observers_mut()
            .extend_from(&self.workflow_observers);
        Ok(workflow_loop)
    }
}
