//! Borrowed view of everything one tick works on.

use serde_json::Value;

use crate::container::ServiceContainer;
use crate::observers::{Observers, StepLoopObserver, catch_if_error};
use crate::step::StepContext;
use crate::stores::{StateKey, StateStore, StepStateProvider, WorkflowPayload};
use crate::types::{StepDescriptor, WorkflowInstance, WorkflowStatus};

pub struct TickScope<'a> {
    pub session: &'a str,
    pub input: &'a Value,
    pub instance: &'a WorkflowInstance,
    pub payload: &'a mut WorkflowPayload,
    pub states: &'a mut StepStateProvider,
    pub container: &'a ServiceContainer,
    pub state_store: Option<&'a dyn StateStore>,
    pub workflow_status: WorkflowStatus,
    pub stack_limit: usize,
}

impl<'a> TickScope<'a> {
    /// Refresh the payload and the step's state from the durable store.
    pub(crate) async fn load_for_step(&mut self, index: usize) {
        let Some(store) = self.state_store else {
            return;
        };
        catch_if_error(
            self.payload.load(store, self.session).await.map(|_| ()),
            "payload load",
        );
        catch_if_error(
            self.states.load(store, self.session, index).await.map(|_| ()),
            "step state load",
        );
    }

    /// Write the payload and the step's state back to the durable store.
    pub(crate) async fn save_for_step(&self, index: usize) {
        let Some(store) = self.state_store else {
            return;
        };
        catch_if_error(self.payload.save(store, self.session).await, "payload save");
        catch_if_error(
            self.states.save(store, self.session, index).await,
            "step state save",
        );
    }

    /// Forget the state of `index` and every later step, in memory and in the
    /// durable store, so revisited steps start from scratch.
    pub(crate) async fn reset_steps_from(&mut self, index: usize) {
        self.states.reset_from(index);
        let Some(store) = self.state_store else {
            return;
        };
        for step in index..self.instance.step_count() {
            catch_if_error(
                store.remove(&StateKey::step(self.session, step)).await,
                "step state remove",
            );
        }
    }

    pub(crate) fn step_context<'s>(
        &'s mut self,
        step: &'s StepDescriptor,
        observers: &'s Observers<dyn StepLoopObserver>,
    ) -> StepContext<'s> {
        StepContext {
            input: self.input,
            instance: self.instance,
            step,
            payload: &mut *self.payload,
            state: self.states.state_mut(step.index),
            container: self.container,
            workflow_status: self.workflow_status,
            observers,
        }
    }
}
