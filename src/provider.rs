//! Builds step loops on demand and tracks the current plan index.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::container::ServiceContainer;
use crate::error::{EngineError, Result};
use crate::memento::{MementoError, MementoRecord, Stateful, current_schema_version};
use crate::registry::StepRegistry;
use crate::step_loop::{StepLoop, StepLoopMemento};
use crate::types::WorkflowInstance;

/// Hook run on every freshly built step loop, e.g. to attach observers.
pub type StepLoopHook = Arc<dyn Fn(&mut StepLoop) + Send + Sync>;

pub struct StepLoopProvider {
    registry: Arc<StepRegistry>,
    container: Arc<ServiceContainer>,
    current_index: usize,
    loops: BTreeMap<usize, StepLoop>,
    /// Restored mementos for loops not built yet in this process.
    pending: BTreeMap<usize, StepLoopMemento>,
    hooks: Vec<StepLoopHook>,
}

impl StepLoopProvider {
    pub fn new(registry: Arc<StepRegistry>, container: Arc<ServiceContainer>) -> Self {
        Self {
            registry,
            container,
            current_index: 0,
            loops: BTreeMap::new(),
            pending: BTreeMap::new(),
            hooks: Vec::new(),
        }
    }

    pub fn on_created(&mut self, hook: StepLoopHook) {
        self.hooks.push(hook);
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn container(&self) -> &ServiceContainer {
        &self.container
    }

    /// The step loop for `index`, building it through the registry on first use.
    pub fn get_or_create(
        &mut self,
        index: usize,
        instance: &WorkflowInstance,
    ) -> Result<&mut StepLoop> {
        let len = instance.step_count();
        let Some(descriptor) = instance.step(index) else {
            return Err(EngineError::StepIndexOutOfRange { index, len });
        };

        if !self.loops.contains_key(&index) {
            let step = self.registry.build(descriptor, &self.container)?;
            let mut step_loop = StepLoop::new(descriptor.clone(), step, len);
            if let Some(memento) = self.pending.remove(&index) {
                step_loop.set_memento(memento)?;
            }
            for hook in &self.hooks {
                hook(&mut step_loop);
            }
            tracing::debug!(step = index, template = %descriptor.key(), "step loop created");
            self.loops.insert(index, step_loop);
        }

        self.loops
            .get_mut(&index)
            .ok_or(EngineError::StepIndexOutOfRange { index, len })
    }

    /// Move the cursor. Jumping backwards forgets the loops at and after
    /// `target` so revisited steps start over.
    pub fn advance_to(&mut self, target: usize) {
        if target <= self.current_index {
            self.loops.retain(|&i, _| i < target);
            self.pending.retain(|&i, _| i < target);
        }
        self.current_index = target;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepLoopProviderMemento {
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub current_index: usize,
    #[serde(default)]
    pub loops: BTreeMap<usize, StepLoopMemento>,
}

impl Default for StepLoopProviderMemento {
    fn default() -> Self {
        Self {
            schema_version: current_schema_version(),
            current_index: 0,
            loops: BTreeMap::new(),
        }
    }
}

impl MementoRecord for StepLoopProviderMemento {
    const COMPONENT: &'static str = "step loop provider";

    fn schema_version(&self) -> u32 {
        self.schema_version
    }
}

impl Stateful for StepLoopProvider {
    type Memento = StepLoopProviderMemento;

    fn memento(&self) -> StepLoopProviderMemento {
        let mut loops = self.pending.clone();
        for (index, step_loop) in &self.loops {
            loops.insert(*index, step_loop.memento());
        }
        StepLoopProviderMemento {
            schema_version: current_schema_version(),
            current_index: self.current_index,
            loops,
        }
    }

    fn set_memento(
        &mut self,
        memento: StepLoopProviderMemento,
    ) -> std::result::Result<(), MementoError> {
        self.current_index = memento.current_index;
        self.loops.clear();
        self.pending = memento.loops;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step_loop::StepLoopStatus;
    use crate::testing::{fixture_registry, instance_with, sample_instance};
    use crate::types::StepDescriptor;

    fn provider() -> StepLoopProvider {
        StepLoopProvider::new(Arc::new(fixture_registry()), Arc::new(ServiceContainer::new()))
    }

    #[test]
    fn unknown_template_is_fatal() {
        let instance = instance_with(vec![StepDescriptor::new(0, "missing", 1)]);
        let mut p = provider();
        assert!(matches!(
            p.get_or_create(0, &instance),
            Err(EngineError::UnknownStepTemplate { .. })
        ));
    }

    #[test]
    fn index_past_the_plan_is_rejected() {
        let mut p = provider();
        assert!(matches!(
            p.get_or_create(3, &sample_instance(2)),
            Err(EngineError::StepIndexOutOfRange { index: 3, len: 2 })
        ));
    }

    #[test]
    fn pending_memento_is_applied_on_creation() {
        let instance = sample_instance(2);
        let mut memento = StepLoopProviderMemento {
            current_index: 1,
            ..Default::default()
        };
        memento.loops.insert(
            0,
            StepLoopMemento {
                status: StepLoopStatus::Passed,
                ..Default::default()
            },
        );

        let mut p = provider();
        p.set_memento(memento.clone()).unwrap();
        assert_eq!(p.memento(), memento);
        assert_eq!(p.current_index(), 1);
        assert_eq!(p.get_or_create(0, &instance).unwrap().status(), StepLoopStatus::Passed);
        assert_eq!(p.memento(), memento);
    }

    #[test]
    fn backward_jump_resets_revisited_loops() {
        let instance = sample_instance(3);
        let mut p = provider();
        p.get_or_create(0, &instance).unwrap();
        p.advance_to(1);
        p.get_or_create(1, &instance).unwrap();
        p.advance_to(2);
        p.advance_to(1);
        assert_eq!(p.memento().loops.keys().copied().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn hooks_run_once_per_loop() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let mut p = provider();
        p.on_created(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let instance = sample_instance(1);
        p.get_or_create(0, &instance).unwrap();
        p.get_or_create(0, &instance).unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }
}
