//! Step template registry: `(template id, version)` to step factory.

use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::container::ServiceContainer;
use crate::error::{EngineError, Result};
use crate::step::{Step, StepResult};
use crate::types::{StepDescriptor, StepKey};

/// Builds a fresh step implementation for one plan entry.
pub type StepFactory =
    Arc<dyn Fn(&StepDescriptor, &ServiceContainer) -> StepResult<Box<dyn Step>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct StepRegistry {
    factories: FxHashMap<StepKey, StepFactory>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. Registering the same key twice is an error.
    pub fn register<F>(
        &mut self,
        template_id: &str,
        template_version: u32,
        factory: F,
    ) -> Result<()>
    where
        F: Fn(&StepDescriptor, &ServiceContainer) -> StepResult<Box<dyn Step>>
            + Send
            + Sync
            + 'static,
    {
        let key = StepKey::new(template_id, template_version);
        if self.factories.contains_key(&key) {
            return Err(EngineError::DuplicateStepTemplate { key });
        }
        self.factories.insert(key, Arc::new(factory));
        Ok(())
    }

    /// Register a step type that needs nothing but `Default` to be built.
    pub fn register_default<S>(&mut self, template_id: &str, template_version: u32) -> Result<()>
    where
        S: Step + Default + 'static,
    {
        self.register(template_id, template_version, |_, _| {
            Ok(Box::new(S::default()) as Box<dyn Step>)
        })
    }

    pub fn contains(&self, key: &StepKey) -> bool {
        self.factories.contains_key(key)
    }

    pub fn resolve(&self, key: &StepKey) -> Result<StepFactory> {
        self.factories
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::UnknownStepTemplate { key: key.clone() })
    }

    /// Resolve and build the implementation for `descriptor`.
    pub fn build(
        &self,
        descriptor: &StepDescriptor,
        container: &ServiceContainer,
    ) -> Result<Box<dyn Step>> {
        let key = descriptor.key();
        let factory = self.resolve(&key)?;
        factory(descriptor, container).map_err(|source| EngineError::StepFactory { key, source })
    }

    /// Check that every entry of a plan resolves, before anything runs.
    pub fn validate_plan(&self, steps: &[StepDescriptor]) -> Result<()> {
        for step in steps {
            self.resolve(&step.key())?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
