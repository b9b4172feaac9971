//! Typed service map handed to step factories and step contexts.

use rustc_hash::FxHashMap;
use std::any::{Any, TypeId, type_name};
use std::sync::Arc;

/// Holds at most one shared instance per type.
#[derive(Clone, Default)]
pub struct ServiceContainer {
    services: FxHashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServiceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `service`, replacing any earlier instance of the same type.
    pub fn register<T: Any + Send + Sync>(&mut self, service: T) {
        self.services.insert(TypeId::of::<T>(), Arc::new(service));
    }

    #[must_use]
    pub fn with<T: Any + Send + Sync>(mut self, service: T) -> Self {
        self.register(service);
        self
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|s| s.downcast::<T>().ok())
    }

    pub fn must_get<T: Any + Send + Sync>(&self) -> Result<Arc<T>, crate::step::StepError> {
        self.get::<T>().ok_or_else(|| {
            crate::step::StepError::failed(format!(
                "service `{}` is not registered",
                type_name::<T>()
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("services", &self.services.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Region(&'static str);

    #[test]
    fn register_and_fetch_by_type() {
        let container = ServiceContainer::new().with(Region("us-west-2")).with(7_u32);
        assert_eq!(*container.get::<Region>().unwrap(), Region("us-west-2"));
        assert_eq!(*container.get::<u32>().unwrap(), 7);
        assert!(container.get::<String>().is_none());
        assert!(container.must_get::<String>().is_err());
        assert_eq!(container.len(), 2);
    }
}
