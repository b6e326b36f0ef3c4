use std::collections::HashMap;
use std::sync::Arc;

use super::TaskHandler;
use crate::domain::EntityType;
use crate::error::SchedulerError;

/// Registry of handlers (entity_type -> handler).
///
/// Built during initialization (mutable), used during runtime (immutable),
/// so lookups need no lock.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<EntityType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for an entity type. Registering twice is an error.
    pub fn register(
        &mut self,
        entity_type: EntityType,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), SchedulerError> {
        if self.handlers.contains_key(&entity_type) {
            return Err(SchedulerError::DuplicateHandler(entity_type));
        }
        self.handlers.insert(entity_type, handler);
        Ok(())
    }

    /// Install a built-in handler, replacing whatever was there.
    pub(crate) fn install(&mut self, entity_type: EntityType, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(entity_type, handler);
    }

    pub fn get(&self, entity_type: &EntityType) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(entity_type)
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.handlers.contains_key(&EntityType::new(entity_type))
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().map(|t| t.as_str().to_string()).collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;

    fn noop() -> Arc<dyn TaskHandler> {
        handler_fn(|_ctx| async { Ok(None) })
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register("demo".into(), noop()).unwrap();

        let err = registry.register("demo".into(), noop()).unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateHandler(t) if t.as_str() == "demo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lists_types_sorted() {
        let mut registry = HandlerRegistry::new();
        registry.register("b".into(), noop()).unwrap();
        registry.register("a".into(), noop()).unwrap();

        assert_eq!(registry.registered_types(), vec!["a", "b"]);
        assert!(registry.contains("a"));
        assert!(registry.get(&"c".into()).is_none());
    }
}
