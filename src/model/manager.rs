//! Process-wide model registry.
//!
//! The loader collaborator registers each model once: a parsed description
//! plus a factory producing fresh instances. Reads after insertion are
//! cheap clones of the shared blueprint; insertion is serialized by the
//! registry mutex and entries are immutable once inserted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use tracing::debug;

use super::{Model, ModelDescription};
use crate::status::{ModelError, ModelResult};

type Factory = Box<dyn Fn() -> Box<dyn Model> + Send + Sync>;

/// Shared, immutable per-model data: the description and an instance
/// factory.
pub struct ModelBlueprint {
    pub description: Arc<ModelDescription>,
    factory: Factory,
}

impl ModelBlueprint {
    pub fn new(
        description: ModelDescription,
        factory: impl Fn() -> Box<dyn Model> + Send + Sync + 'static,
    ) -> Self {
        Self {
            description: Arc::new(description),
            factory: Box::new(factory),
        }
    }

    /// Create a fresh model instance.
    pub fn instantiate(&self) -> Box<dyn Model> {
        (self.factory)()
    }
}

static REGISTRY: Lazy<Mutex<HashMap<String, Arc<ModelBlueprint>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Handle to the process-wide registry.
pub struct ModelRegistry;

impl ModelRegistry {
    /// Register a model under `name`. Entries are insertion-immutable;
    /// registering the same name twice is rejected.
    pub fn register(name: &str, blueprint: ModelBlueprint) -> ModelResult<()> {
        let mut registry = REGISTRY.lock().expect("model registry poisoned");
        if registry.contains_key(name) {
            return Err(ModelError::Discarded(format!(
                "model `{name}` is already registered"
            )));
        }
        debug!(model = name, "registering model blueprint");
        registry.insert(name.to_string(), Arc::new(blueprint));
        Ok(())
    }

    /// Fetch the blueprint for `name`. A missing model library is a fatal
    /// condition for the caller.
    pub fn blueprint(name: &str) -> ModelResult<Arc<ModelBlueprint>> {
        let registry = REGISTRY.lock().expect("model registry poisoned");
        registry
            .get(name)
            .cloned()
            .ok_or_else(|| ModelError::Fatal(format!("model `{name}` is not registered")))
    }

    pub fn contains(name: &str) -> bool {
        REGISTRY
            .lock()
            .expect("model registry poisoned")
            .contains_key(name)
    }
}
