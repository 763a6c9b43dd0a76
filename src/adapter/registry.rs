use std::collections::HashMap;
use std::sync::Arc;

use super::{AdapterSpec, PlatformAdapter, ProcessAdapter, SimulatedAdapter};
use crate::error::AdapterError;
use crate::types::Target;

/// Builds an adapter instance for one target from its spec.
pub type AdapterFactory =
    Arc<dyn Fn(&Target, &AdapterSpec) -> Result<Arc<dyn PlatformAdapter>, AdapterError> + Send + Sync>;

pub struct AdapterRegistry {
    factories: HashMap<String, AdapterFactory>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the `process` and `simulated` kinds registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            "process",
            Arc::new(|target: &Target, spec: &AdapterSpec| {
                let adapter = ProcessAdapter::new(target, spec.options()?)?;
                Ok(Arc::new(adapter) as Arc<dyn PlatformAdapter>)
            }),
        );
        registry.register(
            "simulated",
            Arc::new(|target: &Target, spec: &AdapterSpec| {
                let adapter = SimulatedAdapter::new(target, spec.options()?);
                Ok(Arc::new(adapter) as Arc<dyn PlatformAdapter>)
            }),
        );
        registry
    }

    pub fn register(&mut self, kind: impl Into<String>, factory: AdapterFactory) {
        self.factories.insert(kind.into(), factory);
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<_> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn build(
        &self,
        target: &Target,
        spec: &AdapterSpec,
    ) -> Result<Arc<dyn PlatformAdapter>, AdapterError> {
        let factory = self.factories.get(&spec.kind).ok_or_else(|| {
            AdapterError::fault(format!(
                "unknown adapter kind '{}' (available: {})",
                spec.kind,
                self.kinds().join(", ")
            ))
        })?;
        factory(target, spec)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
