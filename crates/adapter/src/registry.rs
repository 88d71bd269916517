//! Adapter registry.
//!
//! Holds the configured `ModelAdapter` instances keyed by the provider tag
//! a `ModelConfig` routes on, generalized from the teacher's
//! `ProviderRegistry` (which additionally resolved auth and instantiated
//! vendor-specific HTTP clients — out of scope here, since the engine
//! treats providers as opaque and ships only the `ScriptedAdapter`).

use std::collections::HashMap;
use std::sync::Arc;

use crate::traits::ModelAdapter;

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ModelAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider_tag: impl Into<String>, adapter: Arc<dyn ModelAdapter>) {
        self.adapters.insert(provider_tag.into(), adapter);
    }

    pub fn get(&self, provider_tag: &str) -> Option<Arc<dyn ModelAdapter>> {
        self.adapters.get(provider_tag).cloned()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub fn list_providers(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.adapters.keys().cloned().collect();
        tags.sort();
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedAdapter;

    #[test]
    fn register_and_lookup_by_provider_tag() {
        let mut registry = AdapterRegistry::new();
        let adapter = Arc::new(ScriptedAdapter::new(vec![]));
        registry.register("scripted", adapter);
        assert!(registry.get("scripted").is_some());
        assert!(registry.get("openai").is_none());
        assert_eq!(registry.list_providers(), vec!["scripted".to_string()]);
    }
}
