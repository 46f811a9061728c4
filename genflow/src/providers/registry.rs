//! Name → adapter lookup.

use super::ProviderAdapter;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of provider adapters keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter, replacing any previous one with the same name.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    /// Builder-style registration.
    #[must_use]
    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Looks up an adapter by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(name).cloned()
    }

    /// Resolves names to adapters, preserving order and skipping unknown names.
    #[must_use]
    pub fn resolve(&self, order: &[String]) -> Vec<Arc<dyn ProviderAdapter>> {
        order
            .iter()
            .filter_map(|name| {
                let adapter = self.get(name);
                if adapter.is_none() {
                    tracing::debug!(provider = %name, "Unknown provider in priority order");
                }
                adapter
            })
            .collect()
    }

    /// Returns the names of adapters that currently report availability.
    #[must_use]
    pub fn available_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .adapters
            .values()
            .filter(|a| a.is_available())
            .map(|a| a.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Returns the number of registered adapters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Returns true if no adapters are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Builds HTTP adapters for every provider described in the config.
    #[cfg(feature = "http")]
    #[must_use]
    pub fn from_config(config: &crate::config::EngineConfig) -> Self {
        use crate::config::ProviderFlavor;

        let mut registry = Self::new();
        for provider in &config.providers {
            let adapter: Arc<dyn ProviderAdapter> = match provider.flavor {
                ProviderFlavor::OpenAiCompatible => {
                    Arc::new(super::openai::OpenAiCompatibleProvider::from_config(provider))
                }
                ProviderFlavor::Anthropic => {
                    Arc::new(super::anthropic::AnthropicProvider::from_config(provider))
                }
            };
            tracing::debug!(
                provider = adapter.name(),
                available = adapter.is_available(),
                "Registered provider"
            );
            registry.register(adapter);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::ScriptedProvider;

    #[test]
    fn test_resolve_preserves_order_and_skips_unknown() {
        let registry = ProviderRegistry::new()
            .with(Arc::new(ScriptedProvider::new("a")))
            .with(Arc::new(ScriptedProvider::new("b")))
            .with(Arc::new(ScriptedProvider::new("c")));

        let order = vec!["c".to_string(), "missing".to_string(), "a".to_string()];
        let names: Vec<_> = registry
            .resolve(&order)
            .iter()
            .map(|a| a.name().to_string())
            .collect();

        assert_eq!(names, vec!["c", "a"]);
    }

    #[test]
    fn test_available_names() {
        let registry = ProviderRegistry::new()
            .with(Arc::new(ScriptedProvider::new("b")))
            .with(Arc::new(ScriptedProvider::unavailable("x")))
            .with(Arc::new(ScriptedProvider::new("a")));

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.available_names(), vec!["a", "b"]);
    }
}
