use std::{collections::HashMap, sync::Arc};

use kindle_config::KindleConfig;

use crate::{Error, Result, adapter::Adapter, console::ConsoleAdapter};

/// Builds an adapter from the loaded configuration.
pub type AdapterFactory =
    Arc<dyn Fn(&KindleConfig) -> anyhow::Result<Arc<dyn Adapter>> + Send + Sync>;

/// Registry of adapter factories, keyed by adapter name.
#[derive(Clone)]
pub struct AdapterRegistry {
    factories: HashMap<String, AdapterFactory>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry pre-populated with the adapters shipped in this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("console", |config: &KindleConfig| {
            let adapter = ConsoleAdapter::from_config(&config.console)?;
            Ok(Arc::new(adapter) as Arc<dyn Adapter>)
        });
        registry
    }

    /// Register (or replace) the factory for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&KindleConfig) -> anyhow::Result<Arc<dyn Adapter>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Instantiate the adapter registered under `name`.
    pub fn create(&self, name: &str, config: &KindleConfig) -> Result<Arc<dyn Adapter>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::unknown_adapter(name))?;
        factory(config).map_err(|source| Error::Factory {
            name: name.to_string(),
            source,
        })
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_has_console() {
        let registry = AdapterRegistry::with_builtin();
        assert!(registry.contains("console"));
        assert_eq!(registry.list(), vec!["console"]);
        let adapter = registry
            .create("console", &KindleConfig::default())
            .unwrap();
        assert_eq!(adapter.name(), "console");
    }

    #[test]
    fn unknown_adapter_is_an_error() {
        let registry = AdapterRegistry::new();
        let err = registry
            .create("telegram", &KindleConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::UnknownAdapter { ref name } if name == "telegram"));
    }

    #[test]
    fn factory_failure_is_reported() {
        let mut registry = AdapterRegistry::new();
        registry.register("broken", |_: &KindleConfig| anyhow::bail!("missing token"));
        let err = registry
            .create("broken", &KindleConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Factory { ref name, .. } if name == "broken"));
        assert!(err.to_string().contains("missing token"));
    }
}
