use crate::{DestinationFactory, Error, Result, SourceFactory};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registry for source and destination factories
pub struct Registry {
    source_factories: BTreeMap<String, Arc<dyn SourceFactory>>,
    destination_factories: BTreeMap<String, Arc<dyn DestinationFactory>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            source_factories: BTreeMap::new(),
            destination_factories: BTreeMap::new(),
        }
    }

    /// Register a source factory
    pub fn register_source(&mut self, factory: Arc<dyn SourceFactory>) {
        let name = factory.name().to_string();
        self.source_factories.insert(name, factory);
    }

    /// Register a destination factory
    pub fn register_destination(&mut self, factory: Arc<dyn DestinationFactory>) {
        let name = factory.name().to_string();
        self.destination_factories.insert(name, factory);
    }

    pub fn get_source_factory(&self, name: &str) -> Result<Arc<dyn SourceFactory>> {
        self.source_factories
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("Source factory '{}' not found", name)))
    }

    pub fn get_destination_factory(&self, name: &str) -> Result<Arc<dyn DestinationFactory>> {
        self.destination_factories
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Configuration(format!("Destination factory '{}' not found", name)))
    }

    pub fn list_sources(&self) -> Vec<String> {
        self.source_factories.keys().cloned().collect()
    }

    pub fn list_destinations(&self) -> Vec<String> {
        self.destination_factories.keys().cloned().collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryDestinationFactory, MemorySourceFactory};

    #[test]
    fn lookups_by_registered_name() {
        let mut registry = Registry::new();
        registry.register_source(Arc::new(MemorySourceFactory::default()));
        registry.register_destination(Arc::new(MemoryDestinationFactory::default()));

        assert_eq!(registry.list_sources(), vec!["memory".to_string()]);
        assert_eq!(registry.list_destinations(), vec!["memory".to_string()]);
        assert!(registry.get_source_factory("memory").is_ok());
    }

    #[test]
    fn unknown_factory_is_a_configuration_error() {
        let registry = Registry::new();
        assert!(matches!(
            registry.get_destination_factory("kafka"),
            Err(Error::Configuration(_))
        ));
    }
}
