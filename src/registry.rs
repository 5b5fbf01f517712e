use crate::component::Factory;
use crate::components::{ComponentFactory, Passthrough, Tag};
use crate::config::TopologyConfig;
use crate::error::{PipelineError, Result};
use crate::pipeline::PipelineBuilder;
use std::collections::HashMap;

type FactoryConstructor = Box<dyn Fn() -> Box<dyn Factory> + Send + Sync>;

/// Component implementations known by name.
///
/// A topology refers to components by these names; the registry turns each
/// entry into a fresh, configured factory.
pub struct Registry {
    constructors: HashMap<String, FactoryConstructor>,
}

impl Registry {
    /// Create a registry with the built-in components registered
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("passthrough", || {
            Box::new(ComponentFactory::cloning("passthrough", Passthrough))
        });
        registry.register("tag", || {
            Box::new(
                ComponentFactory::new("tag", |_, attributes| {
                    let key = attributes.get("key").ok_or_else(|| {
                        PipelineError::Config("tag requires a 'key' attribute".to_string())
                    })?;
                    let value = attributes.get("value").cloned().unwrap_or_default();
                    Ok(Box::new(Tag::new(key.clone(), value)))
                })
                .accept_only(["key", "value"]),
            )
        });
        registry
    }

    /// Create a registry with nothing registered
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Register (or replace) a component constructor
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn Factory> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
    }

    /// Check if a component name is registered
    pub fn is_registered(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// List all registered names, sorted
    pub fn list_components(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Create a factory and apply attributes to it
    pub fn create<'a, I>(&self, name: &str, attributes: I) -> Result<Box<dyn Factory>>
    where
        I: IntoIterator<Item = (&'a str, String)>,
    {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| PipelineError::UnknownComponent(name.to_string()))?;

        let mut factory = constructor();
        for (attr, value) in attributes {
            factory.set_attribute(attr, &value)?;
        }
        Ok(factory)
    }

    /// Turn a topology into a builder holding one configured factory per stage
    pub fn build(&self, topology: &TopologyConfig) -> Result<PipelineBuilder> {
        let mut builder = PipelineBuilder::new().with_config(topology.pipeline.clone());
        for stage in &topology.stages {
            builder = builder.boxed_stage(self.create(&stage.component, stage.string_attributes())?);
        }
        Ok(builder)
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
    use crate::components::ComponentFactory;

    #[test]
    fn test_builtins_registered() {
        let registry = Registry::new();
        assert_eq!(registry.list_components(), vec!["passthrough", "tag"]);
        assert!(Registry::empty().list_components().is_empty());
    }

    #[test]
    fn test_unknown_component() {
        let registry = Registry::new();
        let err = registry.create("nope", std::iter::empty()).err();
        assert!(matches!(err, Some(PipelineError::UnknownComponent(name)) if name == "nope"));
    }

    #[test]
    fn test_attributes_applied() {
        let registry = Registry::new();
        let factory = registry
            .create("passthrough", [("pool_size", "3".to_string())])
            .unwrap();
        assert_eq!(factory.pool_size(), 3);
        assert_eq!(factory.name(), "passthrough");
    }

    #[test]
    fn test_rejected_attribute() {
        let registry = Registry::new();
        let err = registry
            .create("tag", [("colour", "red".to_string())])
            .err();
        assert!(matches!(err, Some(PipelineError::Attribute { .. })));
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = Registry::empty();
        registry.register("wide", || {
            Box::new(ComponentFactory::cloning("wide", Passthrough).with_pool_size(8))
        });
        assert!(registry.is_registered("wide"));
        let factory = registry.create("wide", std::iter::empty()).unwrap();
        assert_eq!(factory.pool_size(), 8);
    }

    #[test]
    fn test_build_from_topology() {
        let topology = TopologyConfig::from_json(
            r#"{"stages": [{"component": "tag", "attributes": {"key": "k"}}, {"component": "passthrough"}]}"#,
        )
        .unwrap();
        let pipeline = Registry::new().build(&topology).unwrap().build().unwrap();
        assert_eq!(pipeline.stage_names(), vec!["tag", "passthrough"]);
        pipeline.close().unwrap();
    }
}
