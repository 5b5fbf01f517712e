use crate::component::{Component, Factory, Producer};
use crate::error::{PipelineError, Result};
use crate::message::Message;
use crate::report::Report;
use std::collections::BTreeMap;

/// String attributes collected by a [`ComponentFactory`]
pub type Attributes = BTreeMap<String, String>;

/// Forwards every message unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl Component for Passthrough {
    fn handle(&mut self, _message: &mut Message) -> Report {
        Report::done()
    }
}

/// Forwards messages matching a predicate and silently drops the rest
pub struct Filter<F>
where
    F: Fn(&Message) -> bool + Send + 'static,
{
    predicate: F,
}

impl<F> Filter<F>
where
    F: Fn(&Message) -> bool + Send + 'static,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> Component for Filter<F>
where
    F: Fn(&Message) -> bool + Send + 'static,
{
    fn handle(&mut self, message: &mut Message) -> Report {
        if (self.predicate)(message) {
            Report::done()
        } else {
            Report::discard()
        }
    }
}

/// Rewrites the payload; a mapper error fails the message
pub struct Map<F>
where
    F: FnMut(Vec<u8>) -> std::result::Result<Vec<u8>, String> + Send + 'static,
{
    mapper: F,
}

impl<F> Map<F>
where
    F: FnMut(Vec<u8>) -> std::result::Result<Vec<u8>, String> + Send + 'static,
{
    pub fn new(mapper: F) -> Self {
        Self { mapper }
    }
}

impl<F> Component for Map<F>
where
    F: FnMut(Vec<u8>) -> std::result::Result<Vec<u8>, String> + Send + 'static,
{
    fn handle(&mut self, message: &mut Message) -> Report {
        match (self.mapper)(message.take_data()) {
            Ok(data) => {
                message.set_data(data);
                Report::done()
            }
            Err(reason) => Report::fail(reason),
        }
    }
}

/// Sets one attribute on every message
#[derive(Debug, Clone)]
pub struct Tag {
    key: String,
    value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Component for Tag {
    fn handle(&mut self, message: &mut Message) -> Report {
        message.set_attribute(self.key.clone(), self.value.clone());
        Report::done()
    }
}

type MakeComponent = Box<dyn FnMut(Producer, &Attributes) -> Result<Box<dyn Component>> + Send>;
type DestroyHook = Box<dyn FnMut() -> Result<()> + Send>;

/// A [`Factory`] assembled from closures.
///
/// Understands the `pool_size` and `channel_size` attributes itself; every
/// other attribute is stored and handed to the constructor closure. With
/// [`accept_only`](Self::accept_only) unknown names are rejected.
pub struct ComponentFactory {
    name: String,
    pool_size: usize,
    channel_size: usize,
    attributes: Attributes,
    accepted: Option<Vec<String>>,
    make: MakeComponent,
    on_destroy: Option<DestroyHook>,
}

impl ComponentFactory {
    /// Create a factory with pool size 1 and channel size 100.
    ///
    /// `make` runs once per pool slot when the pipeline is built.
    pub fn new<F>(name: impl Into<String>, make: F) -> Self
    where
        F: FnMut(Producer, &Attributes) -> Result<Box<dyn Component>> + Send + 'static,
    {
        Self {
            name: name.into(),
            pool_size: 1,
            channel_size: 100,
            attributes: Attributes::new(),
            accepted: None,
            make: Box::new(make),
            on_destroy: None,
        }
    }

    /// Factory whose components are clones of `component`
    pub fn cloning<C>(name: impl Into<String>, component: C) -> Self
    where
        C: Component + Clone,
    {
        Self::new(name, move |_, _| Ok(Box::new(component.clone())))
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_channel_size(mut self, channel_size: usize) -> Self {
        self.channel_size = channel_size;
        self
    }

    /// Reject attributes other than the listed names (sizing attributes are always accepted)
    pub fn accept_only<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accepted = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Run `hook` when the stage is torn down
    pub fn on_destroy<F>(mut self, hook: F) -> Self
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        self.on_destroy = Some(Box::new(hook));
        self
    }

    /// Attributes set so far, excluding sizing attributes
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }
}

fn parse_size(name: &str, value: &str) -> Result<usize> {
    value.trim().parse().map_err(|_| PipelineError::Attribute {
        name: name.to_string(),
        reason: format!("expected a non-negative integer, got '{value}'"),
    })
}

impl Factory for ComponentFactory {
    fn create(&mut self, producer: Producer) -> Result<Box<dyn Component>> {
        (self.make)(producer, &self.attributes)
    }

    fn pool_size(&self) -> usize {
        self.pool_size
    }

    fn channel_size(&self) -> usize {
        self.channel_size
    }

    fn set_attribute(&mut self, name: &str, value: &str) -> Result<()> {
        match name {
            "pool_size" => self.pool_size = parse_size(name, value)?,
            "channel_size" => self.channel_size = parse_size(name, value)?,
            _ => {
                if let Some(accepted) = &self.accepted {
                    if !accepted.iter().any(|a| a == name) {
                        return Err(PipelineError::Attribute {
                            name: name.to_string(),
                            reason: format!("not supported by '{}'", self.name),
                        });
                    }
                }
                self.attributes.insert(name.to_string(), value.to_string());
            }
        }
        Ok(())
    }

    fn destroy(&mut self) -> Result<()> {
        match self.on_destroy.as_mut() {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough() {
        let mut msg = Message::new(vec![1, 2, 3]);
        assert_eq!(Passthrough.handle(&mut msg), Report::done());
        assert_eq!(msg.data(), &[1, 2, 3]);
    }

    #[test]
    fn test_filter() {
        let mut filter = Filter::new(|msg: &Message| msg.data()[0] > 5);
        assert_eq!(filter.handle(&mut Message::new(vec![3])), Report::discard());
        assert_eq!(filter.handle(&mut Message::new(vec![7])), Report::done());
    }

    #[test]
    fn test_map() {
        let mut map = Map::new(|mut data: Vec<u8>| {
            if data.is_empty() {
                return Err("empty payload".to_string());
            }
            data[0] *= 2;
            Ok(data)
        });
        let mut msg = Message::new(vec![5]);
        assert_eq!(map.handle(&mut msg), Report::done());
        assert_eq!(msg.data(), &[10]);
        assert_eq!(
            map.handle(&mut Message::new(vec![])),
            Report::fail("empty payload")
        );
    }

    #[test]
    fn test_tag() {
        let mut msg = Message::new(vec![]);
        Tag::new("origin", "sensor").handle(&mut msg);
        assert_eq!(
            msg.attribute("origin").and_then(|v| v.as_str()),
            Some("sensor")
        );
    }

    #[test]
    fn test_factory_sizing_attributes() {
        let mut factory = ComponentFactory::cloning("pass", Passthrough);
        factory.set_attribute("pool_size", "4").unwrap();
        factory.set_attribute("channel_size", "0").unwrap();
        factory.set_attribute("anything", "kept").unwrap();
        assert_eq!(Factory::pool_size(&factory), 4);
        assert_eq!(Factory::channel_size(&factory), 0);
        assert_eq!(factory.attributes().get("anything").map(String::as_str), Some("kept"));

        let err = factory.set_attribute("pool_size", "many").unwrap_err();
        assert!(matches!(err, PipelineError::Attribute { .. }));
    }

    #[test]
    fn test_factory_rejects_unknown_attributes() {
        let mut factory = ComponentFactory::cloning("strict", Passthrough).accept_only(["key"]);
        assert!(factory.set_attribute("key", "v").is_ok());
        assert!(factory.set_attribute("pool_size", "2").is_ok());
        assert!(factory.set_attribute("other", "v").is_err());
    }
}
