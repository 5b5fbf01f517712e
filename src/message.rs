use crate::report::Report;
use crate::stage::panic_message;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::error;

/// Attribute holding the number of retries a message has used on its current stage.
pub const ATTEMPTS_ATTRIBUTE: &str = "retry_attempts";

type ReleaseHook = Box<dyn FnOnce(&Message) + Send>;

/// The unit of data flowing through a pipeline.
///
/// A message is owned by exactly one stage at a time. Forwarding moves it to
/// the next stage; dropping it releases it. The release hook, when set, runs
/// exactly once at that point.
pub struct Message {
    data: Vec<u8>,
    attributes: HashMap<String, Value>,
    report: Report,
    on_release: Option<ReleaseHook>,
}

impl Message {
    /// Create a message wrapping the given payload
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            attributes: HashMap::new(),
            report: Report::default(),
            on_release: None,
        }
    }

    /// Register a callback invoked once when the message is released
    pub fn on_release<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&Message) + Send + 'static,
    {
        self.on_release = Some(Box::new(hook));
        self
    }

    /// Builder-style attribute setter
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_attribute(key, value);
        self
    }

    /// Payload bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Replace the payload
    pub fn set_data(&mut self, data: impl Into<Vec<u8>>) {
        self.data = data.into();
    }

    /// Take the payload out, leaving an empty one behind
    pub fn take_data(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    /// Look up an attribute
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Set an attribute, returning the previous value
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.attributes.insert(key.into(), value.into())
    }

    /// Remove an attribute
    pub fn remove_attribute(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    /// All attributes accumulated so far
    pub fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    /// Report left by the most recent stage
    pub fn report(&self) -> &Report {
        &self.report
    }

    pub(crate) fn set_report(&mut self, report: Report) {
        self.report = report;
    }

    /// Retries used on the current stage
    pub fn attempts(&self) -> u32 {
        self.attributes
            .get(ATTEMPTS_ATTRIBUTE)
            .and_then(Value::as_u64)
            .map(|n| n.min(u32::MAX as u64) as u32)
            .unwrap_or(0)
    }

    pub(crate) fn set_attempts(&mut self, attempts: u32) {
        self.attributes
            .insert(ATTEMPTS_ATTRIBUTE.to_string(), Value::from(attempts));
    }

    pub(crate) fn clear_attempts(&mut self) {
        self.attributes.remove(ATTEMPTS_ATTRIBUTE);
    }

    /// Release the message now
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        if let Some(hook) = self.on_release.take() {
            // Releases happen on worker and sink threads; a hook must not unwind them.
            let released: &Message = self;
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| hook(released))) {
                error!(panic = %panic_message(payload.as_ref()), "release hook panicked");
            }
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("len", &self.data.len())
            .field("attributes", &self.attributes)
            .field("report", &self.report)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_attributes_accumulate() {
        let mut msg = Message::new(vec![1, 2, 3]).with_attribute("source", "test");
        msg.set_attribute("count", 2);
        assert_eq!(msg.attribute("source"), Some(&Value::from("test")));
        assert_eq!(msg.attribute("count").and_then(Value::as_u64), Some(2));
        assert_eq!(msg.attributes().len(), 2);
    }

    #[test]
    fn test_attempt_counter() {
        let mut msg = Message::new(vec![]);
        assert_eq!(msg.attempts(), 0);
        msg.set_attempts(2);
        assert_eq!(msg.attempts(), 2);
        msg.clear_attempts();
        assert_eq!(msg.attempts(), 0);
    }

    #[test]
    fn test_release_hook_runs_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let msg = Message::new(vec![7]).on_release(move |m| {
            assert_eq!(m.data(), &[7]);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let moved = msg;
        assert_eq!(released.load(Ordering::SeqCst), 0);
        moved.release();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_release_hook_is_contained() {
        let msg = Message::new(vec![1]).on_release(|_| panic!("hook failed"));
        msg.release();

        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        drop(Message::new(vec![2]).on_release(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_take_data() {
        let mut msg = Message::new(b"abc".to_vec());
        assert_eq!(msg.take_data(), b"abc");
        assert!(msg.data().is_empty());
    }
}
