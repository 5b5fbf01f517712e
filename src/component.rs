use crate::error::Result;
use crate::link::Gate;
use crate::message::Message;
use crate::report::Report;
use std::sync::Arc;

/// A reusable worker object that handles one message at a time.
///
/// A stage creates `pool_size()` components up front and lends them to its
/// workers; an instance is never used by two workers at once, so it may keep
/// private mutable state. A panic inside `handle` is caught by the stage and
/// turned into a Fail report for that message.
pub trait Component: Send + 'static {
    /// Handle a message and decide where it goes next
    fn handle(&mut self, message: &mut Message) -> Report;
}

impl<F> Component for F
where
    F: FnMut(&mut Message) -> Report + Send + 'static,
{
    fn handle(&mut self, message: &mut Message) -> Report {
        self(message)
    }
}

/// Builds the components of one stage and declares its sizing.
pub trait Factory: Send + 'static {
    /// Create one component bound to the stage's produce path
    fn create(&mut self, producer: Producer) -> Result<Box<dyn Component>>;

    /// Number of concurrently active components; must be at least 1
    fn pool_size(&self) -> usize;

    /// Capacity of the stage's produce and output paths; 0 means rendezvous
    fn channel_size(&self) -> usize;

    /// Late-bound string configuration, applied before `create`
    fn set_attribute(&mut self, _name: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    /// Release stage-wide resources once all workers have stopped
    fn destroy(&mut self) -> Result<()> {
        Ok(())
    }

    /// Get a human-readable name for this stage
    fn name(&self) -> &str {
        "stage"
    }
}

/// Handle a component uses to emit messages on its stage's produce path.
///
/// Produced messages skip `handle` and go straight to the stage's output.
/// Once the stage starts shutting down the path closes and messages are
/// handed back to the caller instead of being lost.
#[derive(Clone)]
pub struct Producer {
    gate: Arc<Gate>,
}

impl Producer {
    pub(crate) fn new(gate: Arc<Gate>) -> Self {
        Self { gate }
    }

    /// Emit a message, blocking while the produce path is full.
    ///
    /// Calling this from inside `handle` on a stage whose every worker is
    /// doing the same can wait forever once the path fills up.
    pub fn produce(&self, msg: Message) -> std::result::Result<(), Message> {
        self.gate.push(msg)
    }

    /// Emit a message only if the produce path has room right now
    pub fn try_produce(&self, msg: Message) -> std::result::Result<(), Message> {
        self.gate.try_push(msg)
    }

    /// Whether the stage has stopped accepting produced messages
    pub fn is_closed(&self) -> bool {
        self.gate.is_closed()
    }
}
