use std::fmt;

/// Status code: forward the message to the next stage.
pub const DONE: u32 = 0;
/// Status code: message fully handled, release it without forwarding.
pub const CONTINUE: u32 = 1;
/// Status code: first code of the retry range (100-199).
pub const RETRY: u32 = 100;
/// Status code: first code of the permanent failure range (200-299).
pub const FAIL: u32 = 200;
/// Status code: first code of the silent discard range (300 and above).
pub const DROP: u32 = 300;

/// Routing decision derived from a report status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Forward to the next stage (or the sink).
    Done,
    /// Handled; release without forwarding.
    Continue,
    /// Transient failure; resubmit to the same stage.
    Retry,
    /// Permanent failure; release and emit a diagnostic.
    Fail,
    /// Silent discard.
    Drop,
}

impl Outcome {
    /// Map a numeric status onto its routing decision.
    ///
    /// Codes 2..=99 are unassigned and route as [`Outcome::Fail`].
    pub fn from_status(status: u32) -> Self {
        match status {
            DONE => Outcome::Done,
            CONTINUE => Outcome::Continue,
            100..=199 => Outcome::Retry,
            300.. => Outcome::Drop,
            _ => Outcome::Fail,
        }
    }
}

/// Status and diagnostic attached to a message after a component handled it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Report {
    pub status: u32,
    pub description: String,
}

impl Report {
    /// Create a report with an explicit status code
    pub fn new(status: u32, description: impl Into<String>) -> Self {
        Self {
            status,
            description: description.into(),
        }
    }

    /// Forward the message downstream
    pub fn done() -> Self {
        Self::new(DONE, "")
    }

    /// Message consumed by this stage
    pub fn continued() -> Self {
        Self::new(CONTINUE, "")
    }

    /// Ask for another attempt on this stage
    pub fn retry(description: impl Into<String>) -> Self {
        Self::new(RETRY, description)
    }

    /// Permanent failure
    pub fn fail(description: impl Into<String>) -> Self {
        Self::new(FAIL, description)
    }

    /// Silently discard the message
    pub fn discard() -> Self {
        Self::new(DROP, "")
    }

    /// Routing decision for this report
    pub fn outcome(&self) -> Outcome {
        Outcome::from_status(self.status)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            write!(f, "status {}", self.status)
        } else {
            write!(f, "status {}: {}", self.status, self.description)
        }
    }
}
