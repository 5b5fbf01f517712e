//! A chain of worker-pool stages driven by per-message status reports.
//!
//! Each stage runs a bounded pool of [`Component`] instances built by a
//! [`Factory`]. Every handled message carries a [`Report`] whose status picks
//! its route: forward it (Done), consume it (Continue), try again on the same
//! stage (Retry), fail it with a diagnostic (Fail) or discard it (Drop).
//!
//! # Features
//!
//! - `pool_size` worker threads per stage, each multiplexing upstream input,
//!   the stage's own produce path and a terminate signal
//! - Bounded paths between stages; a full path blocks the sender
//! - Bounded retries with an attempt counter carried on the message
//! - Panics inside a component fail only the message being handled
//! - Two-phase shutdown that drains every stage before stopping it
//! - Per-stage metrics: outcome counters, blocked sends, latency percentiles
//! - JSON topologies resolved against a component [`Registry`]
//!
//! # Example
//!
//! ```no_run
//! use pipeworks::{ComponentFactory, Message, Passthrough, PipelineBuilder, Report};
//!
//! let pipeline = PipelineBuilder::new()
//!     .stage(ComponentFactory::cloning("forward", Passthrough).with_pool_size(4))
//!     .stage(ComponentFactory::new("upper", |_, _| {
//!         Ok(Box::new(|msg: &mut Message| {
//!             let upper = msg.data().to_ascii_uppercase();
//!             msg.set_data(upper);
//!             Report::done()
//!         }))
//!     }))
//!     .with_sink(|msg| println!("{}", String::from_utf8_lossy(msg.data())))
//!     .build()?;
//!
//! pipeline.push(Message::new("hello")).ok();
//! pipeline.close()?;
//! # Ok::<(), pipeworks::PipelineError>(())
//! ```

pub mod component;
pub mod components;
pub mod config;
pub mod error;
pub mod message;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod report;

mod link;
mod pool;
mod stage;

// Re-exports for convenience
pub use component::{Component, Factory, Producer};
pub use components::{Attributes, ComponentFactory, Filter, Map, Passthrough, Tag};
pub use config::{PipelineConfig, StageConfig, TopologyConfig};
pub use error::{PipelineError, Result};
pub use message::{Message, ATTEMPTS_ATTRIBUTE};
pub use metrics::{MetricsSnapshot, StageMetrics};
pub use pipeline::{InputHandle, Pipeline, PipelineBuilder};
pub use registry::Registry;
pub use report::{Outcome, Report};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
