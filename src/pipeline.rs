use crate::component::Factory;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::link::{Gate, InFlight, Link};
use crate::message::Message;
use crate::metrics::StageMetrics;
use crate::stage::{panic_message, PreparedStage, Stage};
use crossbeam::channel::{self, Receiver};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info, info_span};

type SinkFn = Box<dyn FnMut(Message) + Send>;

/// Builder for constructing pipelines
pub struct PipelineBuilder {
    factories: Vec<Box<dyn Factory>>,
    config: PipelineConfig,
    sink: Option<SinkFn>,
}

impl PipelineBuilder {
    /// Create a new pipeline builder
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
            config: PipelineConfig::default(),
            sink: None,
        }
    }

    /// Append a stage built by `factory`
    pub fn stage(mut self, factory: impl Factory) -> Self {
        self.factories.push(Box::new(factory));
        self
    }

    /// Append an already boxed factory
    pub fn boxed_stage(mut self, factory: Box<dyn Factory>) -> Self {
        self.factories.push(factory);
        self
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Retries granted to a message on each stage before it fails
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Capacity of the external input path
    pub fn input_capacity(mut self, capacity: usize) -> Self {
        self.config.input_capacity = capacity;
        self
    }

    /// Build without an external input; the first stage must produce its own messages
    pub fn without_input(mut self) -> Self {
        self.config.external_input = false;
        self
    }

    /// Receive every message leaving the last stage.
    ///
    /// The message is released when the callback returns unless the callback
    /// keeps it. Without a sink, messages are released on arrival.
    pub fn with_sink<F>(mut self, sink: F) -> Self
    where
        F: FnMut(Message) + Send + 'static,
    {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Create every component, then start every stage.
    ///
    /// If any factory fails, nothing is left running: components created so
    /// far are dropped and every factory that was reached is destroyed.
    pub fn build(self) -> Result<Pipeline> {
        if self.factories.is_empty() {
            return Err(PipelineError::NoStages);
        }
        self.config.validate()?;
        let settings = self.config.stage_settings();

        let mut prepared = Vec::with_capacity(self.factories.len());
        for (index, factory) in self.factories.into_iter().enumerate() {
            match PreparedStage::prepare(index, factory) {
                Ok(stage) => prepared.push(stage),
                Err((factory, err)) => {
                    error!(index, error = %err, "pipeline construction failed");
                    for stage in prepared {
                        destroy_quietly(stage.abandon());
                    }
                    destroy_quietly(factory);
                    return Err(err);
                }
            }
        }

        let input_metrics = StageMetrics::new();
        let sink_in_flight = InFlight::default();
        let mut receivers: Vec<InFlight> = prepared.iter().map(PreparedStage::in_flight).collect();
        receivers.push(Arc::clone(&sink_in_flight));

        let (input, mut next_rx): (Option<Arc<Gate>>, Receiver<Message>) =
            if self.config.external_input {
                let (tx, rx) = channel::bounded(self.config.input_capacity);
                let link = Link::new(tx, Arc::clone(&receivers[0]), input_metrics.clone());
                (Some(Arc::new(Gate::new(link))), rx)
            } else {
                (None, channel::never())
            };

        let mut stages: Vec<Stage> = Vec::with_capacity(prepared.len());
        let mut pending = prepared.into_iter().enumerate();
        while let Some((index, stage)) = pending.next() {
            let (tx, rx) = channel::bounded(stage.channel_size());
            let output = Link::new(tx, Arc::clone(&receivers[index + 1]), stage.metrics().clone());
            match stage.start(next_rx, output, settings) {
                Ok(stage) => stages.push(stage),
                Err(err) => {
                    for (_, stage) in pending {
                        destroy_quietly(stage.abandon());
                    }
                    abort(input, stages);
                    return Err(err);
                }
            }
            next_rx = rx;
        }

        let delivered = Arc::new(AtomicU64::new(0));
        let sink = Sink {
            rx: next_rx,
            in_flight: Arc::clone(&sink_in_flight),
            delivered: Arc::clone(&delivered),
            callback: self.sink,
        };
        let sink = match thread::Builder::new()
            .name("pipeline-sink".to_string())
            .spawn(move || sink.run())
        {
            Ok(handle) => handle,
            Err(err) => {
                abort(input, stages);
                return Err(PipelineError::ThreadError(format!(
                    "failed to spawn sink: {err}"
                )));
            }
        };

        info!(
            stages = stages.len(),
            external_input = input.is_some(),
            "pipeline started"
        );
        Ok(Pipeline {
            stages,
            input,
            input_metrics,
            sink: Some(sink),
            sink_in_flight,
            delivered,
            closed: false,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn destroy_quietly(mut factory: Box<dyn Factory>) {
    if let Err(err) = factory.destroy() {
        error!(stage = factory.name(), error = %err, "factory destroy failed");
    }
}

/// Stop stages started by a build that could not finish
fn abort(input: Option<Arc<Gate>>, stages: Vec<Stage>) {
    if let Some(gate) = input {
        gate.close();
    }
    for mut stage in stages {
        if let Err(err) = stage.shutdown() {
            error!(error = %err, "stage shutdown failed during aborted build");
        }
    }
}

/// Drains the last stage's output for the lifetime of the pipeline
struct Sink {
    rx: Receiver<Message>,
    in_flight: InFlight,
    delivered: Arc<AtomicU64>,
    callback: Option<SinkFn>,
}

impl Sink {
    fn run(mut self) {
        let _span = info_span!("sink").entered();
        for msg in self.rx.iter() {
            self.delivered.fetch_add(1, Ordering::Relaxed);
            if let Some(callback) = self.callback.as_mut() {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(msg))) {
                    error!(panic = %panic_message(payload.as_ref()), "sink callback panicked");
                }
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Cloneable handle for feeding messages into the first stage
#[derive(Clone)]
pub struct InputHandle {
    gate: Arc<Gate>,
}

impl InputHandle {
    /// Push a message, blocking while the input is full.
    ///
    /// Hands the message back once the pipeline is closing.
    pub fn push(&self, msg: Message) -> std::result::Result<(), Message> {
        self.gate.push(msg)
    }

    /// Push only if the input has room right now
    pub fn try_push(&self, msg: Message) -> std::result::Result<(), Message> {
        self.gate.try_push(msg)
    }

    /// Whether the pipeline has stopped admitting input
    pub fn is_closed(&self) -> bool {
        self.gate.is_closed()
    }

    /// Input buffer utilization as a percentage (0-100)
    pub fn utilization(&self) -> u32 {
        self.gate.utilization()
    }
}

/// A running chain of stages.
///
/// Closing (explicitly or on drop) stops admission, then drains and stops
/// each stage in order so that no buffered message is lost.
pub struct Pipeline {
    stages: Vec<Stage>,
    input: Option<Arc<Gate>>,
    input_metrics: StageMetrics,
    sink: Option<JoinHandle<()>>,
    sink_in_flight: InFlight,
    delivered: Arc<AtomicU64>,
    closed: bool,
}

impl Pipeline {
    /// Start building a pipeline
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Build a pipeline from an ordered list of factories with default settings
    pub fn construct(factories: Vec<Box<dyn Factory>>) -> Result<Pipeline> {
        factories
            .into_iter()
            .fold(PipelineBuilder::new(), PipelineBuilder::boxed_stage)
            .build()
    }

    /// Handle for feeding the first stage; `None` for producer-only pipelines
    pub fn input(&self) -> Option<InputHandle> {
        self.input.as_ref().map(|gate| InputHandle {
            gate: Arc::clone(gate),
        })
    }

    /// Push one message into the first stage
    pub fn push(&self, msg: Message) -> std::result::Result<(), Message> {
        match &self.input {
            Some(gate) => gate.push(msg),
            None => Err(msg),
        }
    }

    /// Number of stages
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Stage names in pipeline order
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Get metrics for a specific stage
    pub fn stage_metrics(&self, index: usize) -> Option<&StageMetrics> {
        self.stages.get(index).map(Stage::metrics)
    }

    /// Metrics of the external input path (blocked pushes)
    pub fn input_metrics(&self) -> &StageMetrics {
        &self.input_metrics
    }

    /// Messages that reached the sink so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Messages currently queued or being handled anywhere in the pipeline
    pub fn in_flight(&self) -> usize {
        self.stages.iter().map(Stage::in_flight).sum::<usize>()
            + self.sink_in_flight.load(Ordering::SeqCst)
    }

    /// Get a summary of all metrics
    pub fn metrics_summary(&self) -> String {
        let mut summary = String::from("Pipeline Metrics Summary:\n");
        for (i, stage) in self.stages.iter().enumerate() {
            summary.push_str(&format!(
                "  Stage {} ({}): {}\n",
                i,
                stage.name(),
                stage.metrics().snapshot().format()
            ));
        }
        summary.push_str(&format!("  Delivered: {}\n", self.delivered()));
        summary
    }

    /// Stop admission, drain and stop every stage in order, then stop the sink.
    ///
    /// Every factory is destroyed exactly once. A failing stage does not keep
    /// the others from shutting down; all failures are reported together.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        info!(stages = self.stages.len(), "closing pipeline");

        if let Some(gate) = &self.input {
            gate.close();
        }

        let mut failures = Vec::new();
        for mut stage in self.stages.drain(..) {
            stage.drain();
            match stage.shutdown() {
                Ok(()) => {}
                Err(PipelineError::Shutdown(reason)) => failures.push(reason),
                Err(err) => failures.push(err.to_string()),
            }
        }

        if let Some(sink) = self.sink.take() {
            if sink.join().is_err() {
                failures.push("sink thread panicked".to_string());
            }
        }

        info!(delivered = self.delivered(), "pipeline closed");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Shutdown(failures.join("; ")))
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            error!(error = %err, "pipeline shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{ComponentFactory, Passthrough};

    #[test]
    fn test_no_stages_error() {
        let result = PipelineBuilder::new().build();
        assert!(matches!(result, Err(PipelineError::NoStages)));
    }

    #[test]
    fn test_pipeline_input_handle() {
        let pipeline = PipelineBuilder::new()
            .stage(ComponentFactory::cloning("stage1", Passthrough))
            .build()
            .unwrap();
        let input = pipeline.input().unwrap();
        assert!(!input.is_closed());
        assert_eq!(pipeline.stage_names(), vec!["stage1"]);
        pipeline.close().unwrap();
        assert!(input.is_closed());
        assert!(input.push(Message::new(vec![1])).is_err());
    }

    #[test]
    fn test_producer_only_pipeline_has_no_input() {
        let pipeline = PipelineBuilder::new()
            .stage(ComponentFactory::cloning("source", Passthrough))
            .without_input()
            .build()
            .unwrap();
        assert!(pipeline.input().is_none());
        assert!(pipeline.push(Message::new(vec![1])).is_err());
    }

    #[test]
    fn test_construct_and_summary() {
        let pipeline = Pipeline::construct(vec![
            Box::new(ComponentFactory::cloning("a", Passthrough)),
            Box::new(ComponentFactory::cloning("b", Passthrough).with_pool_size(2)),
        ])
        .unwrap();
        pipeline.push(Message::new(vec![1])).unwrap();

        let summary = pipeline.metrics_summary();
        assert!(summary.contains("Stage 0 (a)"));
        assert!(summary.contains("Stage 1 (b)"));
        assert_eq!(pipeline.stage_count(), 2);
        pipeline.close().unwrap();
    }
}
