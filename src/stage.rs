use crate::component::{Component, Factory, Producer};
use crate::error::{PipelineError, Result};
use crate::link::{Gate, InFlight, Link};
use crate::message::Message;
use crate::metrics::StageMetrics;
use crate::pool::ComponentPool;
use crate::report::{Outcome, Report};
use crossbeam::channel::{self, select, Receiver, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info_span, warn};

/// Settings a stage needs from the pipeline configuration
#[derive(Debug, Clone, Copy)]
pub(crate) struct StageSettings {
    pub max_retries: u32,
    pub drain_poll: Duration,
    pub produce_grace: Duration,
}

/// A stage whose components exist but whose workers have not started.
///
/// Creating every stage's components before starting any worker keeps a
/// failed `create` from leaving a half-running pipeline behind.
pub(crate) struct PreparedStage {
    index: usize,
    name: String,
    factory: Box<dyn Factory>,
    pool: ComponentPool,
    in_flight: InFlight,
    produce_gate: Arc<Gate>,
    produce_rx: Receiver<Message>,
    metrics: StageMetrics,
}

impl PreparedStage {
    /// Validate the factory's sizing and create all of its components.
    ///
    /// On error the factory is handed back so the caller can destroy it.
    pub(crate) fn prepare(
        index: usize,
        mut factory: Box<dyn Factory>,
    ) -> std::result::Result<Self, (Box<dyn Factory>, PipelineError)> {
        let name = factory.name().to_string();
        let pool_size = factory.pool_size();
        if pool_size == 0 {
            return Err((factory, PipelineError::InvalidPoolSize { stage: name }));
        }

        let metrics = StageMetrics::new();
        let in_flight = InFlight::default();
        let (produce_tx, produce_rx) = channel::bounded(factory.channel_size());
        let produce_gate = Arc::new(Gate::new(Link::new(
            produce_tx,
            Arc::clone(&in_flight),
            metrics.clone(),
        )));

        let mut components: Vec<Box<dyn Component>> = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            match factory.create(Producer::new(Arc::clone(&produce_gate))) {
                Ok(component) => components.push(component),
                Err(err) => {
                    produce_gate.close();
                    let err = PipelineError::ComponentCreation {
                        stage: name,
                        reason: err.to_string(),
                    };
                    return Err((factory, err));
                }
            }
        }

        debug!(stage = %name, index, pool_size, "stage prepared");
        Ok(Self {
            index,
            name,
            factory,
            pool: ComponentPool::new(components),
            in_flight,
            produce_gate,
            produce_rx,
            metrics,
        })
    }

    /// In-flight counter of this stage, used by whoever feeds its input
    pub(crate) fn in_flight(&self) -> InFlight {
        Arc::clone(&self.in_flight)
    }

    pub(crate) fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }

    pub(crate) fn channel_size(&self) -> usize {
        self.factory.channel_size()
    }

    /// Tear down a stage that never started
    pub(crate) fn abandon(self) -> Box<dyn Factory> {
        self.produce_gate.close();
        self.factory
    }

    /// Spawn the workers, reading from `input` and writing to `output`
    pub(crate) fn start(
        self,
        input: Receiver<Message>,
        output: Link,
        settings: StageSettings,
    ) -> Result<Stage> {
        let (terminate_tx, terminate_rx) = channel::bounded::<()>(0);
        let (retry_tx, retry_rx) = channel::unbounded();

        let mut stage = Stage {
            index: self.index,
            name: self.name,
            factory: Some(self.factory),
            in_flight: self.in_flight,
            produce_gate: self.produce_gate,
            terminate: Some(terminate_tx),
            workers: Vec::with_capacity(self.pool.size()),
            metrics: self.metrics,
            settings,
        };

        for worker_id in 0..self.pool.size() {
            let worker = Worker {
                stage: stage.name.clone(),
                index: stage.index,
                id: worker_id,
                pool: self.pool.clone(),
                input: input.clone(),
                retry_tx: retry_tx.clone(),
                retry_rx: retry_rx.clone(),
                produce: self.produce_rx.clone(),
                output: output.clone(),
                terminate: terminate_rx.clone(),
                in_flight: Arc::clone(&stage.in_flight),
                metrics: stage.metrics.clone(),
                max_retries: settings.max_retries,
            };

            let spawned = thread::Builder::new()
                .name(format!("{}-{}", stage.name, worker_id))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => stage.workers.push(handle),
                Err(err) => {
                    // Stop the workers that did start and destroy the factory.
                    if let Err(shutdown_err) = stage.shutdown() {
                        error!(stage = %stage.name, error = %shutdown_err, "stage shutdown failed after spawn error");
                    }
                    return Err(PipelineError::ThreadError(format!(
                        "failed to spawn worker {worker_id} of stage '{}': {err}",
                        stage.name
                    )));
                }
            }
        }

        debug!(stage = %stage.name, workers = stage.workers.len(), "stage started");
        Ok(stage)
    }
}

/// A running stage: a pool of workers over one set of paths.
pub(crate) struct Stage {
    index: usize,
    name: String,
    factory: Option<Box<dyn Factory>>,
    in_flight: InFlight,
    produce_gate: Arc<Gate>,
    terminate: Option<Sender<()>>,
    workers: Vec<JoinHandle<()>>,
    metrics: StageMetrics,
    settings: StageSettings,
}

impl Stage {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }

    /// Messages queued on or being handled by this stage
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until nothing is queued or being handled, for at most `limit`.
    ///
    /// Returns whether the stage went idle.
    fn wait_idle(&self, limit: Option<Duration>) -> bool {
        let deadline = limit.map(|limit| Instant::now() + limit);
        while self.in_flight() > 0 {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return false;
            }
            thread::sleep(self.settings.drain_poll);
        }
        true
    }

    /// Bring the stage to quiescence while its workers keep running.
    ///
    /// Upstream must already be stopped. Components get `produce_grace` to
    /// stop emitting on their own; after that the produce path closes and any
    /// late `produce` call gets its message back.
    pub(crate) fn drain(&self) {
        let _span = info_span!("drain", stage = %self.name, index = self.index).entered();
        if !self.wait_idle(Some(self.settings.produce_grace)) {
            debug!(
                in_flight = self.in_flight(),
                "stage still busy after grace period, closing produce path"
            );
        }
        self.produce_gate.close();
        self.wait_idle(None);
        debug!("stage drained");
    }

    /// Terminate the workers, drop the components and destroy the factory.
    ///
    /// Dropping the stage afterwards drops the last senders on its output,
    /// which lets the next stage see its input disconnect.
    pub(crate) fn shutdown(&mut self) -> Result<()> {
        self.produce_gate.close();
        self.terminate.take();
        let mut failures = self.join_workers();

        if let Some(mut factory) = self.factory.take() {
            if let Err(err) = factory.destroy() {
                error!(stage = %self.name, error = %err, "factory destroy failed");
                failures.push(format!("destroy: {err}"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Shutdown(format!(
                "stage '{}': {}",
                self.name,
                failures.join("; ")
            )))
        }
    }

    fn join_workers(&mut self) -> Vec<String> {
        let mut failures = Vec::new();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                failures.push("worker thread panicked".to_string());
            }
        }
        failures
    }
}

enum Path {
    Input,
    Produce,
}

/// One worker task of a stage.
struct Worker {
    stage: String,
    index: usize,
    id: usize,
    pool: ComponentPool,
    input: Receiver<Message>,
    retry_tx: Sender<Message>,
    retry_rx: Receiver<Message>,
    produce: Receiver<Message>,
    output: Link,
    terminate: Receiver<()>,
    in_flight: InFlight,
    metrics: StageMetrics,
    max_retries: u32,
}

impl Worker {
    fn run(mut self) {
        let _span = info_span!("stage", name = %self.stage, index = self.index, worker = self.id)
            .entered();

        loop {
            // Retries go ahead of fresh input.
            if let Ok(msg) = self.retry_rx.try_recv() {
                self.handle(msg);
                continue;
            }

            let mut closed = None;
            select! {
                recv(self.retry_rx) -> msg => {
                    if let Ok(msg) = msg {
                        self.handle(msg);
                    }
                }
                recv(self.input) -> msg => match msg {
                    Ok(msg) => self.handle(msg),
                    Err(_) => closed = Some(Path::Input),
                },
                recv(self.produce) -> msg => match msg {
                    Ok(msg) => {
                        self.metrics.record_produced();
                        self.forward(msg);
                    }
                    Err(_) => closed = Some(Path::Produce),
                },
                recv(self.terminate) -> _ => break,
            }

            // A disconnected path would be ready forever; stop watching it.
            match closed {
                Some(Path::Input) => self.input = channel::never(),
                Some(Path::Produce) => self.produce = channel::never(),
                None => {}
            }
        }
    }

    fn handle(&self, mut msg: Message) {
        let started = Instant::now();
        let report = {
            let mut component = self.pool.checkout();
            match panic::catch_unwind(AssertUnwindSafe(|| component.handle(&mut msg))) {
                Ok(report) => report,
                Err(payload) => {
                    self.metrics.record_panic();
                    let reason = panic_message(payload.as_ref());
                    warn!(stage = %self.stage, panic = %reason, "component panicked while handling a message");
                    Report::fail(format!("component panicked: {reason}"))
                }
            }
        };
        self.metrics.record_handled(started.elapsed());
        msg.set_report(report);
        self.route(msg);
    }

    fn route(&self, mut msg: Message) {
        let mut outcome = msg.report().outcome();

        if outcome == Outcome::Retry {
            // A preset counter at or past the limit counts as exhausted.
            let used = msg.attempts();
            if used < self.max_retries {
                msg.set_attempts(used + 1);
                self.metrics.record_outcome(Outcome::Retry);
                // Stays in flight on this stage.
                if let Err(err) = self.retry_tx.send(msg) {
                    error!(stage = %self.stage, "retry lane closed, releasing message");
                    err.into_inner().release();
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                }
                return;
            }

            let last = msg.report().description.clone();
            msg.set_report(Report::fail(format!(
                "retries exhausted after {} attempts: {}",
                self.max_retries, last
            )));
            outcome = Outcome::Fail;
        }

        self.metrics.record_outcome(outcome);
        match outcome {
            Outcome::Done => {
                msg.clear_attempts();
                self.forward(msg);
                return;
            }
            Outcome::Fail => {
                let report = msg.report();
                warn!(
                    stage = %self.stage,
                    status = report.status,
                    description = %report.description,
                    "message failed"
                );
            }
            Outcome::Continue | Outcome::Drop | Outcome::Retry => {}
        }

        msg.release();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Send downstream, blocking while the output is full
    fn forward(&self, msg: Message) {
        if let Err(msg) = self.output.send(msg) {
            error!(stage = %self.stage, "downstream is gone, releasing message");
            msg.release();
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
