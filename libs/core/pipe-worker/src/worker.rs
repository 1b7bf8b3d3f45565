//! Pipe worker
//!
//! A [`Worker`] runs one pipe: it pulls messages from its input sources,
//! admits them to the handler under a concurrency limit, and resolves each
//! handled message against its provider and the optional output/error sinks.
//!
//! ```text
//! source A ─┐                                     ┌─> complete / abort
//! source B ─┼─> intake ─> dispatch ─> handler ─> results ─> resolution
//! source C ─┘      (limit-gated by the rate controller)  └─> output / error sink
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::config::{RateConfig, WorkerConfig};
use crate::context::RequestContext;
use crate::controller::RateController;
use crate::error::{PipeError, SourceError};
use crate::gate::{AdmissionGate, Permit};
use crate::handler::Handler;
use crate::health::{HealthChecker, HealthState, HealthStatus};
use crate::metrics::PipeMetrics;
use crate::probe::HealthProbe;
use crate::resolver::ResultResolver;
use crate::source::{Consumer, MessageSink, Producer, Source};

/// Delay before a consumer that stopped on its own is restarted.
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Health key for a source's intake loop.
const INTAKE_KEY: &str = "intake";

/// One running pipe.
pub struct Worker {
    name: Arc<str>,
    sources: Vec<Arc<Source>>,
    output: Option<Arc<Source>>,
    error_source: Option<Arc<Source>>,
    handler: Arc<dyn Handler>,
    rate: RateConfig,
    drain_timeout: Duration,
    health_interval: Duration,
    probe: HealthProbe,
    gate: Arc<AdmissionGate>,
    metrics: PipeMetrics,
    span: Span,
}

impl Worker {
    /// Create a worker.
    ///
    /// Must be called from within a Tokio runtime (the health probe runs as
    /// its own task).
    pub fn new(
        sources: Vec<Arc<Source>>,
        handler: Arc<dyn Handler>,
        config: WorkerConfig,
    ) -> Result<Self, PipeError> {
        config.validate()?;
        if sources.is_empty() {
            return Err(PipeError::Config(format!(
                "pipe '{}' has no input sources",
                config.name
            )));
        }

        let metrics = PipeMetrics::new(config.name.clone());
        let gate = Arc::new(AdmissionGate::new(config.rate.initial(), config.rate.min()));
        metrics.concurrency_limit(gate.limit());

        Ok(Self {
            span: info_span!("worker", pipe = %config.name),
            name: config.name.into(),
            sources,
            output: config.output,
            error_source: config.error_source,
            handler,
            rate: config.rate,
            drain_timeout: config.drain_timeout,
            health_interval: config.health_interval,
            probe: HealthProbe::spawn(),
            gate,
            metrics,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current admission limit.
    pub fn concurrency_limit(&self) -> usize {
        self.gate.limit()
    }

    /// Handler tasks currently running.
    pub fn in_flight(&self) -> usize {
        self.gate.in_flight()
    }

    /// Run the pipe until `cancel` fires or an intake fails.
    ///
    /// Returns `Ok(())` after a cancellation once the owned tasks have
    /// stopped (in-flight work is given `drain_timeout` to finish), or the
    /// first fatal error otherwise.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), PipeError> {
        self.run(cancel).instrument(self.span.clone()).await
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), PipeError> {
        let scope = cancel.child_token();
        let capacity = self.rate.min();

        let resolver = ResultResolver::new(
            self.name.clone(),
            sink_producer(self.output.as_ref()).await?,
            sink_producer(self.error_source.as_ref()).await?,
            self.metrics.clone(),
        );

        info!(
            sources = self.sources.len(),
            handler = self.handler.name(),
            limit = self.gate.limit(),
            fixed = self.rate.is_fixed(),
            "Starting worker"
        );

        let (intake_tx, intake_rx) = mpsc::channel::<RequestContext>(capacity);
        let (results_tx, results_rx) = mpsc::channel::<RequestContext>(capacity);

        let mut intakes: JoinSet<Result<(), PipeError>> = JoinSet::new();
        for source in &self.sources {
            let sink = MessageSink::new(source.name(), scope.clone(), intake_tx.clone());
            let task = Intake {
                source: source.clone(),
                sink,
                cancel: scope.clone(),
                probe: self.probe.clone(),
                health_interval: self.health_interval,
            };
            intakes.spawn(
                task.run()
                    .instrument(info_span!(parent: &self.span, "intake", source = %source.name())),
            );
        }
        drop(intake_tx);

        let handlers = TaskTracker::new();
        let resolutions = TaskTracker::new();

        let dispatch = Dispatch {
            intake: intake_rx,
            results: results_tx,
            handler: self.handler.clone(),
            gate: self.gate.clone(),
            tracker: handlers.clone(),
            cancel: scope.clone(),
            dynamic: !self.rate.is_fixed(),
            metrics: self.metrics.clone(),
            span: self.span.clone(),
        };
        let dispatch = tokio::spawn(dispatch.run().instrument(self.span.clone()));

        let controller: Option<JoinHandle<()>> = match self.rate {
            RateConfig::Dynamic { window, .. } => {
                let controller =
                    RateController::new(self.gate.clone(), window, self.metrics.clone());
                Some(tokio::spawn(
                    controller.run(scope.clone()).instrument(self.span.clone()),
                ))
            }
            RateConfig::Fixed(_) => None,
        };

        let resolution = tokio::spawn(
            resolve_results(
                results_rx,
                resolver,
                resolutions.clone(),
                scope.clone(),
                self.span.clone(),
            )
            .instrument(self.span.clone()),
        );

        let mut failure: Option<PipeError> = None;
        while let Some(joined) = intakes.join_next().await {
            let outcome = joined.map_err(|e| PipeError::Task(e.to_string())).and_then(|r| r);
            if let Err(e) = outcome {
                error!(error = %e, "Intake failed, stopping worker");
                failure.get_or_insert(e);
                scope.cancel();
            }
        }
        // Every intake returns Ok only once the scope is cancelled.
        scope.cancel();

        let owned = [
            ("dispatch", Some(dispatch)),
            ("controller", controller),
            ("resolution", Some(resolution)),
        ];
        for (task, handle) in owned {
            let Some(handle) = handle else { continue };
            if let Err(e) = handle.await {
                error!(task, error = %e, "Worker task failed");
                failure.get_or_insert(PipeError::Task(e.to_string()));
            }
        }

        handlers.close();
        resolutions.close();
        let drained = tokio::time::timeout(self.drain_timeout, async {
            handlers.wait().await;
            resolutions.wait().await;
        })
        .await;
        if drained.is_err() {
            warn!(
                handlers = handlers.len(),
                resolutions = resolutions.len(),
                timeout_secs = self.drain_timeout.as_secs_f64(),
                "Drain timeout elapsed, detaching in-flight tasks"
            );
        }

        self.probe.flush().await;
        match failure {
            Some(e) => Err(e),
            None => {
                info!("Worker stopped");
                Ok(())
            }
        }
    }
}

impl HealthChecker for Worker {
    fn health_status(&self) -> HealthStatus {
        self.probe.health_status()
    }
}

async fn sink_producer(
    source: Option<&Arc<Source>>,
) -> Result<Option<Arc<dyn Producer>>, PipeError> {
    let Some(source) = source else {
        return Ok(None);
    };
    source
        .create_producer()
        .await
        .map(Some)
        .map_err(|error| PipeError::Sink {
            source_name: source.name().to_string(),
            error,
        })
}

/// Intake loop for one source.
struct Intake {
    source: Arc<Source>,
    sink: MessageSink,
    cancel: CancellationToken,
    probe: HealthProbe,
    health_interval: Duration,
}

impl Intake {
    async fn run(self) -> Result<(), PipeError> {
        let prefix = self.source.name().to_string();
        self.probe
            .update_status(HealthStatus::single(INTAKE_KEY, HealthState::Init), &prefix);

        let consumer = match self.source.create_consumer().await {
            Ok(consumer) => consumer,
            Err(error) => return self.fail(&prefix, error),
        };
        self.probe
            .update_status(HealthStatus::single(INTAKE_KEY, HealthState::Healthy), &prefix);
        info!("Consuming");

        loop {
            let outcome = self.consume(consumer.clone(), &prefix).await;
            if self.cancel.is_cancelled() {
                if let Err(e) = outcome {
                    debug!(error = %e, "Consumer returned error during shutdown");
                }
                return Ok(());
            }
            match outcome {
                Ok(()) => {
                    warn!("Consumer stopped, restarting");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(RESTART_DELAY) => {}
                    }
                }
                Err(error) => return self.fail(&prefix, error),
            }
        }
    }

    /// Run one consumer pass while polling its health into the probe.
    async fn consume(
        &self,
        consumer: Arc<dyn Consumer>,
        prefix: &str,
    ) -> Result<(), SourceError> {
        let checker: Arc<dyn HealthChecker> = Arc::new(ConsumerHealth(consumer.clone()));
        let iter = consumer.iter(self.cancel.clone(), self.sink.clone());
        tokio::pin!(iter);

        let mut ticker = tokio::time::interval(self.health_interval);
        loop {
            tokio::select! {
                outcome = &mut iter => return outcome,
                _ = ticker.tick() => self.probe.send_check(checker.clone(), prefix),
            }
        }
    }

    fn fail(&self, prefix: &str, error: SourceError) -> Result<(), PipeError> {
        error!(error = %error, "Intake failed");
        self.probe.update_status(
            HealthStatus::single(INTAKE_KEY, HealthState::error(&error)),
            prefix,
        );
        Err(PipeError::Intake {
            source_name: prefix.to_string(),
            error,
        })
    }
}

/// Adapter exposing a consumer's health as a standalone checker.
struct ConsumerHealth(Arc<dyn Consumer>);

impl HealthChecker for ConsumerHealth {
    fn health_status(&self) -> HealthStatus {
        self.0.health_status()
    }
}

/// Admission-gated dispatch from the intake queue to handler tasks.
struct Dispatch {
    intake: mpsc::Receiver<RequestContext>,
    results: mpsc::Sender<RequestContext>,
    handler: Arc<dyn Handler>,
    gate: Arc<AdmissionGate>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    dynamic: bool,
    metrics: PipeMetrics,
    span: Span,
}

impl Dispatch {
    async fn run(mut self) {
        loop {
            let ctx = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                ctx = self.intake.recv() => match ctx {
                    Some(ctx) => ctx,
                    None => break,
                },
            };

            // A message dropped here was never acknowledged and is redelivered
            // by its provider.
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = self.gate.acquire() => permit,
            };
            self.metrics.in_flight(self.gate.in_flight());

            let task = HandleTask {
                handler: self.handler.clone(),
                results: self.results.clone(),
                gate: self.gate.clone(),
                dynamic: self.dynamic,
                metrics: self.metrics.clone(),
            };
            self.tracker
                .spawn(task.run(ctx, permit).instrument(self.span.clone()));
        }
        debug!("Dispatch stopped");
    }
}

/// One admitted handler invocation.
struct HandleTask {
    handler: Arc<dyn Handler>,
    results: mpsc::Sender<RequestContext>,
    gate: Arc<AdmissionGate>,
    dynamic: bool,
    metrics: PipeMetrics,
}

impl HandleTask {
    async fn run(self, mut ctx: RequestContext, permit: Permit) {
        let started = Instant::now();
        let result = self.handler.handle(&ctx, ctx.message()).await;

        let success = result.is_ok();
        self.metrics
            .handler_processed(ctx.source(), success, started.elapsed());
        if let Err(e) = &result {
            self.metrics.handler_error(ctx.source(), e.severity());
            debug!(
                source = %ctx.source(),
                message_id = %ctx.message().id(),
                severity = %e.severity(),
                error = %e,
                "Handler failed"
            );
        }

        ctx.set_result(result);
        drop(permit);
        if self.dynamic {
            self.gate.record_processed();
        }

        let cancel = ctx.cancellation().clone();
        if cancel.is_cancelled() {
            debug!(
                source = %ctx.source(),
                message_id = %ctx.message().id(),
                "Pipe cancelled, dropping result"
            );
            return;
        }
        tokio::select! {
            _ = cancel.cancelled() => debug!("Pipe cancelled, dropping result"),
            sent = self.results.send(ctx) => {
                if sent.is_err() {
                    debug!("Result queue closed, dropping result");
                }
            }
        }
    }
}

async fn resolve_results(
    mut results: mpsc::Receiver<RequestContext>,
    resolver: ResultResolver,
    tracker: TaskTracker,
    cancel: CancellationToken,
    span: Span,
) {
    loop {
        let ctx = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            ctx = results.recv() => match ctx {
                Some(ctx) => ctx,
                None => break,
            },
        };
        let resolver = resolver.clone();
        tracker.spawn(
            async move {
                resolver.resolve(ctx).await;
            }
            .instrument(span.clone()),
        );
    }
    debug!("Result resolution stopped");
}
