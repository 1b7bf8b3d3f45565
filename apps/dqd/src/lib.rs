//! dqd: queue-to-handler dispatcher
//!
//! Pulls messages from configured queue sources and dispatches them to a
//! handler under an adaptive concurrency limit.
//!
//! ## Architecture
//!
//! ```text
//! YAML config (dirs → files → --set overrides)
//!   ↓
//! App { sources, workers }
//!   ↓
//! Worker per pipe (pipe-worker)
//!   ├─ intake: Source → Consumer → MessageSink
//!   ├─ dispatch: AdmissionGate → Handler (none | http)
//!   └─ resolution: output / onError.writeTo / retry
//!
//! HTTP listener   POST /{source}      → Producer
//! API             GET /health, /metrics
//! ```
//!
//! ## Modules
//!
//! - `config`: loading, normalisation and wiring of sources and pipes
//! - `providers`: queue provider kinds (`redis-stream`, `io`)
//! - `handlers`: handler kinds (`none`, `http`)
//! - `listener`: HTTP intake into sources
//! - `api`: health and metrics endpoints
//! - `health_gate`: start-up dependency wait
//! - `shutdown`: signal handling

pub mod api;
pub mod cli;
pub mod config;
pub mod handlers;
pub mod health_gate;
pub mod listener;
pub mod providers;
pub mod shutdown;

use clap::Parser;
use core_config::health_gate::HealthGateConfig;
use core_config::tracing::{init_tracing, install_color_eyre};
use core_config::{Environment, FromEnv};
use eyre::{Result, WrapErr, eyre};
use pipe_worker::HealthRegistry;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use cli::Cli;
use config::App;

/// Run the dispatcher
///
/// 1. Loads and merges configuration
/// 2. Sets up tracing and the Prometheus recorder
/// 3. Waits for the optional start-up health endpoint
/// 4. Starts the API, the HTTP listener and one worker per pipe
/// 5. Runs until a shutdown signal or the first fatal pipe error
pub async fn run() -> Result<()> {
    install_color_eyre();

    let cli = Cli::parse();
    let config = config::load(&cli.into_inputs()).wrap_err("Failed to load configuration")?;

    let environment = Environment::from_env();
    init_tracing(&environment, &config.log_level);
    pipe_worker::init_metrics().wrap_err("Failed to initialize metrics")?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting dqd");
    info!("Environment: {:?}", environment);

    let cancel = CancellationToken::new();
    let signals = shutdown::cancel_on_signal(cancel.clone());

    let gate = HealthGateConfig::from_env().wrap_err("Failed to load health gate configuration")?;
    health_gate::wait_for_health(&gate, &cancel).await?;
    if cancel.is_cancelled() {
        info!("Shutdown requested before start");
        signals.abort();
        return Ok(());
    }

    let app = App::build(config).wrap_err("Invalid configuration")?;

    let registry = HealthRegistry::new();
    for worker in &app.workers {
        registry.register(worker.name(), worker.clone());
    }

    let mut servers = JoinSet::new();
    servers.spawn(api::serve(app.metrics_port, registry, cancel.clone()));
    let router = listener::router(&app.sources).await;
    let listener_host = app.listener_host.clone();
    let listener_cancel = cancel.clone();
    servers.spawn(async move { listener::serve(&listener_host, router, listener_cancel).await });

    let mut workers = JoinSet::new();
    for worker in app.workers.iter().cloned() {
        let cancel = cancel.clone();
        workers.spawn(async move {
            let result = worker.start(cancel).await;
            (worker.name().to_string(), result)
        });
    }
    info!(pipes = app.workers.len(), "Pipes started");

    let mut failure: Option<eyre::Report> = None;
    loop {
        tokio::select! {
            Some(joined) = workers.join_next() => match joined {
                Ok((name, Ok(()))) => info!(pipe = %name, "Pipe stopped"),
                Ok((name, Err(e))) => {
                    error!(pipe = %name, error = %e, "Pipe failed");
                    failure.get_or_insert_with(|| {
                        eyre::Report::new(e).wrap_err(format!("Pipe '{}' failed", name))
                    });
                    cancel.cancel();
                }
                Err(e) => {
                    error!(error = %e, "Pipe task aborted");
                    failure.get_or_insert_with(|| eyre!("Pipe task aborted: {}", e));
                    cancel.cancel();
                }
            },
            Some(joined) = servers.join_next() => match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(error = %e, "Server failed");
                    failure.get_or_insert(e);
                    cancel.cancel();
                }
                Err(e) => {
                    error!(error = %e, "Server task aborted");
                    failure.get_or_insert_with(|| eyre!("Server task aborted: {}", e));
                    cancel.cancel();
                }
            },
            else => break,
        }
    }

    signals.abort();

    match failure {
        Some(report) => Err(report),
        None => {
            info!("dqd stopped");
            Ok(())
        }
    }
}
