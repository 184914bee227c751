//! keeld - Keel control-plane daemon
//!
//! Starts the in-memory cluster backend, optionally seeds it from a
//! directory of YAML manifests, and runs every controller until ctrl-c.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use keel_controllers::{default_manager, OperationMap};
use keel_core::{ClusterClient, EventRecorder, InMemoryCluster};

#[derive(Parser, Debug)]
#[command(name = "keeld", version, about = "Keel agent orchestration control plane")]
struct Args {
    /// Directory of YAML resource manifests loaded at startup
    #[arg(long, env = "KEEL_RESOURCES")]
    resources: Option<PathBuf>,

    /// Reconcile worker count
    #[arg(long, default_value_t = 4, env = "KEEL_WORKERS")]
    workers: usize,

    /// Log filter, e.g. "info" or "keel_controllers=debug"
    #[arg(long, default_value = "info", env = "KEEL_LOG")]
    log_level: String,
}

fn init_telemetry(log_level: &str) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    // OTLP export only when an endpoint is configured.
    let otel_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OTLP tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(otel_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_telemetry(&args.log_level)?;

    let backend = Arc::new(InMemoryCluster::new());
    let cluster = ClusterClient::new(backend.clone());
    let recorder = EventRecorder::new();
    let operations = OperationMap::new();

    if let Some(resources) = &args.resources {
        let count = backend
            .load_dir(resources)
            .await
            .with_context(|| format!("failed to load resources from {:?}", resources))?;
        tracing::info!(count, "loaded resource manifests");
    }

    let version = std::env::var(keel_core::VERSION_ENV)
        .unwrap_or_else(|_| keel_core::VERSION.to_string());
    recorder.normal(
        "Controller",
        "keel/controller-manager",
        "ControllerStart",
        format!("keeld {} starting with {} workers", version, args.workers),
    );

    let manager = default_manager(cluster, recorder, operations, args.workers)?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            signal_token.cancel();
        }
    });

    manager.run(shutdown).await?;
    opentelemetry::global::shutdown_tracer_provider();
    Ok(())
}
