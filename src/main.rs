//! PADDI-OS - Paddy AWD Operational Intelligence
//!
//! Field-side controller process: wires the embedded store, gateways,
//! decision engine, and irrigation runner, serves the operational HTTP API,
//! and runs the background tasks (gate command monitor, event uploader).
//!
//! # Usage
//!
//! ```bash
//! # Run with the default config file (./paddi-os.toml) and data dir
//! cargo run --release
//!
//! # Override the bind address and data directory
//! cargo run --release -- --addr 0.0.0.0:9000 --data-dir /var/lib/paddi-os
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: logging filter (default: info)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use paddi_os::api::{create_router, ApiState};
use paddi_os::clock::SystemClock;
use paddi_os::config::ControllerConfig;
use paddi_os::decision::DecisionEngine;
use paddi_os::events::{EventQueue, EventUploader, QueuePublisher};
use paddi_os::fields::FieldConfigStore;
use paddi_os::gateway::{CommandMonitor, GateActuator, HttpSensorGateway, HydraulicClient};
use paddi_os::learning::Learner;
use paddi_os::runner::{ActiveRegistry, IrrigationRunner};
use paddi_os::service::ControlService;
use paddi_os::store::{MemoryCache, SledStore};

#[derive(Parser, Debug)]
#[command(name = "paddi-os")]
#[command(about = "PADDI-OS AWD irrigation controller")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "paddi-os.toml")]
    config: PathBuf,

    /// Override the HTTP bind address from the config file
    #[arg(short, long)]
    addr: Option<String>,

    /// Override the data directory from the config file
    #[arg(long)]
    data_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = CliArgs::parse();
    let mut config = ControllerConfig::load(&args.config)?;
    if let Some(addr) = args.addr {
        config.server_addr = addr;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    info!("PADDI-OS starting");
    info!(addr = %config.server_addr, data_dir = %config.data_dir, "Configuration loaded");

    std::fs::create_dir_all(&config.data_dir).context("Could not create data directory")?;

    // Storage and cache
    let store = Arc::new(
        SledStore::open(PathBuf::from(&config.data_dir).join("db"))
            .context("Could not open embedded store")?,
    );
    let cache = Arc::new(MemoryCache::new());
    let clock = Arc::new(SystemClock);

    // Durable event pipeline
    let queue = Arc::new(
        EventQueue::open(PathBuf::from(&config.data_dir).join("events"))
            .context("Could not open event queue")?,
    );
    let publisher = Arc::new(QueuePublisher::new(queue.clone()));

    let cancel = CancellationToken::new();

    if config.broker.base_url.is_empty() {
        warn!("No broker configured; events stay queued on disk");
    } else {
        let uploader = EventUploader::new(queue.clone(), &config.broker);
        tokio::spawn(uploader.run(cancel.clone()));
    }

    // Gateways
    let sensors = Arc::new(HttpSensorGateway::new(
        &config.sensor_data,
        &config.weather,
        cache.clone(),
        store.clone(),
        clock.clone(),
    ));
    let hydraulic = HydraulicClient::new(&config.hydraulic);
    let actuator = Arc::new(GateActuator::new(
        &config.scada,
        hydraulic,
        store.clone(),
        store.clone(),
        publisher.clone(),
        clock.clone(),
    ));
    let monitor = CommandMonitor::new(
        actuator.clone(),
        store.clone(),
        publisher.clone(),
        clock.clone(),
    );
    tokio::spawn(monitor.run(cancel.clone()));

    // Core services
    let registry = Arc::new(ActiveRegistry::new());
    let fields = Arc::new(FieldConfigStore::new(
        store.clone(),
        cache.clone(),
        publisher.clone(),
        clock.clone(),
    ));
    let learner = Arc::new(Learner::new(store.clone(), cache.clone(), clock.clone()));
    let runner = IrrigationRunner::new(
        sensors.clone(),
        actuator.clone(),
        store.clone(),
        cache.clone(),
        publisher.clone(),
        registry.clone(),
        clock.clone(),
    );
    let engine = DecisionEngine::new(
        fields.clone(),
        sensors.clone(),
        registry.clone(),
        cache.clone(),
        learner.clone(),
        clock.clone(),
    );
    let service = Arc::new(ControlService::new(
        engine,
        runner,
        fields,
        learner,
        registry,
        cache,
        publisher,
        clock,
    ));

    // HTTP surface
    let app = create_router(Arc::new(ApiState {
        service: service.clone(),
    }));
    let listener = tokio::net::TcpListener::bind(&config.server_addr)
        .await
        .with_context(|| format!("Could not bind {}", config.server_addr))?;
    info!(addr = %config.server_addr, "HTTP API listening");

    let shutdown_cancel = cancel.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_cancel.cancelled().await });

    tokio::spawn(wait_for_signal(cancel.clone()));

    server.await.context("HTTP server failed")?;

    // Drain active runs before exit; each stop blocks on its gate close
    info!("Shutting down: stopping active irrigations");
    service.shutdown().await;
    info!("PADDI-OS stopped");
    Ok(())
}

/// Trigger cancellation on SIGINT or SIGTERM
async fn wait_for_signal(cancel: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!(error = %e, "Could not install SIGTERM handler");
                let _ = ctrl_c.await;
                cancel.cancel();
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => info!("SIGINT received"),
            _ = term.recv() => info!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("Ctrl-C received");
    }

    cancel.cancel();
}
