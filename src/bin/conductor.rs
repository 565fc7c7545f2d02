//! `conductor` — the long-running scheduling/execution daemon. Exits 0 on a
//! clean stop (SIGTERM/SIGUSR1/SIGUSR2), non-zero on startup failure.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use conductor_core::cli::ConductorArgs;
use conductor_core::config::load_config_file;
use conductor_core::drivers::DriverRegistry;
use conductor_core::metrics;
use conductor_core::registrar::ShutdownMode;
use conductor_core::server::ConductorApp;

#[tokio::main]
async fn main() -> ExitCode {
    let args = ConductorArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.daemon.tracing_filter())))
        .init();

    let config = match load_config_file(&args.daemon.config) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "failed to load config");
            return ExitCode::FAILURE;
        }
    };

    let hostname = args.daemon.conductor_group.clone().unwrap_or_else(|| {
        hostname::get().ok().and_then(|h| h.into_string().ok()).unwrap_or_else(|| "conductor".to_string())
    });

    // Concrete driver interface implementations (redfish, ipmi, …) are an
    // external collaborator; a real deployment registers them here before
    // bootstrap.
    let drivers = Arc::new(DriverRegistry::new());
    let metrics = metrics::noop();

    let mut app = match ConductorApp::bootstrap(&config, hostname, drivers, metrics) {
        Ok(app) => app,
        Err(err) => {
            tracing::error!(error = %err, "failed to bootstrap conductor");
            return ExitCode::FAILURE;
        }
    };
    app.spawn_periodics(&config);

    tracing::info!(hostname = %app.hostname, "conductor started");

    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(err) => {
            tracing::error!(error = %err, "failed to install SIGTERM handler");
            return ExitCode::FAILURE;
        }
    };
    let mut sigusr1 = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined1()).ok();
    let mut sigusr2 = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined2()).ok();

    let mode = tokio::select! {
        _ = sigterm.recv() => ShutdownMode::Deregister,
        _ = async { if let Some(sig) = sigusr1.as_mut() { sig.recv().await; } else { std::future::pending().await } } => ShutdownMode::NoDeregister,
        _ = async { if let Some(sig) = sigusr2.as_mut() { sig.recv().await; } else { std::future::pending().await } } => ShutdownMode::Drain,
    };

    app.shutdown(mode, std::time::Duration::from_secs(config.conductor.drain_shutdown_timeout_secs)).await;
    ExitCode::SUCCESS
}
