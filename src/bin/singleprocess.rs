//! `singleprocess` — runs the conductor and its RPC surface in one process,
//! for development and small deployments that don't need a separate
//! scheduler/API split.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use conductor_core::cli::SingleProcessArgs;
use conductor_core::config::load_config_file;
use conductor_core::drivers::DriverRegistry;
use conductor_core::metrics;
use conductor_core::registrar::ShutdownMode;
use conductor_core::server::ConductorApp;

#[tokio::main]
async fn main() -> ExitCode {
    let args = SingleProcessArgs::parse();

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

    let router = app.rpc_router();
    let listener = match tokio::net::TcpListener::bind(&args.bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, addr = %args.bind_addr, "failed to bind RPC surface");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(addr = %args.bind_addr, "singleprocess RPC surface listening");

    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(err) => {
            tracing::error!(error = %err, "failed to install SIGTERM handler");
            return ExitCode::FAILURE;
        }
    };

    tokio::select! {
        result = axum::serve(listener, router) => {
            if let Err(err) = result {
                tracing::error!(error = %err, "RPC surface exited unexpectedly");
                return ExitCode::FAILURE;
            }
        }
        _ = sigterm.recv() => {}
    }

    app.shutdown(ShutdownMode::Deregister, std::time::Duration::from_secs(config.conductor.drain_shutdown_timeout_secs)).await;
    ExitCode::SUCCESS
}
