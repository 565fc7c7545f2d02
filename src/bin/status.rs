//! `status` — upgrade readiness checks run before rolling a new conductor
//! release. Exits 0 clean, 1 warning (compatible but stale data present),
//! 2 failure (incompatible data present).

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use conductor_core::cli::{upgrade_readiness, DbsyncExitCode, StatusArgs};
use conductor_core::config::load_config_file;
use conductor_core::model::object_version::NODE_OBJECT_VERSION;

fn main() -> ExitCode {
    let args = StatusArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.daemon.tracing_filter())))
        .init();

    if let Err(err) = load_config_file(&args.daemon.config) {
        eprintln!("failed to load config: {err}");
        return ExitCode::from(DbsyncExitCode::DatabaseVersionIncompatible.code() as u8);
    }

    // See `dbsync`: no migration backend is wired in, so the oldest stored
    // version always reports as current.
    let oldest_stored = NODE_OBJECT_VERSION;
    let code = upgrade_readiness(oldest_stored, NODE_OBJECT_VERSION);

    match code {
        DbsyncExitCode::Success => println!("upgrade readiness: ok"),
        DbsyncExitCode::MoreWork => println!("upgrade readiness: warning, stale object versions present"),
        DbsyncExitCode::DatabaseVersionIncompatible => eprintln!("upgrade readiness: failure, incompatible object versions present"),
        DbsyncExitCode::InvalidArguments => eprintln!("upgrade readiness: invalid arguments"),
    }

    ExitCode::from(code.code() as u8)
}
