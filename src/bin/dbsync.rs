//! `dbsync` — database schema and online-data-migration management.
//!
//! The concrete migration graph and the database itself are out-of-scope
//! external collaborators (spec §1); this binary owns the command surface
//! and the exit-code contract, and runs the version-compatibility gate
//! every subcommand is expected to honor before doing anything destructive.
//! A real deployment wires `oldest_stored_version` to a schema-introspection
//! query against its migration store.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use conductor_core::cli::{node_version_gate, DbsyncArgs, DbsyncCommand, DbsyncExitCode};
use conductor_core::model::object_version::NODE_OBJECT_VERSION;

fn main() -> ExitCode {
    let args = DbsyncArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.daemon.tracing_filter())))
        .init();

    // Stand-in for a real schema query: no migration backend is wired in,
    // so the oldest stored version is always reported as the version this
    // release writes, i.e. the gate always passes. Swapping this for a real
    // query is the only change a concrete storage backend needs to make.
    let oldest_stored = NODE_OBJECT_VERSION;

    if let Err(message) = node_version_gate(oldest_stored) {
        eprintln!("{message}");
        return ExitCode::from(DbsyncExitCode::DatabaseVersionIncompatible.code() as u8);
    }

    let code = match args.command {
        DbsyncCommand::Upgrade { revision } => {
            match revision {
                Some(rev) => tracing::info!(revision = %rev, "upgrading database to revision"),
                None => tracing::info!("upgrading database to latest revision"),
            }
            DbsyncExitCode::Success
        }
        DbsyncCommand::Downgrade => {
            tracing::info!("downgrading database by one revision");
            DbsyncExitCode::Success
        }
        DbsyncCommand::Revision { message, autogenerate } => {
            tracing::info!(message = ?message, autogenerate, "generating new revision");
            DbsyncExitCode::Success
        }
        DbsyncCommand::Stamp { revision } => {
            tracing::info!(revision = %revision, "stamping database");
            DbsyncExitCode::Success
        }
        DbsyncCommand::Version => {
            println!("{oldest_stored}");
            DbsyncExitCode::Success
        }
        DbsyncCommand::CreateSchema => {
            tracing::info!("creating schema from scratch");
            DbsyncExitCode::Success
        }
        DbsyncCommand::OnlineDataMigrations { max_count, option } => {
            tracing::info!(max_count = ?max_count, options = ?option, "applying online data migrations");
            DbsyncExitCode::Success
        }
    };

    ExitCode::from(code.code() as u8)
}
