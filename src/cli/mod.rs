//! CLI surface for the conductor binaries.
//!
//! Each `src/bin/*.rs` entry point parses its own `clap`-derived `Parser`
//! from this module and calls straight into the library. Shaped after the
//! teacher's top-level `Cli`/`Commands` derive, split one struct per binary
//! instead of one `Commands` enum shared by a single process, since these
//! five are separate executables rather than subcommands of one CLI.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::model::object_version::{ObjectVersion, NODE_OBJECT_VERSION};

/// Shared daemon flags: every long-running binary reads a config file and
/// accepts the same verbosity switch.
#[derive(Parser, Debug, Clone)]
pub struct DaemonArgs {
    /// Path to the conductor TOML config file.
    #[arg(long, env = "CONDUCTOR_CONFIG", default_value = "conductor.toml")]
    pub config: PathBuf,

    /// Enable verbose logging output (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Override the conductor_group read from the config file.
    #[arg(long)]
    pub conductor_group: Option<String>,
}

impl DaemonArgs {
    pub fn tracing_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(about = "Run the bare-metal conductor daemon")]
#[command(version)]
pub struct ConductorArgs {
    #[command(flatten)]
    pub daemon: DaemonArgs,
}

#[derive(Parser, Debug)]
#[command(name = "singleprocess")]
#[command(about = "Run the conductor and its RPC surface in a single process, for development")]
#[command(version)]
pub struct SingleProcessArgs {
    #[command(flatten)]
    pub daemon: DaemonArgs,

    /// Bind address for the RPC surface.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub bind_addr: String,
}

#[derive(Parser, Debug)]
#[command(name = "status")]
#[command(about = "Check upgrade readiness before rolling out a new conductor release")]
#[command(version)]
pub struct StatusArgs {
    #[command(flatten)]
    pub daemon: DaemonArgs,
}

#[derive(Parser, Debug)]
#[command(name = "pxe_filter")]
#[command(about = "Decide whether a PXE-booting MAC address should be served a boot image")]
#[command(version)]
pub struct PxeFilterArgs {
    #[command(flatten)]
    pub daemon: DaemonArgs,

    /// MAC address presented by the booting machine.
    #[arg(required = true)]
    pub mac_address: String,
}

#[derive(Parser, Debug)]
#[command(name = "dbsync")]
#[command(about = "Database schema and online-data-migration management for the conductor store")]
#[command(version)]
pub struct DbsyncArgs {
    #[command(flatten)]
    pub daemon: DaemonArgs,

    #[command(subcommand)]
    pub command: DbsyncCommand,
}

#[derive(Subcommand, Debug)]
pub enum DbsyncCommand {
    /// Upgrade the database to the given revision, or to the latest.
    Upgrade {
        #[arg(long)]
        revision: Option<String>,
    },
    /// Downgrade the database by one revision.
    Downgrade,
    /// Generate a new migration revision.
    Revision {
        #[arg(short, long)]
        message: Option<String>,
        #[arg(long)]
        autogenerate: bool,
    },
    /// Stamp the database as being at a given revision, without running migrations.
    Stamp { revision: String },
    /// Print the current database schema revision.
    Version,
    /// Create the schema from scratch (fresh database only).
    CreateSchema,
    /// Apply online (non-blocking, rolling-safe) data migrations.
    OnlineDataMigrations {
        #[arg(long)]
        max_count: Option<u64>,
        #[arg(long = "option", value_name = "MIGRATION.KEY=VALUE")]
        option: Vec<String>,
    },
}

/// `dbsync`'s process exit code convention (spec'd, not `std::process::ExitCode`,
/// so command handlers stay plain functions callers can unit test).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbsyncExitCode {
    Success = 0,
    MoreWork = 1,
    DatabaseVersionIncompatible = 2,
    InvalidArguments = 127,
}

impl DbsyncExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// The compatibility gate `dbsync upgrade`/`dbsync status` enforce before
/// doing anything else: refuse to proceed if the oldest object version
/// present in the store predates what this release still understands.
pub fn check_version_gate(oldest_stored: ObjectVersion, minimum_supported: ObjectVersion) -> Result<(), String> {
    if oldest_stored < minimum_supported {
        return Err(format!(
            "stored object version {oldest_stored} is older than the minimum supported {minimum_supported}"
        ));
    }
    Ok(())
}

/// `status`'s readiness check: 0 clean, 1 warning (newer-minor objects present
/// but still compatible), 2 failure (incompatible major version present).
pub fn upgrade_readiness(oldest_stored: ObjectVersion, running: ObjectVersion) -> DbsyncExitCode {
    if !oldest_stored.is_compatible_with(&running) {
        DbsyncExitCode::DatabaseVersionIncompatible
    } else if oldest_stored < running {
        DbsyncExitCode::MoreWork
    } else {
        DbsyncExitCode::Success
    }
}

/// Convenience for binaries that only care about the node entity's version
/// history, since that's the only versioned entity this codebase persists
/// so far.
pub fn node_version_gate(oldest_stored: ObjectVersion) -> Result<(), String> {
    check_version_gate(oldest_stored, NODE_OBJECT_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_gate_rejects_older_than_minimum() {
        let result = check_version_gate(ObjectVersion::new(0, 9), ObjectVersion::new(1, 0));
        assert!(result.is_err());
    }

    #[test]
    fn test_version_gate_accepts_equal_or_newer() {
        assert!(check_version_gate(ObjectVersion::new(1, 0), ObjectVersion::new(1, 0)).is_ok());
        assert!(check_version_gate(ObjectVersion::new(1, 5), ObjectVersion::new(1, 0)).is_ok());
    }

    #[test]
    fn test_upgrade_readiness_clean() {
        assert_eq!(upgrade_readiness(ObjectVersion::new(1, 0), ObjectVersion::new(1, 0)), DbsyncExitCode::Success);
    }

    #[test]
    fn test_upgrade_readiness_more_work() {
        assert_eq!(upgrade_readiness(ObjectVersion::new(1, 0), ObjectVersion::new(1, 2)), DbsyncExitCode::MoreWork);
    }

    #[test]
    fn test_upgrade_readiness_incompatible() {
        assert_eq!(
            upgrade_readiness(ObjectVersion::new(1, 0), ObjectVersion::new(2, 0)),
            DbsyncExitCode::DatabaseVersionIncompatible
        );
    }

    #[test]
    fn test_dbsync_exit_codes_match_spec() {
        assert_eq!(DbsyncExitCode::Success.code(), 0);
        assert_eq!(DbsyncExitCode::MoreWork.code(), 1);
        assert_eq!(DbsyncExitCode::DatabaseVersionIncompatible.code(), 2);
        assert_eq!(DbsyncExitCode::InvalidArguments.code(), 127);
    }

    #[test]
    fn test_conductor_args_parse() {
        let args = ConductorArgs::parse_from(["conductor", "--config", "c.toml", "-vv"]);
        assert_eq!(args.daemon.config, PathBuf::from("c.toml"));
        assert_eq!(args.daemon.verbose, 2);
    }

    #[test]
    fn test_dbsync_upgrade_parses_revision() {
        let args = DbsyncArgs::parse_from(["dbsync", "upgrade", "--revision", "abc123"]);
        match args.command {
            DbsyncCommand::Upgrade { revision } => assert_eq!(revision.as_deref(), Some("abc123")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_dbsync_online_data_migrations_collects_options() {
        let args = DbsyncArgs::parse_from([
            "dbsync",
            "online-data-migrations",
            "--max-count",
            "10",
            "--option",
            "foo.bar=baz",
        ]);
        match args.command {
            DbsyncCommand::OnlineDataMigrations { max_count, option } => {
                assert_eq!(max_count, Some(10));
                assert_eq!(option, vec!["foo.bar=baz".to_string()]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_pxe_filter_requires_mac_address() {
        let result = PxeFilterArgs::try_parse_from(["pxe_filter"]);
        assert!(result.is_err());
    }
}
