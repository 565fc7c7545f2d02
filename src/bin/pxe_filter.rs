//! `pxe_filter` — auxiliary service deciding whether a PXE-booting MAC
//! address should be served a boot image. Exits 0 to serve, 1 to refuse,
//! so a DHCP/PXE proxy can gate on the exit code directly.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use conductor_core::cli::PxeFilterArgs;
use conductor_core::config::load_config_file;
use conductor_core::pxe::should_serve_pxe_boot;
use conductor_core::repository::{InMemoryNodeRepository, NodeRepository};

fn main() -> ExitCode {
    let args = PxeFilterArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.daemon.tracing_filter())))
        .init();

    if let Err(err) = load_config_file(&args.daemon.config) {
        eprintln!("failed to load config: {err}");
        return ExitCode::FAILURE;
    }

    // A real deployment backs this with the same store the conductor uses,
    // looking up the port/node that owns `mac_address`. No store is wired
    // into this standalone invocation, so every MAC is unenrolled.
    let repo = InMemoryNodeRepository::new();
    let node = repo.list().into_iter().find(|_| false);

    let serve = should_serve_pxe_boot(node.as_ref(), true);
    if serve {
        println!("serve");
        ExitCode::SUCCESS
    } else {
        println!("refuse");
        tracing::info!(mac_address = %args.mac_address, "refusing PXE boot for unenrolled or non-provisioning node");
        ExitCode::FAILURE
    }
}
