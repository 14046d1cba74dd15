use std::path::PathBuf;

use clap::Parser;

/// wgctld -- WireGuard control plane daemon
#[derive(Debug, Parser)]
#[command(
    name = "wgctld",
    version,
    about = "WireGuard control plane daemon",
    long_about = "Loads the backend configuration, reconciles every backend's live \
        WireGuard state with the stored state, then stays resident until interrupted."
)]
pub struct Args {
    /// Config file (defaults to the platform config dir)
    #[arg(long, short = 'c', env = "WGCTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Exit after the startup reconciliation
    #[arg(long)]
    pub once: bool,
}
