use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "da-driver", about = "Runs one process of the reliable-communication stack")]
pub struct Cli {
    /// This process's id, per the hosts file.
    #[arg(long)]
    pub id: u16,

    /// Hosts file: one line per process, `id ip_or_hostname port`.
    #[arg(long)]
    pub hosts: PathBuf,

    /// Append-only output log path (the protocol-graded event log).
    #[arg(long)]
    pub output: PathBuf,

    /// Which protocol to run: pl, fifo, or lattice.
    #[arg(long, default_value = "fifo")]
    pub mode: String,

    /// Overrides RUST_LOG for this process's diagnostics verbosity.
    #[arg(long = "log-level")]
    pub log_level: Option<String>,

    /// Mode-specific config file (required by all three modes).
    pub config_path: Option<PathBuf>,
}
