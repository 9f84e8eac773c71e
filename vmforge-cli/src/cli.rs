//! Command-line argument parsing.

use clap::Parser;

/// vmforge - provision KVM instances on remote hypervisor hosts
#[derive(Parser, Debug)]
#[command(name = "vmforge")]
#[command(about = "vmforge - provision KVM instances on remote hypervisor hosts")]
#[command(version)]
pub struct Args {
    /// Path to configuration file (optional, defaults used if not found)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Path to the YAML provisioning request
    #[arg(short, long)]
    pub request: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Emit JSON logs instead of human-readable output
    #[arg(long)]
    pub json_logs: bool,

    /// Development mode: record commands instead of running them and use
    /// the in-memory hypervisor
    #[arg(long)]
    pub dev: bool,
}
