//! CLI argument parsing.

use std::path::PathBuf;

use clap::Parser;

/// Default configuration file.
pub const DEFAULT_CONFIG: &str = "warp.json5";

/// Command line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "zenoh-bridge-warp", version, about = "Zenoh bridge for WARP wallboxes")]
pub struct BridgeArgs {
    /// Path to configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,
}
