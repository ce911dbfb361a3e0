//! CLI argument definitions for the bridge binary

use clap::Parser;
use std::path::PathBuf;

/// Local bridge daemon for the pipeline editor UI
#[derive(Parser, Debug)]
#[command(name = "flowbridge")]
#[command(about = "Keeps a pipeline editor UI in sync with project files over a loopback WebSocket")]
#[command(version)]
pub struct Cli {
    /// Config file path (JSON/JSON5)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Project root to scan and watch
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Listen port (loopback only)
    #[arg(long)]
    pub port: Option<u16>,

    /// Log directory (informational; the supervisor owns stream redirection)
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}
