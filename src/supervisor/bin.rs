//! Flowbridge launcher
//!
//! Parent-shell binary that allocates a loopback port, launches the bridge
//! daemon, waits for it to become healthy, keeps it alive within the
//! restart budget and shuts it down when the launcher terminates.
//!
//! # Usage
//!
//! ```bash
//! flowbridge-launcher --bridge-exe ./flowbridge --root ./project
//! flowbridge-launcher --bridge-exe ./flowbridge --root ./project --port 9070 --exact-port
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use flowbridge::supervisor::{ports, ProcessSupervisor, SupervisorConfig};
use flowbridge::BridgeError;

/// Flowbridge process launcher
#[derive(Parser, Debug)]
#[command(name = "flowbridge-launcher")]
#[command(about = "Launches and supervises the flowbridge daemon")]
#[command(version)]
struct Args {
    /// Path to the flowbridge executable
    #[arg(long)]
    bridge_exe: PathBuf,

    /// Project root handed to the bridge
    #[arg(long)]
    root: PathBuf,

    /// Preferred listen port
    #[arg(long, default_value_t = ports::MIN_PORT)]
    port: u16,

    /// Require exactly --port instead of probing the range
    #[arg(long)]
    exact_port: bool,

    /// Optional bridge config file (forwarded only if it exists)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for the bridge log file
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Maximum automatic restarts after a crash
    #[arg(long, default_value_t = 3)]
    max_restarts: u32,

    /// Seconds to wait for the bridge to become healthy
    #[arg(long, default_value_t = 15)]
    health_timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowbridge=info".into()),
        )
        .init();

    let args = Args::parse();

    let port = if args.exact_port {
        // Explicit override still has to pass the bind test
        if !ports::is_free(args.port) {
            anyhow::bail!(BridgeError::NoAvailablePort {
                min: args.port,
                max: args.port,
            });
        }
        args.port
    } else {
        ports::allocate(args.port)?
    };
    tracing::info!("allocated port {}", port);

    let log_dir = args
        .log_dir
        .unwrap_or_else(flowbridge::paths::default_log_dir);
    let mut cfg = SupervisorConfig::new(args.bridge_exe, args.root, log_dir, port);
    cfg.config_path = args.config;
    cfg.max_restarts = args.max_restarts;

    let supervisor = ProcessSupervisor::new(cfg);
    supervisor.start().await?;

    match supervisor
        .wait_for_healthy(Duration::from_secs(args.health_timeout))
        .await
    {
        Ok(()) => tracing::info!("bridge is healthy on port {}", port),
        Err(e) => {
            tracing::error!("bridge never became healthy: {}", e);
            supervisor.shutdown().await?;
            anyhow::bail!(e);
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down bridge");
    supervisor.shutdown().await?;
    Ok(())
}
