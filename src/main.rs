//! Flowbridge daemon entry point
//!
//! Wires the services together — file index, connection registry, router,
//! capability handlers, transport server — and runs until a quit request
//! or Ctrl-C. Exit code 0 on clean shutdown, non-zero on startup failure.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;

use flowbridge::cli::Cli;
use flowbridge::config::Config;
use flowbridge::handlers::{FileHandler, ResourceHandler};
use flowbridge::index::FileIndexService;
use flowbridge::router::{Handler, Router};
use flowbridge::server::{ConnectionRegistry, TransportServer};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    config.apply_overrides(cli.root, cli.port, cli.log_level);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("flowbridge={}", config.log.level).into()),
        )
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("startup failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> flowbridge::Result<()> {
    tracing::info!("flowbridge {} starting", env!("CARGO_PKG_VERSION"));

    // File index: initial scan, then watch
    let index = FileIndexService::new(&config.file)?;
    index.start()?;
    tracing::info!(
        "project root {} ({} files indexed)",
        index.root().display(),
        index.file_count()
    );

    // Connection registry and capability handlers, wired by injection
    let registry = ConnectionRegistry::new();
    let file_handler = FileHandler::new(Arc::clone(&index), Arc::clone(&registry));
    file_handler.start_pushers();
    let resource_handler = ResourceHandler::new(
        index.root().to_path_buf(),
        config.file.exclude.clone(),
    );

    let mut router = Router::new();
    router.register(file_handler as Arc<dyn Handler>)?;
    router.register(resource_handler as Arc<dyn Handler>)?;
    let router = Arc::new(router);

    let (quit_tx, mut quit_rx) = mpsc::channel::<()>(1);
    let server = TransportServer::bind(
        &config.server.host,
        config.server.port,
        Arc::clone(&registry),
        router,
        quit_tx,
    )
    .await?;

    let serve = tokio::spawn(server.serve());

    tokio::select! {
        _ = quit_rx.recv() => tracing::info!("shutting down on quit request"),
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down on interrupt"),
    }

    serve.abort();
    index.stop();
    tracing::info!("flowbridge stopped");
    Ok(())
}
