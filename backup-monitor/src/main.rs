//! Backup Monitor - Main entry point
//!
//! Waits for the machine to go idle, then runs the configured backup tool.

use anyhow::Result;
use backup_monitor::{
    api,
    config::Config,
    daemon::{restart, shutdown::ShutdownCoordinator},
    utils::{self, logger::LogOutput},
    Monitor, MonitorContext,
};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_default_config {
        print!("{}", Config::default().to_toml()?);
        return Ok(());
    }

    // Load configuration
    let config_path = args.config.unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;
    std::fs::create_dir_all(config.logs_dir())?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(
        log_level,
        LogOutput::parse(&config.log.output),
        &config.app_log(),
    )?;

    tracing::info!(
        "Starting backup-monitor v{} (config: {})",
        env!("CARGO_PKG_VERSION"),
        config_path.display()
    );
    tracing::info!("App dir: {}", config.monitor.app_dir.display());

    let context = MonitorContext::from_config(&config)?;
    let (monitor, handle) = Monitor::new(context);
    let shutdown = handle.shutdown_token();

    // Forward OS signals to the scheduler
    let signals = tokio::spawn(ShutdownCoordinator::new(handle.clone()).run());

    let server_handle = if config.api.enabled {
        let addr = SocketAddr::from(([127, 0, 0, 1], config.api.port));
        let app = api::create_router(api::AppState::new(handle.clone(), config.paths()));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Listening on http://{}", addr);

        let server_shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await
        }))
    } else {
        None
    };

    let exit = monitor.run().await;
    shutdown.cancel();
    let _ = signals.await;

    if let Some(server_handle) = server_handle {
        match tokio::time::timeout(std::time::Duration::from_secs(5), server_handle).await {
            Ok(Ok(Ok(()))) => tracing::info!("Server shutdown complete"),
            Ok(Ok(Err(e))) => tracing::error!("Server error during shutdown: {}", e),
            Ok(Err(e)) => tracing::error!("Server task panicked: {}", e),
            Err(_) => tracing::warn!("Server shutdown timeout, forcing exit"),
        }
    }

    if exit.restart {
        restart::relaunch()?;
    }

    tracing::info!("backup-monitor stopped");
    Ok(())
}
