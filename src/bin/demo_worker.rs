use anyhow::Result;
use clap::Parser;
use lameduck::http::{demo_routes, router, HttpServer};
use lameduck::{init_logging, LameduckConfig, LogOptions, ShutdownCoordinator};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const STEP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "lameduck-worker")]
#[command(about = "Demo HTTP worker wired to the shutdown coordinator")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "lameduck.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Override server.port
    #[arg(short, long, help = "Port to listen on")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(
        &LogOptions {
            debug: args.debug,
            verbose: args.verbose,
            quiet: args.quiet,
            format: args.log_format.clone(),
        },
        "lameduck_worker",
    )?;

    let mut config = LameduckConfig::load_from_file(&args.config)?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    if let Err(e) = config.shutdown.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    let coordinator = Arc::new(ShutdownCoordinator::new(config.shutdown.clone()));
    register_cleanup_steps(&coordinator)?;
    coordinator.install_signal_handlers()?;

    let server = HttpServer::new(config.server.clone(), Arc::clone(&coordinator));
    let listener = server.bind().await?;
    let app = router(Arc::clone(&coordinator), demo_routes());
    let serving = tokio::spawn(async move { server.serve(listener, app).await });

    info!(pid = std::process::id(), "Worker ready");

    let report = coordinator.run().await?;

    // Abandoned requests can keep the server task alive; don't wait on them
    match tokio::time::timeout(Duration::from_secs(1), serving).await {
        Ok(Ok(Err(e))) => warn!("HTTP server exited with error: {}", e),
        Ok(Err(e)) => warn!("HTTP server task failed: {}", e),
        Ok(Ok(Ok(()))) | Err(_) => {}
    }

    for step in report.failed_steps() {
        warn!(step = %step.name, "Cleanup step did not succeed: {:?}", step.outcome);
    }

    info!(
        reason = %report.reason,
        clean = report.is_clean(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Worker shut down"
    );

    Ok(())
}

/// Simulated resources released during cleanup
fn register_cleanup_steps(coordinator: &ShutdownCoordinator) -> Result<()> {
    coordinator.register_cleanup_with_timeout("flush-metrics", STEP_TIMEOUT, || async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        info!("Metrics flushed");
        anyhow::Ok(())
    })?;

    coordinator.register_cleanup_with_timeout("close-database-pool", STEP_TIMEOUT, || async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        info!("Database pool closed");
        anyhow::Ok(())
    })?;

    coordinator.register_cleanup_with_timeout("disconnect-cache", STEP_TIMEOUT, || async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        info!("Cache client disconnected");
        anyhow::Ok(())
    })?;

    Ok(())
}
