use anyhow::Result;
use clap::Parser;
use lameduck::{init_logging, HttpStatusProbe, LameduckConfig, LogOptions, Supervisor};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "lameduck")]
#[command(about = "Run a worker process and bound how long it may take to shut down")]
#[command(version)]
#[command(long_about = "Launches the given command as a child process, relays SIGTERM, SIGINT, \
SIGQUIT and SIGHUP to it, and waits for it to exit. If the worker is still running when the \
shutdown window elapses it is sent SIGKILL.\n\nUsage: lameduck [OPTIONS] -- <command> [args...]")]
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

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the worker")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Override supervisor.timeout_seconds
    #[arg(long, value_name = "SECONDS", help = "Seconds the worker gets to exit after a signal")]
    timeout: Option<u64>,

    /// Override supervisor.status_url
    #[arg(long, value_name = "URL", help = "Worker status endpoint used for progress reports")]
    status_url: Option<String>,

    /// Disable SIGKILL escalation
    #[arg(long, help = "Keep waiting instead of sending SIGKILL when the window elapses")]
    no_force_kill: bool,

    /// Worker command and arguments
    #[arg(last = true, value_name = "COMMAND")]
    command: Vec<String>,
}

impl Args {
    fn log_options(&self) -> LogOptions {
        LogOptions {
            debug: self.debug,
            verbose: self.verbose,
            quiet: self.quiet,
            format: self.log_format.clone(),
        }
    }

    fn apply_overrides(&self, config: &mut LameduckConfig) {
        if let Some(timeout) = self.timeout {
            config.supervisor.timeout_seconds = timeout;
        }
        if let Some(url) = &self.status_url {
            config.supervisor.status_url = Some(url.clone());
        }
        if self.no_force_kill {
            config.supervisor.force_kill = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args.log_options(), "lameduck")?;

    info!("Starting lameduck supervisor v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = match LameduckConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    args.apply_overrides(&mut config);

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    if args.command.is_empty() {
        eprintln!("✗ No worker command given");
        eprintln!("Usage: lameduck [OPTIONS] -- <command> [args...]");
        std::process::exit(2);
    }

    let mut supervisor = match Supervisor::start(&args.command, config.supervisor.clone()) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            error!("Failed to start worker: {}", e);
            eprintln!("✗ {}", e);
            std::process::exit(1);
        }
    };

    if let Some(url) = &config.supervisor.status_url {
        supervisor = supervisor.with_probe(HttpStatusProbe::new(url.clone())?);
        info!("Progress reports will query {}", url);
    }

    let outcome = supervisor.run().await;
    let exit_code = outcome.exit_code();

    info!(?outcome, "Supervisor exiting with code {}", exit_code);
    std::process::exit(exit_code);
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Lameduck Configuration File");
    println!("# This is the default configuration with all available options");
    println!("# Environment overrides: LAMEDUCK_<SECTION>__<KEY>, e.g. LAMEDUCK_SUPERVISOR__TIMEOUT_SECONDS=60");
    println!();
    print!("{}", LameduckConfig::default().to_toml()?);
    Ok(())
}
