use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::time::Duration;
use tracing_subscriber::EnvFilter;

use keeper_lite::config::{KeeperNodeConfig, ManagerConfig, WatchdogConfig};
use keeper_lite::node::KeeperNode;
use keeper_lite::scenario::{self, ScenarioOptions};
use keeper_lite::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "keeper-lite")]
#[command(version)]
#[command(about = "A membership lifecycle keeper over a simulated job registry")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start a keeper node with all cadence loops
    Server(ServerArgs),

    /// Run a one-shot lifecycle scenario and print a JSON report
    Scenario(ScenarioArgs),
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Port for the web dashboard (optional)
    #[arg(long)]
    dashboard_port: Option<u16>,

    /// Maximum entities per automation job
    #[arg(long, default_value = "100")]
    job_capacity: usize,

    /// Live entities processed per batch invocation
    #[arg(long, default_value = "10")]
    batch_size: usize,

    /// Seconds between full passes over a job's range
    #[arg(long, default_value = "60")]
    batch_interval_secs: u64,

    /// Milliseconds between batch-pass polls
    #[arg(long, default_value = "500")]
    worker_poll_ms: u64,

    /// Seconds between funding scans
    #[arg(long, default_value = "5")]
    watchdog_poll_secs: u64,

    /// Demo gauges registered at startup (both gauge managers)
    #[arg(long, default_value = "25")]
    seed_gauges: usize,

    /// Demo tokens registered at startup (price manager)
    #[arg(long, default_value = "10")]
    seed_tokens: usize,

    /// Funding drained from every job per watchdog tick, to exercise
    /// the top-up path in demo runs
    #[arg(long, default_value = "0")]
    drain_per_tick: u128,
}

// =============================================================================
// Scenario Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ScenarioArgs {
    /// Entities to register
    #[arg(long, default_value = "101")]
    entities: usize,

    /// Entities to deregister after the batch cycles
    #[arg(long, default_value = "21")]
    deregister: usize,

    /// Maximum entities per automation job
    #[arg(long, default_value = "100")]
    job_capacity: usize,

    /// Live entities processed per batch invocation
    #[arg(long, default_value = "5")]
    batch_size: usize,

    /// Cumulative removals before a job is cancelled
    #[arg(long, default_value = "21")]
    cancel_buffer: u32,

    /// Full passes to drive before the deregistration wave
    #[arg(long, default_value = "2")]
    cycles: usize,

    /// Write the report to a file instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let dashboard_addr: Option<SocketAddr> = match args.dashboard_port {
        Some(p) => Some(format!("0.0.0.0:{}", p).parse()?),
        None => None,
    };

    let config = KeeperNodeConfig {
        manager: ManagerConfig::default()
            .with_job_capacity(args.job_capacity)
            .with_batch_size(args.batch_size)
            .with_batch_interval(Duration::from_secs(args.batch_interval_secs)),
        watchdog: WatchdogConfig::default(),
        worker_poll: Duration::from_millis(args.worker_poll_ms),
        watchdog_poll: Duration::from_secs(args.watchdog_poll_secs),
        drain_per_tick: args.drain_per_tick,
        dashboard_addr,
        ..Default::default()
    };

    tracing::info!(
        job_capacity = config.manager.job_capacity,
        batch_size = config.manager.batch_size,
        dashboard_addr = ?dashboard_addr,
        "Starting keeper-lite node"
    );

    let node = KeeperNode::new(config).await?;
    node.seed(args.seed_gauges, args.seed_tokens).await?;

    let shutdown = install_shutdown_handler();
    node.run(shutdown).await?;

    Ok(())
}

async fn run_scenario(args: ScenarioArgs) -> Result<(), Box<dyn std::error::Error>> {
    let opts = ScenarioOptions {
        entities: args.entities,
        deregister: args.deregister,
        job_capacity: args.job_capacity,
        batch_size: args.batch_size,
        cancel_buffer: args.cancel_buffer,
        cycles: args.cycles,
    };

    let report = scenario::run(opts).await?;
    let json = serde_json::to_string_pretty(&report)?;

    match args.out {
        Some(path) => tokio::fs::write(&path, json).await?,
        None => println!("{}", json),
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await?,
        Commands::Scenario(scenario_args) => run_scenario(scenario_args).await?,
    }

    Ok(())
}
