//! # WDS Sorter Binary
//!
//! Real-time routing and execution engine for a wheel-diverter sorter.
//!
//! # Usage
//!
//! ```bash
//! # Run with the simulation driver
//! wds_sorter --config-dir config/ --simulate
//!
//! # Run with a specific driver
//! wds_sorter --config-dir config/ --driver simulation
//!
//! # Production: locked memory, FIFO scheduling, JSON logs (build with --features rt)
//! wds_sorter --config-dir /etc/wds/config --lock-memory --rt-priority 70 --json
//! ```

#![deny(warnings)]

use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use wds_common::config::{FullConfig, LogLevel, load_config_dir};
use wds_common::consts::DEFAULT_CONFIG_PATH;
use wds_common::driver::DiverterDriver;
use wds_common::topology::TopologyStore;
use wds_hal::DriverRegistry;
use wds_sorter::plan::InMemoryRoutePlanRepository;
use wds_sorter::rt::rt_setup;
use wds_sorter::upstream::LoopbackUpstream;
use wds_sorter::{SorterError, SortingService, TokioClock};

/// WDS Sorter - routing and execution engine for wheel-diverter sorting
#[derive(Parser, Debug)]
#[command(name = "wds_sorter")]
#[command(version)]
#[command(about = "Real-time routing and execution engine for wheel-diverter parcel sorting")]
#[command(long_about = None)]
struct Args {
    /// Config directory holding sorter.toml and topology.toml
    #[arg(long, value_name = "DIR", default_value = DEFAULT_CONFIG_PATH)]
    config_dir: PathBuf,

    /// Force the simulation driver (overrides [hal].driver and --driver)
    #[arg(short = 's', long)]
    simulate: bool,

    /// Driver to load instead of [hal].driver
    #[arg(short, long)]
    driver: Option<String>,

    /// Enable verbose logging (DEBUG level)
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,

    /// Lock all memory pages (requires the `rt` feature)
    #[arg(long)]
    lock_memory: bool,

    /// SCHED_FIFO priority for the runtime threads (requires the `rt` feature)
    #[arg(long, value_name = "PRIO", value_parser = clap::value_parser!(i32).range(1..=99))]
    rt_priority: Option<i32>,
}

fn main() {
    let args = Args::parse();

    let config = match load_config_dir(&args.config_dir) {
        Ok(config) => {
            setup_tracing(&args, config.sorter.shared.log_level);
            config
        }
        Err(e) => {
            setup_tracing(&args, LogLevel::default());
            error!("FATAL: {}", e);
            process::exit(1);
        }
    };

    info!(
        "WDS Sorter v{} starting ({})",
        env!("CARGO_PKG_VERSION"),
        config.sorter.shared.service_name
    );

    if let Err(e) = run(&args, config) {
        error!("FATAL: {}", e);
        process::exit(1);
    }

    info!("WDS Sorter shutdown complete");
}

fn run(args: &Args, config: FullConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Worker threads inherit the scheduling policy, so this precedes the runtime.
    rt_setup(args.lock_memory, args.rt_priority)?;
    if args.lock_memory || args.rt_priority.is_some() {
        info!(
            "RT setup complete (lock_memory={}, priority={:?})",
            args.lock_memory, args.rt_priority
        );
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("wds-sorter")
        .build()?;
    runtime.block_on(serve(args, config))?;
    Ok(())
}

async fn serve(args: &Args, config: FullConfig) -> Result<(), SorterError> {
    let driver_name = if args.simulate {
        info!("Simulation mode enabled");
        "simulation".to_string()
    } else if let Some(name) = &args.driver {
        info!("Driver from CLI: {}", name);
        name.clone()
    } else {
        config.sorter.hal.driver.clone()
    };

    let topology = Arc::new(TopologyStore::new(config.topology.clone())?);
    let driver = create_driver(&driver_name, &config, &topology)?;

    info!("Using loopback upstream client");
    let upstream = Arc::new(LoopbackUpstream::from_config(&config.sorter.upstream));

    let service = Arc::new(SortingService::new(
        config.sorter.engine.clone(),
        topology,
        Arc::clone(&driver),
        upstream,
        Arc::new(InMemoryRoutePlanRepository::new()),
        Arc::new(TokioClock::new()),
    ));

    let runner = tokio::spawn(Arc::clone(&service).run());

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Unable to listen for shutdown signal: {}", e),
    }

    service.shutdown().await;
    if let Err(e) = runner.await {
        error!("Sorting loop task failed: {}", e);
    }
    driver.shutdown()?;

    match serde_json::to_string(&service.stats()) {
        Ok(stats) => info!("Final counters: {}", stats),
        Err(e) => warn!("Final counters unavailable: {}", e),
    }
    Ok(())
}

/// Instantiate and initialize the named driver.
fn create_driver(
    name: &str,
    config: &FullConfig,
    topology: &TopologyStore,
) -> Result<Arc<dyn DiverterDriver>, SorterError> {
    let registry = DriverRegistry::with_builtin_drivers();
    let mut driver = registry.create_driver(name).inspect_err(|_| {
        error!("Available drivers: {:?}", registry.list_drivers());
    })?;

    driver.init(&topology.current(), config.sorter.hal.driver_config.get(name))?;
    info!("Driver '{}' v{} initialized", driver.name(), driver.version());
    Ok(Arc::from(driver))
}

/// Setup tracing subscriber from CLI arguments and `[shared].log_level`.
fn setup_tracing(args: &Args, log_level: LogLevel) {
    let level = if args.verbose {
        LogLevel::Debug
    } else {
        log_level
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
