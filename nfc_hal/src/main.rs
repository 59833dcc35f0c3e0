//! # NFC Reader Binary
//!
//! Runs the discovery poll loop against a reader driver and prints what
//! every cycle found.
//!
//! # Usage
//!
//! ```bash
//! # Simulated field described by config/field.toml
//! nfc_hal --config config/reader.toml
//!
//! # Another scenario, ten cycles, JSON reports
//! nfc_hal -c config/reader.toml --scenario other.toml --cycles 10 --json
//!
//! # Verbose logging
//! nfc_hal -c config/reader.toml -v
//! ```

use clap::Parser;
use nfc_hal::ReaderCore;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

/// NFC reader - polling, anticollision and activation over a pluggable front end
#[derive(Parser, Debug)]
#[command(name = "nfc_hal")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "NFC reader core with pluggable front-end drivers")]
#[command(long_about = None)]
struct Args {
    /// Path to the reader configuration file
    #[arg(short, long, default_value = "config/reader.toml")]
    config: PathBuf,

    /// Scenario file for the simulation driver (overrides driver.scenario)
    #[arg(long, value_name = "FILE")]
    scenario: Option<PathBuf>,

    /// Driver to load (overrides driver.name)
    #[arg(short, long)]
    driver: Option<String>,

    /// Stop after this many poll cycles
    #[arg(short = 'n', long)]
    cycles: Option<u64>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs and cycle reports in JSON format
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("Reader failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = ReaderCore::load_config(&args.config)?;
    if let Some(scenario) = args.scenario.clone() {
        config.driver.scenario = Some(scenario);
    }
    if let Some(driver) = args.driver.clone() {
        config.driver.name = driver;
    }

    setup_tracing(&args, config.shared.log_level.as_directive());

    if args.print_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    info!("NFC reader v{} starting...", env!("CARGO_PKG_VERSION"));

    let driver_name = config.driver.name.clone();
    let mut core = ReaderCore::new(config)?;

    // Setup signal handler.
    let running = core.running_flag();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        running.store(false, Ordering::SeqCst);
    })?;

    core.init(&driver_name)?;

    let json = args.json;
    let result = core.run(args.cycles, |report| {
        if json {
            match serde_json::to_string(report) {
                Ok(line) => println!("{line}"),
                Err(e) => error!("Cannot serialize cycle {}: {}", report.cycle, e),
            }
        } else {
            println!("#{:<6} {}", report.cycle, report.outcome);
            for entry in &report.tags {
                println!("        {} [{}] {}", entry.tech, entry.index, hex(&entry.tag.id));
            }
        }
    });
    if let Err(e) = &result {
        error!("Poll loop error: {}", e);
    }

    core.shutdown()?;
    let stats = core.stats();
    info!(
        "NFC reader shutdown complete ({} cycles, avg {}us, max {}us)",
        stats.cycles,
        stats.avg_cycle_time_us(),
        stats.max_cycle_time_us
    );
    result.map_err(Into::into)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

/// Setup tracing subscriber based on CLI arguments and the configured level.
fn setup_tracing(args: &Args, configured: &str) {
    let filter = EnvFilter::from_default_env();
    let filter = if args.verbose {
        filter.add_directive(Level::DEBUG.into())
    } else {
        match configured.parse() {
            Ok(directive) => filter.add_directive(directive),
            Err(_) => filter.add_directive(Level::INFO.into()),
        }
    };

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
