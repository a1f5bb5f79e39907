//! baghouse CLI (bagctl)
//!
//! Command-line tool for inspecting and reading ROS bags on local disk or
//! behind any HTTP server that supports byte ranges.
//!
//! ## Quick Start
//!
//! ```bash
//! # Summary: time range, topics, message counts, problems
//! bagctl info ./run.bag
//! bagctl info https://example.com/logs/run.bag
//!
//! # Messages on /odom between two receive times (inclusive)
//! bagctl read ./run.bag --topic /odom --start 1700000010 --end 1700000012.5
//!
//! # Replay in 1s windows and print Prometheus metrics
//! bagctl metrics https://example.com/logs/run.bag --window-ms 1000
//!
//! # Generate a test bag
//! bagctl fixture ./fixture.bag --topics 3 --messages 1000 --compression bz2
//! ```
//!
//! ## Configuration
//!
//! - `~/.baghouse/config.toml`: output format, colors, cache/retry/provider settings
//! - `BAGHOUSE_CACHE_SIZE`: cache budget in bytes (overrides the file)
//! - `RUST_LOG`: log level (default: warn); logs go to stderr

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;
mod config;
mod format;

use config::{Config, OutputFormat};
use format::Formatter;

#[derive(Parser)]
#[command(name = "bagctl")]
#[command(about = "baghouse command-line tool for ROS bags", long_about = None)]
struct Cli {
    /// Output format (overrides the config file)
    #[arg(short, long, value_enum, global = true)]
    output: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show time range, topics, and problems of a bag
    Info {
        /// Bag path or http(s) URL
        location: String,
    },
    /// Print messages within a time range
    Read(commands::ReadArgs),
    /// Replay a bag in adjacent windows and print Prometheus metrics
    Metrics {
        /// Bag path or http(s) URL
        location: String,
        /// Topic to read; repeat for several (default: all topics)
        #[arg(short, long = "topic")]
        topics: Vec<String>,
        /// Window length in milliseconds
        #[arg(long, default_value = "1000")]
        window_ms: u64,
    },
    /// Write a synthetic bag
    Fixture(commands::FixtureArgs),
    /// Show the effective configuration
    Config,
}

fn init_logging() -> Result<()> {
    let log_level = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "warn".to_string())
        .parse()
        .unwrap_or(Level::WARN);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    baghouse_observability::init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let formatter = Formatter::new(
        cli.output.unwrap_or(config.output_format),
        config.colored && !cli.no_color,
    );

    match cli.command {
        Commands::Info { location } => {
            commands::info::handle_info(&location, &config, &formatter).await?
        }
        Commands::Read(args) => commands::read::handle_read(args, &config, &formatter).await?,
        Commands::Metrics {
            location,
            topics,
            window_ms,
        } => {
            commands::metrics::handle_metrics(
                &location,
                topics,
                Duration::from_millis(window_ms),
                &config,
                &formatter,
            )
            .await?
        }
        Commands::Fixture(args) => commands::fixture::handle_fixture(args, &formatter).await?,
        Commands::Config => {
            formatter.print_info(&format!("Config file: {}", Config::config_path().display()));
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
