//! CLI entry point for the decode pool runner
//!
//! Parses command line arguments, runs one decode session per worker, and prints the
//! throughput summary.

use clap::Parser;
use decode_pool::{Config, Runner};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Parallel video decode throughput runner
#[derive(Parser, Debug)]
#[command(name = "decode-pool")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input file path
    #[arg(short, long)]
    input: PathBuf,

    /// Accelerator device id [default: 0]
    #[arg(short, long)]
    device: Option<i32>,

    /// Number of parallel runs [default: 4]
    #[arg(short = 't', long = "num-threads")]
    num_threads: Option<u32>,

    /// Optional configuration file (config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the run report as JSON
    #[arg(long, default_value = "false")]
    json: bool,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<Config, decode_pool::config::ConfigError> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env(),
    };
    if let Some(device) = args.device {
        config.device.base_device = device;
    }
    if let Some(workers) = args.num_threads {
        config.pool.workers = workers;
    }
    Ok(config)
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ERROR: failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        input = %args.input.display(),
        workers = config.pool.workers,
        base_device = config.device.base_device,
        "number of parallel runs: {}",
        config.pool.workers
    );

    let runner = match Runner::with_host_backend(config) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let report = match runner.run(&args.input) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("ERROR: failed to serialize report: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        for line in report.summary_lines() {
            println!("info: {}", line);
        }
    }

    ExitCode::SUCCESS
}
