//! numcheck: verify whether phone numbers are registered on WhatsApp.
//!
//! Reads numbers from the first column of a CSV file, checks each one through
//! the check-number API at a fixed pace, and appends results to an output CSV.

use anyhow::{Context, Result};
use clap::Parser;
use numcheck::{RunConfig, RunSummary, DEFAULT_API_BASE_URL, EXIT_FAILURE};
use numcheck_logging::{init_logging, logs_dir, LogConfig};
use reqwest::Url;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};

/// Grace period for abandoned request tasks once a run has ended.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(
    name = "numcheck",
    version,
    about = "Verify whether phone numbers are registered on WhatsApp"
)]
struct Cli {
    /// Input file containing the list of numbers you want to verify
    #[arg(long = "input-file", visible_alias = "in")]
    input_file: PathBuf,

    /// Output file where the result of each number verification is appended
    #[arg(long = "output-file", visible_alias = "out")]
    output_file: PathBuf,

    /// The connected number used to run the verifications
    #[arg(long = "source-number", visible_alias = "number")]
    source_number: String,

    /// API key for the verification service
    #[arg(long, env = "API_KEY", hide_env_values = true, default_value = "")]
    api_key: String,

    /// Milliseconds to wait between consecutive requests
    #[arg(long, default_value_t = 5000)]
    delay_ms: u64,

    /// Base URL of the verification service
    #[arg(long, env = "NUMCHECK_API_BASE_URL", default_value = DEFAULT_API_BASE_URL)]
    api_base_url: Url,

    /// Input file delimiter
    #[arg(long, default_value_t = ',')]
    delimiter: char,

    /// Directory for the log file (default: ~/.numcheck/logs)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Log to stderr only
    #[arg(long)]
    no_log_file: bool,

    /// Enable debug logging on stderr
    #[arg(short = 'v', long)]
    verbose: bool,
}

impl Cli {
    fn run_config(&self) -> Result<RunConfig> {
        let config = RunConfig::new(
            &self.input_file,
            &self.output_file,
            &self.source_number,
            &self.api_key,
        )
        .with_delay(Duration::from_millis(self.delay_ms))
        .with_api_base_url(self.api_base_url.clone())
        .with_delimiter(self.delimiter)?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_dir = if cli.no_log_file {
        None
    } else {
        Some(cli.log_dir.clone().unwrap_or_else(logs_dir))
    };
    if let Err(err) = init_logging(LogConfig {
        app_name: "numcheck",
        verbose: cli.verbose,
        log_dir,
    }) {
        eprintln!("Warning: failed to initialize file logging: {:?}", err);
        if let Err(err) = init_logging(LogConfig {
            app_name: "numcheck",
            verbose: cli.verbose,
            log_dir: None,
        }) {
            eprintln!("Warning: failed to initialize logging: {:?}", err);
        }
    }

    let config = match cli.run_config() {
        Ok(config) => config,
        Err(err) => {
            error!("{:#}", err);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("{:#}", err);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    info!(?config, "Starting verification run");
    let outcome = runtime.block_on(numcheck::run(&config));
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);

    match outcome {
        Ok(summary) => {
            report(&summary);
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{}", err);
            ExitCode::from(err.exit_code())
        }
    }
}

fn report(summary: &RunSummary) {
    info!(
        candidates = summary.candidates,
        dispatched = summary.dispatched,
        rows_written = summary.rows_written,
        "Run complete"
    );
}
