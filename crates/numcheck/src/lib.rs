//! Batch verification of phone numbers against the check-number service.
//!
//! A run has two phases: the input file is drained into memory by
//! [`RecordSource`], then [`Scheduler`] issues one verification per candidate
//! at a fixed pace and appends each success to the output CSV.

pub mod client;
pub mod config;
pub mod pipeline;
pub mod source;

pub use client::{
    Classification, NumberChecker, TwoChatClient, VerificationResult, VerifyError,
    DEFAULT_API_BASE_URL,
};
pub use config::{RunConfig, StartupError, DEFAULT_DELAY};
pub use numcheck_sinks::{CsvAppendSink, OutputRecord, SinkError, OUTPUT_HEADER};
pub use pipeline::{FatalStop, PipelineError, RunSummary, Scheduler, DEFAULT_DRAIN_TIMEOUT};
pub use source::{Candidate, RecordSource, SourceError};

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Exit status for a run stopped by a fatal verification error.
pub const EXIT_FATAL: u8 = 3;
/// Exit status for startup failures and anything else unexpected.
pub const EXIT_FAILURE: u8 = 1;

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("Failed to open output file: {0}")]
    Output(#[from] SinkError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl RunError {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Pipeline(PipelineError::Fatal(_)) => EXIT_FATAL,
            _ => EXIT_FAILURE,
        }
    }
}

/// Validate `config`, then verify every number in its input file.
pub async fn run(config: &RunConfig) -> Result<RunSummary, RunError> {
    config.validate()?;
    let client = config.build_client()?;
    run_with_checker(config, client).await
}

/// Same as [`run`] with a caller-supplied checker. Preconditions on the
/// credential and base URL are the checker's business.
pub async fn run_with_checker<C: NumberChecker>(
    config: &RunConfig,
    checker: C,
) -> Result<RunSummary, RunError> {
    let candidates = RecordSource::open(&config.input_path, config.delimiter)?.drain();
    info!("CSV file successfully processed. Will check numbers now");

    let sink = Arc::new(CsvAppendSink::open(&config.output_path)?);
    let summary = Scheduler::new(Arc::new(checker), sink, config.delay)
        .run(candidates)
        .await?;
    Ok(summary)
}
