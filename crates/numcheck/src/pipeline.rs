//! Pipeline Scheduler: paced dispatch of verifications into the output sink.
//!
//! Requests are issued strictly in input order, one per `delay`. Each request
//! runs as its own task, so completions (and therefore output rows) land in
//! whatever order the service answers. A fatal classification from any task
//! reaches the dispatch loop over a channel, stops further dispatch, and the
//! sink is closed before the error is returned.

use crate::client::{Classification, NumberChecker, VerifyError};
use crate::source::Candidate;
use numcheck_sinks::{CsvAppendSink, SinkError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// The verification that stopped a run.
#[derive(Debug)]
pub struct FatalStop {
    pub candidate: Candidate,
    pub error: VerifyError,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Fatal error while verifying number=[{}]: {}", .0.candidate, .0.error)]
    Fatal(Box<FatalStop>),
    #[error("Failed to close output: {0}")]
    Sink(#[from] SinkError),
}

/// What a completed run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub candidates: usize,
    pub dispatched: usize,
    pub rows_written: u64,
}

/// How long a finished dispatch loop waits for verifications still in flight.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Scheduler<C> {
    checker: Arc<C>,
    sink: Arc<CsvAppendSink>,
    delay: Duration,
    drain_timeout: Duration,
}

impl<C: NumberChecker> Scheduler<C> {
    pub fn new(checker: Arc<C>, sink: Arc<CsvAppendSink>, delay: Duration) -> Self {
        Self {
            checker,
            sink,
            delay,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Verify every candidate, in order, one issuance per `delay`.
    ///
    /// Once every candidate has been issued, verifications still in flight
    /// get up to `drain_timeout` to finish; a fatal classification among
    /// them still fails the run. The sink is closed on every exit path.
    pub async fn run(self, candidates: Vec<Candidate>) -> Result<RunSummary, PipelineError> {
        let total = candidates.len();
        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel::<FatalStop>();
        let mut in_flight = JoinSet::new();
        let mut dispatched = 0usize;
        let mut fatal: Option<FatalStop> = None;

        for candidate in candidates {
            if let Ok(stop) = fatal_rx.try_recv() {
                fatal = Some(stop);
                break;
            }

            info!(
                number = %candidate,
                source = %self.checker.source_id(),
                "Trying to verify number=[{}] using source=[{}]",
                candidate,
                self.checker.source_id()
            );
            in_flight.spawn(verify_and_save(
                Arc::clone(&self.checker),
                Arc::clone(&self.sink),
                candidate,
                fatal_tx.clone(),
            ));
            dispatched += 1;

            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                Some(stop) = fatal_rx.recv() => {
                    fatal = Some(stop);
                    break;
                }
            }
            reap_finished(&mut in_flight);
        }

        drop(fatal_tx);
        if fatal.is_none() {
            fatal = match fatal_rx.try_recv() {
                Ok(stop) => Some(stop),
                Err(_) => self.drain(&mut in_flight, &mut fatal_rx).await,
            };
        }
        in_flight.abort_all();

        match fatal {
            Some(stop) => {
                error!(
                    number = %stop.candidate,
                    "Stopping after {} of {} candidates: {}",
                    dispatched,
                    total,
                    stop.error
                );
                if let Err(err) = self.sink.close() {
                    error!("Failed to close output after fatal error: {}", err);
                }
                Err(PipelineError::Fatal(Box::new(stop)))
            }
            None => {
                let rows_written = self.sink.close()?;
                info!(
                    "Finished: dispatched {} of {} candidates, wrote {} rows",
                    dispatched, total, rows_written
                );
                Ok(RunSummary {
                    candidates: total,
                    dispatched,
                    rows_written,
                })
            }
        }
    }

    /// Wait for in-flight verifications, watching for a fatal stop.
    async fn drain(
        &self,
        in_flight: &mut JoinSet<()>,
        fatal_rx: &mut mpsc::UnboundedReceiver<FatalStop>,
    ) -> Option<FatalStop> {
        let deadline = tokio::time::sleep(self.drain_timeout);
        tokio::pin!(deadline);

        while !in_flight.is_empty() {
            tokio::select! {
                Some(stop) = fatal_rx.recv() => return Some(stop),
                Some(joined) = in_flight.join_next() => log_joined(joined),
                _ = &mut deadline => {
                    warn!(
                        "Abandoning {} verifications still in flight after {:?}",
                        in_flight.len(),
                        self.drain_timeout
                    );
                    break;
                }
            }
        }
        // a task that sent its stop and then finished may not have been seen yet
        fatal_rx.try_recv().ok()
    }
}

async fn verify_and_save<C: NumberChecker>(
    checker: Arc<C>,
    sink: Arc<CsvAppendSink>,
    candidate: Candidate,
    fatal_tx: mpsc::UnboundedSender<FatalStop>,
) {
    let error = match checker.check(&candidate).await {
        Ok(result) => {
            match sink.write(&result.to_output_record()) {
                Ok(()) => {}
                Err(SinkError::Closed(_)) => {
                    debug!(number = %candidate, "Result arrived after output was closed");
                }
                Err(err) => {
                    error!(number = %candidate, "Failed to save result: {}", err);
                }
            }
            return;
        }
        Err(error) => error,
    };

    match error.classification() {
        // logged by the scheduler once it stops
        Classification::Fatal => {
            if let Err(unsent) = fatal_tx.send(FatalStop { candidate, error }) {
                debug!(number = %unsent.0.candidate, "Fatal result arrived after run ended");
            }
        }
        Classification::Transient => {
            warn!(number = %candidate, "{}", error);
            warn!("Checking number={} failed. Please retry later.", candidate);
        }
    }
}

fn reap_finished(in_flight: &mut JoinSet<()>) {
    while let Some(joined) = in_flight.try_join_next() {
        log_joined(joined);
    }
}

fn log_joined(joined: Result<(), JoinError>) {
    if let Err(err) = joined {
        if err.is_panic() {
            error!("Verification task panicked: {}", err);
        }
    }
}
