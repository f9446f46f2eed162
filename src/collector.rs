//! Fan-in of outcomes from all workers.
//!
//! Workers hold an [`OutcomeSink`] and send every outcome into a bounded
//! channel. The [`ResultCollector`] on the other end either buffers them
//! for the final summary or writes each one out as a CSV row as it
//! arrives. The channel closes when the last sink is dropped, which is
//! what lets the collector finish.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::connection_pool::ConnectionStats;
use crate::context::{RunContext, StopReason};
use crate::errors::RunError;
use crate::outcome::RequestOutcome;
use crate::percentiles::{LatencyTracker, PercentileStats};
use crate::report::{CsvRow, CSV_HEADER};
use crate::run_config::MAX_RESULT_BUFFER;

/// What the collector does with outcomes.
pub enum CollectorMode {
    /// Buffer everything; `expected` pre-sizes the buffer when known.
    Summary { expected: Option<u64> },

    /// Write one CSV row per outcome to the given destination.
    Csv(Box<dyn Write + Send>),
}

impl fmt::Debug for CollectorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectorMode::Summary { expected } => f
                .debug_struct("Summary")
                .field("expected", expected)
                .finish(),
            CollectorMode::Csv(_) => f.write_str("Csv"),
        }
    }
}

/// The collector is gone; the worker should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Worker-side handle for submitting outcomes.
#[derive(Debug, Clone)]
pub struct OutcomeSink {
    tx: mpsc::Sender<RequestOutcome>,
}

impl OutcomeSink {
    /// Submit one outcome, waiting if the channel is full.
    pub async fn record(&self, outcome: RequestOutcome) -> Result<(), SinkClosed> {
        self.tx.send(outcome).await.map_err(|_| SinkClosed)
    }
}

#[cfg(test)]
impl OutcomeSink {
    /// A sink whose collector has already gone away.
    pub(crate) fn closed() -> Self {
        let (tx, _) = mpsc::channel(1);
        Self { tx }
    }
}

/// Everything the collector gathered.
#[derive(Debug)]
pub enum Collected {
    /// Every outcome, in arrival order.
    Outcomes(Vec<RequestOutcome>),

    /// Rows were written out; only running totals were kept.
    Streamed {
        records: u64,
        errors: u64,
        latency: Option<PercentileStats>,
        connections: ConnectionStats,
    },
}

/// Receiving end of the outcome channel, running on its own task.
#[derive(Debug)]
pub struct ResultCollector {
    task: JoinHandle<Result<Collected, RunError>>,
}

impl ResultCollector {
    /// Start collecting. Returns the collector and the first sink; clone the
    /// sink for every worker and drop the original once they are spawned.
    pub fn spawn(
        mode: CollectorMode,
        capacity: usize,
        context: Arc<RunContext>,
    ) -> (Self, OutcomeSink) {
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let task = match mode {
            CollectorMode::Summary { expected } => tokio::spawn(buffer_outcomes(rx, expected)),
            CollectorMode::Csv(writer) => {
                tokio::task::spawn_blocking(move || stream_outcomes(rx, writer, &context))
            }
        };

        (Self { task }, OutcomeSink { tx })
    }

    /// Wait for the channel to drain and return what was collected.
    pub async fn finish(self) -> Result<Collected, RunError> {
        self.task
            .await
            .map_err(|e| RunError::Collector(e.to_string()))?
    }
}

async fn buffer_outcomes(
    mut rx: mpsc::Receiver<RequestOutcome>,
    expected: Option<u64>,
) -> Result<Collected, RunError> {
    let capacity = expected
        .map(|n| usize::try_from(n).unwrap_or(MAX_RESULT_BUFFER).min(MAX_RESULT_BUFFER))
        .unwrap_or(0);
    let mut outcomes = Vec::with_capacity(capacity);

    while let Some(outcome) = rx.recv().await {
        outcomes.push(outcome);
    }

    debug!(outcomes = outcomes.len(), "Result collector drained");
    Ok(Collected::Outcomes(outcomes))
}

fn stream_outcomes(
    mut rx: mpsc::Receiver<RequestOutcome>,
    writer: Box<dyn Write + Send>,
    context: &RunContext,
) -> Result<Collected, RunError> {
    let mut latency = LatencyTracker::new().map_err(|e| RunError::Collector(e.to_string()))?;
    let mut connections = ConnectionStats::default();
    let mut records = 0u64;
    let mut errors = 0u64;

    let mut csv = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    let mut failure = csv.write_record(CSV_HEADER).err();
    if failure.is_some() {
        context.request_stop(StopReason::OutputFailed);
    }

    while let Some(outcome) = rx.blocking_recv() {
        records += 1;
        if outcome.is_error() {
            errors += 1;
        } else {
            latency.record(outcome.latency);
            connections.record(outcome.new_connection());
        }

        // After a write failure keep draining so workers are never blocked,
        // but stop writing.
        if failure.is_some() {
            continue;
        }
        if let Err(e) = csv.serialize(CsvRow::from(&outcome)) {
            error!(error = %e, "Failed to write CSV row, stopping run");
            context.request_stop(StopReason::OutputFailed);
            failure = Some(e);
        }
    }

    if failure.is_none() {
        if let Err(e) = csv.flush() {
            error!(error = %e, "Failed to flush CSV output");
            context.request_stop(StopReason::OutputFailed);
            failure = Some(e.into());
        }
    }

    if let Some(e) = failure {
        return Err(RunError::Output(e));
    }

    debug!(records = records, errors = errors, "Result collector drained");
    Ok(Collected::Streamed {
        records,
        errors,
        latency: latency.stats(),
        connections,
    })
}
