//! Orchestration of a single load run.
//!
//! The [`RunController`] validates the request template and load profile,
//! builds one transport per worker, spawns the workers and the result
//! collector, and drives shutdown. Nothing here is process-global; every
//! run owns its own [`RunContext`].

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::client::{build_client, WorkerTransport};
use crate::collector::{Collected, CollectorMode, ResultCollector};
use crate::config_validation::{validate_run_config, validate_template};
use crate::connection_pool::ConnectionStats;
use crate::context::{RunContext, RunHandle, RunState, StopReason};
use crate::errors::RunError;
use crate::percentiles::PercentileStats;
use crate::report::{summarize, RunStatistics};
use crate::run_config::{OutputMode, RunConfig};
use crate::template::RequestTemplate;
use crate::worker::{Worker, WorkerReport};

/// What a finished run produced.
#[derive(Debug)]
pub enum RunReport {
    /// Full statistics over every buffered outcome.
    Summary(RunStatistics),

    /// Rows were streamed to the output; only totals remain.
    Streamed {
        records: u64,
        errors: u64,
        latency: Option<PercentileStats>,
        connections: ConnectionStats,
    },
}

/// Result of [`RunController::run`].
#[derive(Debug)]
pub struct RunOutput {
    pub report: RunReport,
    /// One entry per worker, in worker order.
    pub per_worker: Vec<WorkerReport>,
    pub stop_reason: Option<StopReason>,
    pub wall_time: Duration,
}

impl RunOutput {
    /// Outcomes recorded across all workers.
    pub fn completed(&self) -> u64 {
        self.per_worker.iter().map(|w| w.completed).sum()
    }
}

pub struct RunController {
    template: Arc<RequestTemplate>,
    config: RunConfig,
    context: Arc<RunContext>,
    output: Box<dyn Write + Send>,
}

impl fmt::Debug for RunController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunController")
            .field("template", &self.template)
            .field("config", &self.config)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl RunController {
    /// Validate the template and load profile and prepare a run.
    pub fn new(template: RequestTemplate, config: RunConfig) -> Result<Self, RunError> {
        validate_template(&template)?;
        validate_run_config(&config)?;

        let context = Arc::new(RunContext::new(config.total_requests()));
        context.set_state(RunState::Initialized);

        Ok(Self {
            template: Arc::new(template),
            config,
            context,
            output: Box::new(io::stdout()),
        })
    }

    /// Destination for CSV rows. Defaults to stdout; ignored in summary mode.
    pub fn with_output(mut self, output: Box<dyn Write + Send>) -> Self {
        self.output = output;
        self
    }

    /// A handle that can stop the run from another task.
    pub fn handle(&self) -> RunHandle {
        RunHandle::new(self.context.clone())
    }

    pub fn stop(&self) {
        self.handle().stop();
    }

    pub fn state(&self) -> RunState {
        self.context.state()
    }

    /// Execute the run to completion.
    ///
    /// Per-request failures never fail the run; only a worker that cannot
    /// be set up, a broken output, or a crashed collector does.
    pub async fn run(self) -> Result<RunOutput, RunError> {
        let RunController {
            template,
            config,
            context,
            output,
        } = self;

        let transports = (0..config.concurrency)
            .map(|worker| {
                build_client(&template).map_err(|source| RunError::WorkerPool { worker, source })
            })
            .collect::<Result<Vec<WorkerTransport>, RunError>>()?;

        let mode = match config.output {
            OutputMode::Summary => CollectorMode::Summary {
                expected: config.total_requests(),
            },
            OutputMode::Csv => CollectorMode::Csv(output),
        };
        let (collector, sink) =
            ResultCollector::spawn(mode, config.result_buffer_capacity(), context.clone());

        info!(
            url = %template.url,
            method = %template.method,
            concurrency = config.concurrency,
            qps = config.qps,
            requests = ?config.total_requests(),
            duration = ?config.run_duration(),
            output = %config.output,
            "Starting load run"
        );

        let run_start = Instant::now();
        context.mark_running();

        let mut workers = JoinSet::new();
        for (task_id, transport) in transports.into_iter().enumerate() {
            let worker = Worker {
                task_id,
                transport,
                template: template.clone(),
                qps: config.qps,
                context: context.clone(),
                sink: sink.clone(),
                run_start,
            };
            workers.spawn(worker.run());
        }
        // Workers hold the only remaining sinks, so the channel closes when
        // the last of them exits.
        drop(sink);

        let timer = config.run_duration().map(|duration| {
            let context = context.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {
                        context.request_stop(StopReason::DurationElapsed);
                    }
                    _ = context.stop_token().cancelled() => {}
                }
            })
        });

        let mut per_worker = Vec::with_capacity(config.concurrency);
        let mut join_failure = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(report) => per_worker.push(report),
                Err(e) => {
                    context.request_stop(StopReason::Interrupted);
                    join_failure.get_or_insert(e);
                }
            }
        }
        let wall_time = run_start.elapsed();
        if let Some(timer) = timer {
            timer.abort();
        }

        context.set_state(RunState::Draining);
        let collected = collector.finish().await;
        context.set_state(RunState::Completed);

        if let Some(e) = join_failure {
            return Err(RunError::Worker(e));
        }
        let collected = collected?;

        per_worker.sort_by_key(|w| w.worker);
        let stop_reason = context.stop_reason();

        let report = match collected {
            Collected::Outcomes(outcomes) => RunReport::Summary(summarize(&outcomes, wall_time)),
            Collected::Streamed {
                records,
                errors,
                latency,
                connections,
            } => {
                RunReport::Streamed {
                    records,
                    errors,
                    latency,
                    connections,
                }
            }
        };

        debug!(
            wall_time_ms = wall_time.as_millis() as u64,
            stop_reason = ?stop_reason,
            workers = per_worker.len(),
            "Load run finished"
        );

        Ok(RunOutput {
            report,
            per_worker,
            stop_reason,
            wall_time,
        })
    }
}
