use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, Request, Response};
use tracing::{debug, trace};

use crate::client::WorkerTransport;
use crate::collector::OutcomeSink;
use crate::context::{RunContext, StopReason};
use crate::errors::TransportError;
use crate::metrics::{
    status_code_label, CONCURRENT_REQUESTS, NEW_CONNECTIONS_TOTAL, REQUEST_DURATION_SECONDS,
    REQUEST_ERRORS_BY_CATEGORY, REQUEST_STATUS_CODES, REQUEST_TOTAL,
};
use crate::outcome::{Phases, RequestOutcome};
use crate::rate_limiter::RateLimiter;
use crate::template::RequestTemplate;
use crate::timing::PhaseProbe;

/// One load-generating task and everything it owns.
pub struct Worker {
    pub task_id: usize,
    pub transport: WorkerTransport,
    pub template: Arc<RequestTemplate>,
    /// Requests per second for this worker; 0 means unlimited.
    pub qps: f64,
    pub context: Arc<RunContext>,
    pub sink: OutcomeSink,
    /// Start of the run, for outcome offsets.
    pub run_start: Instant,
}

/// What a worker did before it exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: usize,
    /// Outcomes handed to the collector.
    pub completed: u64,
}

impl Worker {
    /// Runs until the run stops, the request count is exhausted, or the
    /// collector goes away.
    ///
    /// A worker never starts an exchange after stop has been requested, but
    /// an exchange already in flight always runs to completion.
    pub async fn run(self) -> WorkerReport {
        run_worker(self).await
    }
}

async fn run_worker(worker: Worker) -> WorkerReport {
    let Worker {
        task_id,
        transport,
        template,
        qps,
        context,
        sink,
        run_start,
    } = worker;

    let mut limiter = RateLimiter::new(qps);
    debug!(
        task_id = task_id,
        qps = qps,
        rate_limited = !limiter.is_unlimited(),
        "Worker starting"
    );

    let prepared = template.request_builder(&transport.client).build();
    let mut completed = 0u64;

    loop {
        if context.is_stopped() {
            break;
        }

        limiter.wait(context.stop_token()).await;
        if context.is_stopped() {
            break;
        }

        if !context.try_claim() {
            context.request_stop(StopReason::Exhausted);
            break;
        }
        if context.remaining() == Some(0) {
            // Last unit claimed: let idle workers go while this one finishes.
            context.request_stop(StopReason::Exhausted);
        }

        let offset = run_start.elapsed();
        let outcome = match next_request(&prepared, &template, &transport.client) {
            Ok(request) => {
                execute(&transport.client, &transport.probe, request, task_id, offset).await
            }
            Err(error) => failed_before_send(task_id, offset, &error),
        };

        if sink.record(outcome).await.is_err() {
            debug!(task_id = task_id, "Result collector closed, worker exiting");
            break;
        }
        completed += 1;
    }

    debug!(task_id = task_id, completed = completed, "Worker finished");

    WorkerReport {
        worker: task_id,
        completed,
    }
}

/// A fresh copy of the prepared request, rebuilt from the template only if
/// the prepared one could not be built or cloned.
fn next_request(
    prepared: &Result<Request, reqwest::Error>,
    template: &RequestTemplate,
    client: &Client,
) -> Result<Request, reqwest::Error> {
    match prepared.as_ref().ok().and_then(Request::try_clone) {
        Some(request) => Ok(request),
        None => template.request_builder(client).build(),
    }
}

fn failed_before_send(task_id: usize, offset: Duration, error: &reqwest::Error) -> RequestOutcome {
    let error = TransportError::from_reqwest(error);
    REQUEST_TOTAL.inc();
    REQUEST_STATUS_CODES
        .with_label_values(&[status_code_label(0)])
        .inc();
    REQUEST_ERRORS_BY_CATEGORY
        .with_label_values(&[error.category.label()])
        .inc();

    RequestOutcome {
        worker: task_id,
        status: 0,
        latency: Duration::ZERO,
        phases: Phases::default(),
        size: 0,
        offset,
        error: Some(error),
    }
}

/// Performs one exchange and measures it.
///
/// Never fails: transport problems are returned as an outcome carrying a
/// [`TransportError`].
pub async fn execute(
    client: &Client,
    probe: &PhaseProbe,
    request: Request,
    task_id: usize,
    offset: Duration,
) -> RequestOutcome {
    CONCURRENT_REQUESTS.inc();
    REQUEST_TOTAL.inc();

    probe.reset();
    let started = Instant::now();
    let result = client.execute(request).await;
    let headers_received = started.elapsed();

    let (status, size, read, error) = match result {
        Ok(response) => {
            let status = response.status().as_u16();
            let read_started = Instant::now();
            let (size, body_error) = drain_body(response).await;
            (status, size, read_started.elapsed(), body_error)
        }
        Err(e) => (0, 0, Duration::ZERO, Some(TransportError::from_reqwest(&e))),
    };

    let latency = started.elapsed();
    let reading = probe.take();
    let phases = Phases {
        dns: reading.dns,
        dial: reading.dial,
        wait: headers_received.saturating_sub(reading.dial.unwrap_or_default()),
        read,
    };

    REQUEST_DURATION_SECONDS.observe(latency.as_secs_f64());
    CONCURRENT_REQUESTS.dec();
    if phases.dial.is_some() {
        NEW_CONNECTIONS_TOTAL.inc();
    }

    match error {
        None => {
            REQUEST_STATUS_CODES
                .with_label_values(&[status_code_label(status)])
                .inc();
            trace!(
                task_id = task_id,
                status_code = status,
                latency_ms = latency.as_millis() as u64,
                size = size,
                "Request completed"
            );
        }
        Some(ref e) => {
            REQUEST_STATUS_CODES
                .with_label_values(&[status_code_label(0)])
                .inc();
            REQUEST_ERRORS_BY_CATEGORY
                .with_label_values(&[e.category.label()])
                .inc();
            debug!(
                task_id = task_id,
                status_code = status,
                error = %e.message,
                error_category = %e.category.label(),
                "Request failed"
            );
        }
    }

    RequestOutcome {
        worker: task_id,
        status,
        latency,
        phases,
        size,
        offset,
        error,
    }
}

/// Reads the body to the end in chunks, counting bytes without buffering it.
async fn drain_body(mut response: Response) -> (u64, Option<TransportError>) {
    let mut size = 0u64;
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => size += chunk.len() as u64,
            Ok(None) => return (size, None),
            Err(e) => return (size, Some(TransportError::from_reqwest(&e))),
        }
    }
}
