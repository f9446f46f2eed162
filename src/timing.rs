//! Per-connection phase timing hooks.
//!
//! reqwest does not expose connection-level tracing, so two hooks are
//! installed on every worker's client instead: a DNS resolver that times
//! lookups, and a connector layer that times connection establishment
//! (DNS, TCP and TLS together). Both write into the worker's
//! [`PhaseProbe`], which the worker reads after each exchange. A worker
//! has at most one exchange in flight, so whatever the probe holds belongs
//! to that exchange.

use std::error::Error as StdError;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use thiserror::Error;
use tower::{Layer, Service};
use tracing::trace;

const UNSET: u64 = u64::MAX;

/// Timings captured for the exchange currently in flight on one worker.
#[derive(Debug)]
pub struct PhaseProbe {
    dns_nanos: AtomicU64,
    dial_nanos: AtomicU64,
}

/// What the probe saw for one exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeReading {
    /// `None` when no lookup ran (reused connection or IP literal host).
    pub dns: Option<Duration>,
    /// `None` when an existing connection was reused.
    pub dial: Option<Duration>,
}

impl PhaseProbe {
    pub fn new() -> Self {
        Self {
            dns_nanos: AtomicU64::new(UNSET),
            dial_nanos: AtomicU64::new(UNSET),
        }
    }

    /// Forget anything recorded so far.
    pub fn reset(&self) {
        self.dns_nanos.store(UNSET, Ordering::Relaxed);
        self.dial_nanos.store(UNSET, Ordering::Relaxed);
    }

    pub fn record_dns(&self, elapsed: Duration) {
        self.dns_nanos.store(to_nanos(elapsed), Ordering::Relaxed);
    }

    pub fn record_dial(&self, elapsed: Duration) {
        self.dial_nanos.store(to_nanos(elapsed), Ordering::Relaxed);
    }

    /// Read and clear the recorded timings.
    pub fn take(&self) -> ProbeReading {
        ProbeReading {
            dns: from_nanos(self.dns_nanos.swap(UNSET, Ordering::Relaxed)),
            dial: from_nanos(self.dial_nanos.swap(UNSET, Ordering::Relaxed)),
        }
    }
}

impl Default for PhaseProbe {
    fn default() -> Self {
        Self::new()
    }
}

fn to_nanos(d: Duration) -> u64 {
    // u64::MAX marks unset.
    u64::try_from(d.as_nanos()).unwrap_or(UNSET - 1).min(UNSET - 1)
}

fn from_nanos(n: u64) -> Option<Duration> {
    if n == UNSET {
        None
    } else {
        Some(Duration::from_nanos(n))
    }
}

/// Name resolution failure raised by [`TimingResolver`].
#[derive(Debug, Error)]
pub enum DnsLookupError {
    #[error("dns error: failed to resolve '{host}': {source}")]
    Failed {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("dns error: no addresses found for '{host}'")]
    NoAddresses { host: String },
}

/// System resolver that records lookup time into a [`PhaseProbe`].
#[derive(Debug, Clone)]
pub struct TimingResolver {
    probe: Arc<PhaseProbe>,
}

impl TimingResolver {
    pub fn new(probe: Arc<PhaseProbe>) -> Self {
        Self { probe }
    }
}

impl Resolve for TimingResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let probe = Arc::clone(&self.probe);
        let host = name.as_str().to_string();

        Box::pin(async move {
            let started = Instant::now();
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
                .await
                .map_err(|source| DnsLookupError::Failed {
                    host: host.clone(),
                    source,
                })?
                .collect();
            let elapsed = started.elapsed();
            probe.record_dns(elapsed);

            trace!(
                host = %host,
                addresses = addrs.len(),
                elapsed_us = elapsed.as_micros() as u64,
                "Resolved host"
            );

            if addrs.is_empty() {
                return Err(DnsLookupError::NoAddresses { host }.into());
            }

            Ok::<Addrs, Box<dyn StdError + Send + Sync>>(Box::new(addrs.into_iter()))
        })
    }
}

/// Connector layer that times connection establishment.
#[derive(Debug, Clone)]
pub struct DialTimerLayer {
    probe: Arc<PhaseProbe>,
}

impl DialTimerLayer {
    pub fn new(probe: Arc<PhaseProbe>) -> Self {
        Self { probe }
    }
}

impl<S> Layer<S> for DialTimerLayer {
    type Service = DialTimer<S>;

    fn layer(&self, inner: S) -> Self::Service {
        DialTimer {
            inner,
            probe: Arc::clone(&self.probe),
        }
    }
}

/// Connector service wrapped by [`DialTimerLayer`].
#[derive(Debug, Clone)]
pub struct DialTimer<S> {
    inner: S,
    probe: Arc<PhaseProbe>,
}

impl<S, R> Service<R> for DialTimer<S>
where
    S: Service<R>,
    S::Future: Send + 'static,
    S::Response: 'static,
    S::Error: 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: R) -> Self::Future {
        let probe = Arc::clone(&self.probe);
        let started = Instant::now();
        let connecting = self.inner.call(request);

        Box::pin(async move {
            let result = connecting.await;
            if result.is_ok() {
                probe.record_dial(started.elapsed());
            }
            result
        })
    }
}
