//! Connection pool configuration and connection reuse accounting.
//!
//! Each worker owns its own client, so the pool configured here is the
//! worker's private set of connections to the target. Reuse is inferred
//! from the dial timer in [`crate::timing`], which only fires when a new
//! connection is established.

use std::time::Duration;

use crate::template::RequestTemplate;

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Maximum idle connections to keep per host
    pub max_idle_per_host: usize,

    /// How long idle connections stay in the pool before cleanup
    pub idle_timeout: Duration,

    /// TCP keepalive duration
    pub tcp_keepalive: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            // One exchange in flight per worker.
            max_idle_per_host: 2,
            idle_timeout: Duration::from_secs(90),
            tcp_keepalive: Some(Duration::from_secs(60)),
        }
    }
}

impl PoolConfig {
    /// Pool settings for a template: disabled keep-alive means no idle
    /// connections are kept, so every exchange dials a fresh one.
    pub fn for_template(template: &RequestTemplate) -> Self {
        if template.disable_keep_alive {
            Self::default()
                .with_max_idle_per_host(0)
                .with_tcp_keepalive(None)
        } else {
            Self::default()
        }
    }

    /// Set maximum idle connections per host.
    pub fn with_max_idle_per_host(mut self, max: usize) -> Self {
        self.max_idle_per_host = max;
        self
    }

    /// Set TCP keepalive duration.
    pub fn with_tcp_keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.tcp_keepalive = keepalive;
        self
    }

    /// Apply this configuration to a reqwest ClientBuilder.
    pub fn apply_to_builder(&self, builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        let mut builder = builder
            .pool_max_idle_per_host(self.max_idle_per_host)
            .pool_idle_timeout(self.idle_timeout);

        if let Some(keepalive) = self.tcp_keepalive {
            builder = builder.tcp_keepalive(keepalive);
        }

        builder
    }
}

/// Connection statistics for a set of completed exchanges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Exchanges that reached the target
    pub total_requests: u64,

    /// Exchanges that had to establish a new connection
    pub new_connections: u64,

    /// Exchanges that reused a pooled connection
    pub reused_connections: u64,
}

impl ConnectionStats {
    /// Account for one exchange.
    pub fn record(&mut self, new_connection: bool) {
        self.total_requests += 1;
        if new_connection {
            self.new_connections += 1;
        } else {
            self.reused_connections += 1;
        }
    }

    /// Calculate the connection reuse rate.
    pub fn reuse_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        (self.reused_connections as f64 / self.total_requests as f64) * 100.0
    }

    /// Calculate the new connection rate.
    pub fn new_connection_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        (self.new_connections as f64 / self.total_requests as f64) * 100.0
    }

    /// Format statistics as a human-readable string.
    pub fn format(&self) -> String {
        format!(
            "Total: {}, Reused: {} ({:.1}%), New: {} ({:.1}%)",
            self.total_requests,
            self.reused_connections,
            self.reuse_rate(),
            self.new_connections,
            self.new_connection_rate()
        )
    }
}
