//! Load profile for a single run.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config_validation::ConfigError;

/// Default number of requests in count mode.
pub const DEFAULT_TOTAL_REQUESTS: u64 = 200;

/// Default number of workers.
pub const DEFAULT_CONCURRENCY: usize = 50;

/// Upper bound on buffered outcomes, both for the collector channel and for
/// the pre-sized summary buffer.
pub const MAX_RESULT_BUFFER: usize = 1_000_000;

/// How the run terminates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadMode {
    /// Exactly this many exchanges are started.
    Count(u64),

    /// Exchanges are started until the wall clock elapses.
    Duration(Duration),
}

/// How results are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Buffer every outcome and print a summary at the end.
    #[default]
    Summary,

    /// Stream one CSV row per outcome.
    Csv,
}

impl FromStr for OutputMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "summary" => Ok(OutputMode::Summary),
            "csv" => Ok(OutputMode::Csv),
            other => Err(ConfigError::InvalidEnum {
                field: "output".to_string(),
                value: other.to_string(),
                expected: "summary, csv".to_string(),
            }),
        }
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputMode::Summary => write!(f, "summary"),
            OutputMode::Csv => write!(f, "csv"),
        }
    }
}

/// Load profile: termination mode, concurrency, per-worker rate and output.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub load: LoadMode,
    pub concurrency: usize,
    /// Requests per second for each worker; 0 means unlimited.
    pub qps: f64,
    pub output: OutputMode,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            load: LoadMode::Count(DEFAULT_TOTAL_REQUESTS),
            concurrency: DEFAULT_CONCURRENCY,
            qps: 0.0,
            output: OutputMode::Summary,
        }
    }
}

impl RunConfig {
    /// A count-mode run of `total` requests over `concurrency` workers.
    pub fn count(total: u64, concurrency: usize) -> Self {
        Self {
            load: LoadMode::Count(total),
            concurrency,
            ..Self::default()
        }
    }

    /// A duration-mode run over `concurrency` workers.
    pub fn duration(duration: Duration, concurrency: usize) -> Self {
        Self {
            load: LoadMode::Duration(duration),
            concurrency,
            ..Self::default()
        }
    }

    pub fn with_qps(mut self, qps: f64) -> Self {
        self.qps = qps;
        self
    }

    pub fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    /// The request total in count mode.
    pub fn total_requests(&self) -> Option<u64> {
        match self.load {
            LoadMode::Count(n) => Some(n),
            LoadMode::Duration(_) => None,
        }
    }

    /// The wall-clock budget in duration mode.
    pub fn run_duration(&self) -> Option<Duration> {
        match self.load {
            LoadMode::Duration(d) => Some(d),
            LoadMode::Count(_) => None,
        }
    }

    /// Capacity of the channel between workers and the collector.
    pub fn result_buffer_capacity(&self) -> usize {
        self.concurrency
            .saturating_mul(1000)
            .clamp(1, MAX_RESULT_BUFFER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.total_requests(), Some(200));
        assert_eq!(config.concurrency, 50);
        assert_eq!(config.qps, 0.0);
        assert_eq!(config.output, OutputMode::Summary);
        assert_eq!(config.run_duration(), None);
    }

    #[test]
    fn test_duration_mode_has_no_total() {
        let config = RunConfig::duration(Duration::from_secs(2), 5);
        assert_eq!(config.total_requests(), None);
        assert_eq!(config.run_duration(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_buffer_capacity_is_capped() {
        assert_eq!(RunConfig::count(10, 2).result_buffer_capacity(), 2000);
        assert_eq!(
            RunConfig::count(10_000_000, 5000).result_buffer_capacity(),
            MAX_RESULT_BUFFER
        );
    }

    #[test]
    fn test_output_mode_parsing() {
        assert_eq!("csv".parse::<OutputMode>().unwrap(), OutputMode::Csv);
        assert_eq!("CSV".parse::<OutputMode>().unwrap(), OutputMode::Csv);
        assert_eq!("".parse::<OutputMode>().unwrap(), OutputMode::Summary);
        assert!("json".parse::<OutputMode>().is_err());
    }
}
