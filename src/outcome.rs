//! The record produced for every attempted exchange.

use std::time::Duration;

use crate::errors::TransportError;

/// Breakdown of one exchange's latency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Phases {
    /// Name resolution, when a lookup ran.
    pub dns: Option<Duration>,

    /// Connection establishment including DNS and TLS. Present only when a
    /// new connection was opened for this exchange.
    pub dial: Option<Duration>,

    /// From sending the request to receiving response headers, less any
    /// connection setup.
    pub wait: Duration,

    /// Reading the response body.
    pub read: Duration,
}

/// Result of one attempted exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    /// Index of the worker that performed it.
    pub worker: usize,

    /// HTTP status; 0 when no response was received.
    pub status: u16,

    /// Total time from start to body fully read (or failure).
    pub latency: Duration,

    pub phases: Phases,

    /// Body bytes actually read.
    pub size: u64,

    /// Start time relative to the start of the run.
    pub offset: Duration,

    /// Set when the exchange did not complete.
    pub error: Option<TransportError>,
}

impl RequestOutcome {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Whether this exchange opened a new connection.
    pub fn new_connection(&self) -> bool {
        self.phases.dial.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCategory;

    #[test]
    fn test_outcome_flags() {
        let mut outcome = RequestOutcome {
            worker: 0,
            status: 200,
            latency: Duration::from_millis(5),
            phases: Phases {
                dial: Some(Duration::from_millis(1)),
                ..Phases::default()
            },
            size: 10,
            offset: Duration::ZERO,
            error: None,
        };
        assert!(outcome.is_success());
        assert!(outcome.new_connection());

        outcome.phases.dial = None;
        outcome.status = 0;
        outcome.error = Some(TransportError::new(ErrorCategory::ConnectError, "refused"));
        assert!(outcome.is_error());
        assert!(!outcome.new_connection());
    }
}
