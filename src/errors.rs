//! Error types and transport failure categorization.
//!
//! Two families of errors live here. [`RunError`] is what escapes the engine:
//! configuration problems, failure to build the worker pool, and output sink
//! failures. [`TransportError`] is what a single exchange produces when it
//! never completes; those are folded into the run statistics and never
//! interrupt the run.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::config_validation::ConfigError;
use crate::timing::DnsLookupError;

/// Categories of transport failures that can occur during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorCategory {
    /// Name resolution failed
    DnsError,

    /// TCP connection could not be established (refused, unreachable, reset)
    ConnectError,

    /// TLS handshake or certificate failure
    TlsError,

    /// The per-request timeout elapsed
    TimeoutError,

    /// The response body could not be read to completion
    BodyError,

    /// Redirect policy violated (e.g. too many redirects)
    RedirectError,

    /// Anything else
    OtherError,
}

impl ErrorCategory {
    /// Categorize a reqwest error.
    ///
    /// Timeouts are checked first since a timed-out connect also reports
    /// `is_connect()`. DNS and TLS failures surface as connect errors, so the
    /// source chain is inspected to tell them apart.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return ErrorCategory::TimeoutError;
        }
        if chain_contains_dns_failure(error) {
            return ErrorCategory::DnsError;
        }

        // Sources only: the top-level message embeds the URL.
        let chain = error
            .source()
            .map(error_chain_message)
            .unwrap_or_default()
            .to_lowercase();
        if chain.contains("certificate")
            || chain.contains("tls")
            || chain.contains("ssl")
            || chain.contains("handshake")
        {
            ErrorCategory::TlsError
        } else if error.is_connect() {
            ErrorCategory::ConnectError
        } else if error.is_body() || error.is_decode() {
            ErrorCategory::BodyError
        } else if error.is_redirect() {
            ErrorCategory::RedirectError
        } else if chain.contains("timed out") || chain.contains("timeout") {
            ErrorCategory::TimeoutError
        } else if chain.contains("connection") || chain.contains("connect") {
            ErrorCategory::ConnectError
        } else {
            ErrorCategory::OtherError
        }
    }

    /// Get the Prometheus label for this error category.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::DnsError => "dns_error",
            ErrorCategory::ConnectError => "connect_error",
            ErrorCategory::TlsError => "tls_error",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::BodyError => "body_error",
            ErrorCategory::RedirectError => "redirect_error",
            ErrorCategory::OtherError => "other_error",
        }
    }

    /// Get a human-readable description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCategory::DnsError => "DNS Resolution Errors",
            ErrorCategory::ConnectError => "Network/Connection Errors",
            ErrorCategory::TlsError => "TLS/SSL Errors",
            ErrorCategory::TimeoutError => "Request Timeout Errors",
            ErrorCategory::BodyError => "Response Body Read Errors",
            ErrorCategory::RedirectError => "Redirect Policy Errors",
            ErrorCategory::OtherError => "Other/Unknown Errors",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// A failed exchange, categorized for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    /// The error category
    pub category: ErrorCategory,

    /// Error message including the source chain
    pub message: String,
}

impl TransportError {
    /// Create a categorized error from a reqwest error.
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        Self {
            category: ErrorCategory::from_reqwest_error(error),
            message: error_chain_message(error),
        }
    }

    /// Create a custom categorized error.
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category.label(), self.message)
    }
}

/// Errors that abort a run (or prevent it from starting).
#[derive(Error, Debug)]
pub enum RunError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to start worker {worker}: {source}")]
    WorkerPool {
        worker: usize,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to write output: {0}")]
    Output(#[source] csv::Error),

    #[error("result collector stopped unexpectedly: {0}")]
    Collector(String),

    #[error("worker task failed: {0}")]
    Worker(#[source] tokio::task::JoinError),
}

/// Joins an error and all of its sources into a single line.
///
/// reqwest's top-level message is usually just "error sending request for
/// url (...)"; the useful part (connection refused, dns error, ...) lives in
/// the sources.
pub fn error_chain_message(error: &(dyn StdError + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_message = cause.to_string();
        if !message.contains(&cause_message) {
            message.push_str(": ");
            message.push_str(&cause_message);
        }
        source = cause.source();
    }
    message
}

fn chain_contains_dns_failure(error: &(dyn StdError + 'static)) -> bool {
    let mut current = error.source();
    while let Some(cause) = current {
        if cause.downcast_ref::<DnsLookupError>().is_some() {
            return true;
        }
        let text = cause.to_string().to_lowercase();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return true;
        }
        current = cause.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[derive(Debug)]
    struct Wrapper {
        inner: io::Error,
    }

    impl fmt::Display for Wrapper {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "error sending request")
        }
    }

    impl StdError for Wrapper {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.inner)
        }
    }

    #[test]
    fn test_error_category_labels() {
        assert_eq!(ErrorCategory::DnsError.label(), "dns_error");
        assert_eq!(ErrorCategory::ConnectError.label(), "connect_error");
        assert_eq!(ErrorCategory::TimeoutError.label(), "timeout_error");
        assert_eq!(ErrorCategory::TlsError.label(), "tls_error");
        assert_eq!(ErrorCategory::BodyError.label(), "body_error");
    }

    #[test]
    fn test_error_category_descriptions() {
        assert!(ErrorCategory::DnsError.description().contains("DNS"));
        assert!(ErrorCategory::TimeoutError
            .description()
            .contains("Timeout"));
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::new(ErrorCategory::ConnectError, "connection refused");
        let display = format!("{}", err);
        assert_eq!(display, "[connect_error] connection refused");
    }

    #[test]
    fn test_error_chain_message_includes_sources() {
        let err = Wrapper {
            inner: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
        };
        assert_eq!(
            error_chain_message(&err),
            "error sending request: connection refused"
        );
    }

    #[test]
    fn test_dns_failure_found_in_chain() {
        let err = Wrapper {
            inner: io::Error::new(io::ErrorKind::Other, "failed to lookup address information"),
        };
        assert!(chain_contains_dns_failure(&err));

        let err = Wrapper {
            inner: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
        };
        assert!(!chain_contains_dns_failure(&err));
    }

    #[tokio::test]
    async fn test_worker_failure_is_its_own_error() {
        let join_error = tokio::spawn(async { panic!("worker blew up") })
            .await
            .unwrap_err();
        assert!(join_error.is_panic());

        let err = RunError::Worker(join_error);
        assert!(err.to_string().starts_with("worker task failed"));
        assert!(!err.to_string().contains("collector"));
        assert!(err.source().is_some());
    }
}
