//! Validation for request templates and load profiles.
//!
//! Everything here runs before a run starts; a failure means no worker is
//! spawned and no connection is opened.

use reqwest::{Method, Url};
use thiserror::Error;

use crate::run_config::{LoadMode, RunConfig};
use crate::template::RequestTemplate;

/// Validation error with context about which field failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Field '{field}': {message}")]
    FieldError { field: String, message: String },

    #[error("Field '{field}' is required but not provided")]
    RequiredField { field: String },

    #[error("Field '{field}': value {value} is out of range ({min} to {max})")]
    OutOfRange {
        field: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Field '{field}': invalid format - {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}': invalid enum value '{value}'. Expected one of: {expected}")]
    InvalidEnum {
        field: String,
        value: String,
        expected: String,
    },
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ConfigError>;

/// Validator for target and proxy URLs.
pub struct UrlValidator;

impl UrlValidator {
    /// Parse a URL string and check it is usable as a target.
    pub fn parse(url: &str, field: &str) -> ValidationResult<Url> {
        if url.trim().is_empty() {
            return Err(ConfigError::RequiredField {
                field: field.to_string(),
            });
        }

        let parsed = Url::parse(url.trim()).map_err(|e| ConfigError::InvalidFormat {
            field: field.to_string(),
            message: format!("'{}' is not a valid URL: {}", url, e),
        })?;
        Self::validate(&parsed, field)?;
        Ok(parsed)
    }

    pub fn validate(url: &Url, field: &str) -> ValidationResult<()> {
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidFormat {
                field: field.to_string(),
                message: format!("URL must use http:// or https://, got: {}", url),
            });
        }

        if url.host_str().map_or(true, str::is_empty) {
            return Err(ConfigError::InvalidFormat {
                field: field.to_string(),
                message: format!("URL has no host: {}", url),
            });
        }

        Ok(())
    }
}

/// Validator for numeric ranges.
pub struct RangeValidator;

impl RangeValidator {
    pub fn validate_u64(value: u64, min: u64, max: u64, field: &str) -> ValidationResult<()> {
        if value < min || value > max {
            return Err(ConfigError::OutOfRange {
                field: field.to_string(),
                value: value.to_string(),
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        Ok(())
    }

    pub fn validate_positive_u64(value: u64, field: &str) -> ValidationResult<()> {
        if value == 0 {
            return Err(ConfigError::OutOfRange {
                field: field.to_string(),
                value: "0".to_string(),
                min: "1".to_string(),
                max: "unlimited".to_string(),
            });
        }
        Ok(())
    }

    pub fn validate_non_negative_f64(value: f64, field: &str) -> ValidationResult<()> {
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigError::OutOfRange {
                field: field.to_string(),
                value: value.to_string(),
                min: "0.0".to_string(),
                max: "unlimited".to_string(),
            });
        }
        Ok(())
    }
}

/// Validator for HTTP methods.
///
/// Any syntactically valid method token is accepted, not just the common
/// verbs, so targets exposing custom methods can be exercised.
pub struct HttpMethodValidator;

impl HttpMethodValidator {
    pub fn parse(method: &str) -> ValidationResult<Method> {
        let upper = method.trim().to_uppercase();
        if upper.is_empty() {
            return Err(ConfigError::RequiredField {
                field: "method".to_string(),
            });
        }
        Method::from_bytes(upper.as_bytes()).map_err(|_| ConfigError::InvalidFormat {
            field: "method".to_string(),
            message: format!("'{}' is not a valid HTTP method", method),
        })
    }
}

/// Check that a template describes a request that can be sent.
pub fn validate_template(template: &RequestTemplate) -> ValidationResult<()> {
    UrlValidator::validate(&template.url, "url")?;

    if let Some(ref proxy) = template.proxy {
        UrlValidator::validate(proxy, "proxy")?;
    }

    Ok(())
}

/// Check that a load profile is internally consistent.
pub fn validate_run_config(config: &RunConfig) -> ValidationResult<()> {
    if config.concurrency == 0 {
        return Err(ConfigError::OutOfRange {
            field: "concurrency".to_string(),
            value: "0".to_string(),
            min: "1".to_string(),
            max: "unlimited".to_string(),
        });
    }

    match config.load {
        LoadMode::Count(total) => {
            RangeValidator::validate_positive_u64(total, "requests")?;
            if total < config.concurrency as u64 {
                return Err(ConfigError::FieldError {
                    field: "concurrency".to_string(),
                    message: format!(
                        "number of workers ({}) cannot be larger than the number of requests ({})",
                        config.concurrency, total
                    ),
                });
            }
        }
        LoadMode::Duration(duration) => {
            if duration.is_zero() {
                return Err(ConfigError::OutOfRange {
                    field: "duration".to_string(),
                    value: "0s".to_string(),
                    min: "1ms".to_string(),
                    max: "unlimited".to_string(),
                });
            }
        }
    }

    RangeValidator::validate_non_negative_f64(config.qps, "qps")
}
