use std::env;
use std::fs;
use std::str::FromStr;

use bytes::Bytes;
use reqwest::header::{HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use tokio::time::Duration;
use tracing::info;

use crate::config_validation::{
    ConfigError, HttpMethodValidator, RangeValidator, UrlValidator, ValidationResult,
};
use crate::run_config::{OutputMode, RunConfig, DEFAULT_CONCURRENCY, DEFAULT_TOTAL_REQUESTS};
use crate::template::{HttpVersion, RequestTemplate, DEFAULT_REQUEST_TIMEOUT};
use crate::utils::{
    parse_basic_auth, parse_duration_string, parse_header_line, parse_headers_with_escapes,
    parse_timeout,
};

/// Content type sent when none is configured.
pub const DEFAULT_CONTENT_TYPE: &str = "text/html";

/// Main configuration for the load run, as read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub target_url: String,
    pub request_method: String,
    pub num_requests: u64,
    pub num_concurrent_tasks: usize,
    pub qps: f64,
    /// Set when `TEST_DURATION` is given; selects duration mode.
    pub test_duration: Option<Duration>,
    pub output: OutputMode,
    pub custom_headers: Option<String>,
    pub request_timeout: Duration,
    pub accept_header: Option<String>,
    pub request_body: Option<Bytes>,
    pub content_type: String,
    pub user_agent: Option<String>,
    pub basic_auth: Option<String>,
    pub proxy_addr: Option<String>,
    pub http2: bool,
    pub host_header: Option<String>,
    pub disable_compression: bool,
    pub disable_keepalive: bool,
    pub disable_redirects: bool,
    pub skip_tls_verify: bool,
    /// Tokio worker threads; `None` uses one per core.
    pub worker_threads: Option<usize>,
    pub metrics_port: Option<u16>,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> ValidationResult<Self> {
        let target_url = env::var("TARGET_URL").map_err(|_| ConfigError::RequiredField {
            field: "TARGET_URL".to_string(),
        })?;

        let request_method = env_string("REQUEST_METHOD").unwrap_or_else(|| "GET".to_string());
        let num_requests = env_parse("NUM_REQUESTS", DEFAULT_TOTAL_REQUESTS)?;
        let num_concurrent_tasks = env_parse("NUM_CONCURRENT_TASKS", DEFAULT_CONCURRENCY)?;
        let qps = env_parse("QPS", 0.0)?;

        let test_duration = match env_string("TEST_DURATION") {
            Some(s) => Some(parse_duration_string(&s).map_err(|e| {
                ConfigError::InvalidFormat {
                    field: "TEST_DURATION".to_string(),
                    message: e,
                }
            })?),
            None => None,
        };

        let output = match env_string("OUTPUT_FORMAT") {
            Some(s) => OutputMode::from_str(&s).map_err(|_| ConfigError::InvalidEnum {
                field: "OUTPUT_FORMAT".to_string(),
                value: s,
                expected: "summary, csv".to_string(),
            })?,
            None => OutputMode::Summary,
        };

        let request_timeout = match env_string("REQUEST_TIMEOUT") {
            Some(s) => parse_timeout(&s).map_err(|e| ConfigError::InvalidFormat {
                field: "REQUEST_TIMEOUT".to_string(),
                message: e,
            })?,
            None => DEFAULT_REQUEST_TIMEOUT,
        };

        // A body file wins over an inline body.
        let request_body = match env_string("REQUEST_BODY_FILE") {
            Some(path) => Some(Bytes::from(fs::read(&path).map_err(|e| {
                ConfigError::FieldError {
                    field: "REQUEST_BODY_FILE".to_string(),
                    message: format!("cannot read '{}': {}", path, e),
                }
            })?)),
            None => env::var("REQUEST_BODY").ok().map(Bytes::from),
        };

        let worker_threads = match env_string("WORKER_THREADS") {
            Some(_) => {
                let threads: usize = env_parse("WORKER_THREADS", 0)?;
                RangeValidator::validate_positive_u64(threads as u64, "WORKER_THREADS")?;
                Some(threads)
            }
            None => None,
        };

        let metrics_port = match env_string("METRICS_PORT") {
            Some(_) => Some(env_parse::<u16>("METRICS_PORT", 0)?),
            None => None,
        };

        Ok(Config {
            target_url,
            request_method,
            num_requests,
            num_concurrent_tasks,
            qps,
            test_duration,
            output,
            custom_headers: env_string("CUSTOM_HEADERS"),
            request_timeout,
            accept_header: env_string("ACCEPT_HEADER"),
            request_body,
            content_type: env_string("CONTENT_TYPE")
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            user_agent: env_string("USER_AGENT"),
            basic_auth: env_string("BASIC_AUTH"),
            proxy_addr: env_string("PROXY_ADDR"),
            http2: env_bool("HTTP2", false),
            host_header: env_string("HOST_HEADER"),
            disable_compression: env_bool("DISABLE_COMPRESSION", false),
            disable_keepalive: env_bool("DISABLE_KEEPALIVE", false),
            disable_redirects: env_bool("DISABLE_REDIRECTS", false),
            skip_tls_verify: env_bool("SKIP_TLS_VERIFY", true),
            worker_threads,
            metrics_port,
        })
    }

    /// Builds the request template every worker will repeat.
    ///
    /// `Content-Type` is always set; `CUSTOM_HEADERS` are applied over it,
    /// then `ACCEPT_HEADER` and `HOST_HEADER`. A `User-Agent` given as a
    /// custom header is used when `USER_AGENT` is not set.
    pub fn to_template(&self) -> ValidationResult<RequestTemplate> {
        let url = UrlValidator::parse(&self.target_url, "TARGET_URL")?;
        let method = HttpMethodValidator::parse(&self.request_method)?;

        let mut template = RequestTemplate::new(method, url)
            .with_header(CONTENT_TYPE, header_value("CONTENT_TYPE", &self.content_type)?);

        let mut header_user_agent = None;
        if let Some(ref raw) = self.custom_headers {
            for line in parse_headers_with_escapes(raw) {
                let (name, value) =
                    parse_header_line(&line).ok_or_else(|| ConfigError::InvalidFormat {
                        field: "CUSTOM_HEADERS".to_string(),
                        message: format!("'{}' is not a 'Name: value' header", line.trim()),
                    })?;
                let name = HeaderName::from_str(&name).map_err(|e| ConfigError::InvalidFormat {
                    field: "CUSTOM_HEADERS".to_string(),
                    message: format!("invalid header name '{}': {}", name, e),
                })?;
                if name == USER_AGENT {
                    header_user_agent = Some(value);
                    continue;
                }
                template = template.with_header(name, header_value("CUSTOM_HEADERS", &value)?);
            }
        }

        if let Some(ref accept) = self.accept_header {
            template = template.with_header(ACCEPT, header_value("ACCEPT_HEADER", accept)?);
        }

        if let Some(ref host) = self.host_header {
            template = template.with_host(header_value("HOST_HEADER", host)?);
        }

        let user_agent = self.user_agent.as_deref().or(header_user_agent.as_deref());
        template = template.with_user_agent(user_agent);

        if let Some(ref body) = self.request_body {
            template = template.with_body(body.clone());
        }

        if let Some(ref credentials) = self.basic_auth {
            let (username, password) =
                parse_basic_auth(credentials).ok_or_else(|| ConfigError::InvalidFormat {
                    field: "BASIC_AUTH".to_string(),
                    message: "expected 'username:password'".to_string(),
                })?;
            template = template.with_basic_auth(username, password);
        }

        if let Some(ref proxy) = self.proxy_addr {
            let proxy = if proxy.contains("://") {
                proxy.clone()
            } else {
                format!("http://{}", proxy)
            };
            template = template.with_proxy(UrlValidator::parse(&proxy, "PROXY_ADDR")?);
        }

        let http_version = if self.http2 {
            HttpVersion::Http2
        } else {
            HttpVersion::Http1
        };

        Ok(template
            .with_http_version(http_version)
            .with_timeout(self.request_timeout)
            .with_disable_compression(self.disable_compression)
            .with_disable_keep_alive(self.disable_keepalive)
            .with_disable_redirects(self.disable_redirects)
            .with_skip_tls_verify(self.skip_tls_verify))
    }

    /// Builds the load profile.
    pub fn to_run_config(&self) -> RunConfig {
        let config = match self.test_duration {
            Some(duration) => RunConfig::duration(duration, self.num_concurrent_tasks),
            None => RunConfig::count(self.num_requests, self.num_concurrent_tasks),
        };
        config.with_qps(self.qps).with_output(self.output)
    }

    /// Logs the configuration summary.
    pub fn log_summary(&self) {
        info!(
            target_url = %self.target_url,
            method = %self.request_method,
            concurrency = self.num_concurrent_tasks,
            requests = self.num_requests,
            duration = ?self.test_duration,
            qps = self.qps,
            output = %self.output,
            timeout = ?self.request_timeout,
            http2 = self.http2,
            keep_alive = !self.disable_keepalive,
            compression = !self.disable_compression,
            redirects = !self.disable_redirects,
            skip_tls_verify = self.skip_tls_verify,
            proxy = self.proxy_addr.as_deref().unwrap_or("none"),
            custom_headers = self.custom_headers.is_some(),
            "Load run configuration"
        );
    }
}

/// Prints helpful configuration documentation.
pub fn print_config_help() {
    eprintln!("Required environment variables:");
    eprintln!(
        "  TARGET_URL              - The URL to load (must start with http:// or https://)"
    );
    eprintln!();
    eprintln!("Load profile:");
    eprintln!("  NUM_REQUESTS            - Total requests to send (default: 200)");
    eprintln!(
        "  NUM_CONCURRENT_TASKS    - Number of concurrent workers (default: 50, must be > 0)"
    );
    eprintln!("                            Cannot exceed NUM_REQUESTS.");
    eprintln!("  QPS                     - Rate limit per worker, requests/second (default: 0 = none)");
    eprintln!("  TEST_DURATION           - Run for a duration instead: 500ms, 10s, 3m (NUM_REQUESTS is ignored)");
    eprintln!("  OUTPUT_FORMAT           - summary or csv (default: summary)");
    eprintln!();
    eprintln!("Request:");
    eprintln!("  REQUEST_METHOD          - HTTP method: GET, POST, PUT, DELETE, HEAD, OPTIONS (default: GET)");
    eprintln!("  CUSTOM_HEADERS          - Comma-separated 'Name: value' headers (use \\, for literal commas)");
    eprintln!("  REQUEST_TIMEOUT         - Per-request timeout, seconds or 5s/500ms (default: 20, 0 = none)");
    eprintln!("  ACCEPT_HEADER           - Accept header");
    eprintln!("  REQUEST_BODY            - Request body");
    eprintln!("  REQUEST_BODY_FILE       - Request body from file (overrides REQUEST_BODY)");
    eprintln!("  CONTENT_TYPE            - Content-Type header (default: text/html)");
    eprintln!("  USER_AGENT              - User-Agent, barrage/<version> is always appended");
    eprintln!("  BASIC_AUTH              - Basic authentication, username:password");
    eprintln!("  HOST_HEADER             - Override the Host header");
    eprintln!();
    eprintln!("Transport:");
    eprintln!("  PROXY_ADDR              - HTTP proxy address as host:port");
    eprintln!("  HTTP2                   - Force HTTP/2: true or false (default: false)");
    eprintln!("  DISABLE_COMPRESSION     - Disable compression (default: false)");
    eprintln!("  DISABLE_KEEPALIVE       - Open a new connection per request (default: false)");
    eprintln!("  DISABLE_REDIRECTS       - Do not follow redirects (default: false)");
    eprintln!("  SKIP_TLS_VERIFY         - Skip TLS certificate verification (default: true)");
    eprintln!();
    eprintln!("Runtime:");
    eprintln!("  WORKER_THREADS          - Runtime worker threads (default: number of cores)");
    eprintln!("  METRICS_PORT            - Serve Prometheus metrics on this port (default: off)");
    eprintln!("  METRIC_NAMESPACE        - Prometheus metric namespace (default: barrage)");
    eprintln!("  LOG_FORMAT              - Log output: text or json (default: text)");
    eprintln!("  RUST_LOG                - Log filter (default: warn)");
}

/// A non-empty, trimmed environment variable.
fn env_string(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_bool(name: &str, default: bool) -> bool {
    match env_string(name) {
        Some(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"),
        None => default,
    }
}

fn env_parse<T>(name: &str, default: T) -> ValidationResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(name) {
        Some(v) => v.parse().map_err(|e: T::Err| ConfigError::InvalidFormat {
            field: name.to_string(),
            message: format!("'{}': {}", v, e),
        }),
        None => Ok(default),
    }
}

fn header_value(field: &str, value: &str) -> ValidationResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| ConfigError::InvalidFormat {
        field: field.to_string(),
        message: format!("invalid header value '{}': {}", value, e),
    })
}
