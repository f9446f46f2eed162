//! The request template repeated by every worker.
//!
//! A [`RequestTemplate`] is built once by the configuration layer and shared
//! read-only (behind an `Arc`) by every worker for the whole run.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, HOST, USER_AGENT};
use reqwest::{Method, Url};
use std::time::Duration;

/// Token appended to every user agent sent by the tool.
pub const USER_AGENT_TOKEN: &str = concat!("barrage/", env!("CARGO_PKG_VERSION"));

/// Per-request timeout applied when the caller does not choose one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// HTTP protocol version policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpVersion {
    /// HTTP/1.1 only.
    #[default]
    Http1,

    /// HTTP/2 with prior knowledge, no fallback.
    Http2,
}

/// Basic authentication credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Immutable description of the HTTP exchange to repeat.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub basic_auth: Option<BasicAuth>,
    pub proxy: Option<Url>,
    pub http_version: HttpVersion,
    /// `None` disables the timeout.
    pub timeout: Option<Duration>,
    pub disable_compression: bool,
    pub disable_keep_alive: bool,
    pub disable_redirects: bool,
    pub skip_tls_verify: bool,
}

impl RequestTemplate {
    /// Create a template with the tool's defaults: tool user agent, 20s
    /// timeout, HTTP/1.1, keep-alive, compression and redirects enabled, and
    /// TLS verification skipped.
    pub fn new(method: Method, url: Url) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_TOKEN));

        Self {
            method,
            url,
            headers,
            body: Bytes::new(),
            basic_auth: None,
            proxy: None,
            http_version: HttpVersion::default(),
            timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            disable_compression: false,
            disable_keep_alive: false,
            disable_redirects: false,
            skip_tls_verify: true,
        }
    }

    /// Set a header, replacing any previous value for the same name.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add a header value without replacing earlier values for the name.
    pub fn append_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Override the `Host` header.
    pub fn with_host(self, host: HeaderValue) -> Self {
        self.with_header(HOST, host)
    }

    /// Set the user agent. The tool token is always appended, so `None`
    /// leaves just the token.
    pub fn with_user_agent(mut self, user_agent: Option<&str>) -> Self {
        let value = match user_agent.map(str::trim) {
            Some(ua) if !ua.is_empty() => format!("{} {}", ua, USER_AGENT_TOKEN),
            _ => USER_AGENT_TOKEN.to_string(),
        };
        match HeaderValue::from_str(&value) {
            Ok(header) => {
                self.headers.insert(USER_AGENT, header);
            }
            Err(_) => {
                self.headers
                    .insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_TOKEN));
            }
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some(BasicAuth {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_proxy(mut self, proxy: Url) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_http_version(mut self, version: HttpVersion) -> Self {
        self.http_version = version;
        self
    }

    /// Set the per-request timeout. A zero duration disables it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() { None } else { Some(timeout) };
        self
    }

    pub fn with_disable_compression(mut self, disable: bool) -> Self {
        self.disable_compression = disable;
        self
    }

    pub fn with_disable_keep_alive(mut self, disable: bool) -> Self {
        self.disable_keep_alive = disable;
        self
    }

    pub fn with_disable_redirects(mut self, disable: bool) -> Self {
        self.disable_redirects = disable;
        self
    }

    pub fn with_skip_tls_verify(mut self, skip: bool) -> Self {
        self.skip_tls_verify = skip;
        self
    }

    /// The user agent currently configured, if it is valid UTF-8.
    pub fn user_agent(&self) -> Option<&str> {
        self.headers.get(USER_AGENT).and_then(|v| v.to_str().ok())
    }

    /// Build a request for this template on the given client.
    pub fn request_builder(&self, client: &reqwest::Client) -> reqwest::RequestBuilder {
        let mut builder = client
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone());

        if !self.body.is_empty() {
            builder = builder.body(self.body.clone());
        }

        if let Some(ref auth) = self.basic_auth {
            builder = builder.basic_auth(&auth.username, Some(&auth.password));
        }

        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};

    fn template() -> RequestTemplate {
        RequestTemplate::new(Method::GET, Url::parse("http://localhost:8080/").unwrap())
    }

    #[test]
    fn test_defaults() {
        let t = template();
        assert_eq!(t.timeout, Some(DEFAULT_REQUEST_TIMEOUT));
        assert_eq!(t.http_version, HttpVersion::Http1);
        assert!(t.skip_tls_verify);
        assert!(!t.disable_keep_alive);
        assert_eq!(t.user_agent(), Some(USER_AGENT_TOKEN));
        assert!(t.body.is_empty());
    }

    #[test]
    fn test_user_agent_is_suffixed() {
        let t = template().with_user_agent(Some("curl/8.0"));
        assert_eq!(
            t.user_agent().unwrap(),
            format!("curl/8.0 {}", USER_AGENT_TOKEN)
        );

        let t = template().with_user_agent(Some("   "));
        assert_eq!(t.user_agent(), Some(USER_AGENT_TOKEN));
    }

    #[test]
    fn test_zero_timeout_disables() {
        let t = template().with_timeout(Duration::ZERO);
        assert_eq!(t.timeout, None);

        let t = template().with_timeout(Duration::from_secs(3));
        assert_eq!(t.timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_header_insert_replaces_and_append_keeps() {
        let t = template()
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/html"))
            .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .append_header(
                HeaderName::from_static("x-trace"),
                HeaderValue::from_static("a"),
            )
            .append_header(
                HeaderName::from_static("x-trace"),
                HeaderValue::from_static("b"),
            );

        assert_eq!(t.headers.get_all(CONTENT_TYPE).iter().count(), 1);
        assert_eq!(t.headers.get(CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(t.headers.get_all("x-trace").iter().count(), 2);
    }

    #[test]
    fn test_request_builder_applies_body_and_auth() {
        let client = reqwest::Client::new();
        let t = template()
            .with_body("payload")
            .with_basic_auth("user", "secret")
            .with_host(HeaderValue::from_static("example.com"));

        let request = t.request_builder(&client).build().unwrap();
        assert_eq!(request.method(), &Method::GET);
        assert_eq!(request.headers().get(HOST).unwrap(), "example.com");
        assert!(request.headers().contains_key(AUTHORIZATION));
        assert_eq!(
            request.body().and_then(|b| b.as_bytes()),
            Some(&b"payload"[..])
        );
        assert!(request.try_clone().is_some());
    }
}
