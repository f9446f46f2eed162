use std::sync::Arc;

use reqwest::redirect::Policy;
use reqwest::Proxy;
use tracing::{debug, warn};

use crate::connection_pool::PoolConfig;
use crate::template::{HttpVersion, RequestTemplate};
use crate::timing::{DialTimerLayer, PhaseProbe, TimingResolver};

/// A worker's private HTTP client and the probe its timing hooks feed.
#[derive(Debug, Clone)]
pub struct WorkerTransport {
    pub client: reqwest::Client,
    pub probe: Arc<PhaseProbe>,
}

/// Builds a reqwest HTTP client configured from the request template.
///
/// Every worker gets its own client, so connection reuse and phase timings
/// are never shared between workers.
pub fn build_client(template: &RequestTemplate) -> Result<WorkerTransport, reqwest::Error> {
    let probe = Arc::new(PhaseProbe::new());

    let mut client_builder = reqwest::Client::builder()
        .dns_resolver(Arc::new(TimingResolver::new(probe.clone())))
        .connector_layer(DialTimerLayer::new(probe.clone()));

    // Connection Pool Configuration
    client_builder = PoolConfig::for_template(template).apply_to_builder(client_builder);

    client_builder = match template.http_version {
        HttpVersion::Http1 => client_builder.http1_only(),
        HttpVersion::Http2 => client_builder.http2_prior_knowledge(),
    };

    if template.disable_compression {
        client_builder = client_builder.no_gzip();
    }

    if template.disable_redirects {
        client_builder = client_builder.redirect(Policy::none());
    }

    client_builder = match template.proxy {
        Some(ref proxy) => client_builder.proxy(Proxy::all(proxy.as_str())?),
        None => client_builder.no_proxy(),
    };

    if let Some(timeout) = template.timeout {
        client_builder = client_builder.timeout(timeout);
    }

    if template.skip_tls_verify {
        client_builder = client_builder.danger_accept_invalid_certs(true);
    }

    let client = client_builder.build()?;

    debug!(
        http_version = ?template.http_version,
        keep_alive = !template.disable_keep_alive,
        redirects = !template.disable_redirects,
        proxy = template.proxy.is_some(),
        "Worker client built"
    );

    Ok(WorkerTransport { client, probe })
}

/// Logs the transport settings that weaken the exchange, once per run.
pub fn warn_insecure_settings(template: &RequestTemplate) {
    if template.skip_tls_verify && template.url.scheme() == "https" {
        warn!("Skipping TLS certificate verification.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::{Method, Url};

    fn template() -> RequestTemplate {
        RequestTemplate::new(Method::GET, Url::parse("http://127.0.0.1:1/").unwrap())
    }

    #[test]
    fn test_builds_with_defaults() {
        let transport = build_client(&template()).unwrap();
        assert_eq!(transport.probe.take(), Default::default());
    }

    #[test]
    fn test_builds_with_every_toggle() {
        let t = template()
            .with_http_version(HttpVersion::Http2)
            .with_disable_compression(true)
            .with_disable_keep_alive(true)
            .with_disable_redirects(true)
            .with_skip_tls_verify(false)
            .with_proxy(Url::parse("http://127.0.0.1:3128").unwrap());
        assert!(build_client(&t).is_ok());
    }

    #[test]
    fn test_each_client_gets_its_own_probe() {
        let a = build_client(&template()).unwrap();
        let b = build_client(&template()).unwrap();
        assert!(!Arc::ptr_eq(&a.probe, &b.probe));
    }
}
