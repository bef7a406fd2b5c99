use super::GatewayError;
use crate::config::BackendConfig;
use bytes::Bytes;
use http::{HeaderMap, Method};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Headers that are connection-scoped and must not cross the proxy hop.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Shared HTTP client for all backends. One upstream request is issued per
/// inbound request; nothing here retries.
pub struct UpstreamClient {
    http_client: Client,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        // No whole-request timeout on the client itself: event-stream
        // responses are long-lived. The deadline is applied while awaiting
        // connection + response headers in `send`.
        let http_client = Client::builder()
            .connect_timeout(timeout)
            .pool_max_idle_per_host(20)
            .build()?;

        Ok(Self {
            http_client,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Issue the single upstream request for a proxied exchange and await its
    /// response headers.
    pub async fn send(
        &self,
        backend: &BackendConfig,
        method: Method,
        url: String,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response, GatewayError> {
        debug!(backend = %backend.id, url = %url, "forwarding request to upstream");

        let mut request = self.http_client.request(method, &url).headers(headers);
        if !body.is_empty() {
            request = request.body(body);
        }

        match tokio::time::timeout(self.timeout, request.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(GatewayError::Upstream {
                backend: backend.id.name(),
                detail: e.to_string(),
            }),
            Err(_) => Err(GatewayError::Upstream {
                backend: backend.id.name(),
                detail: format!("no response within {}s", self.timeout.as_secs()),
            }),
        }
    }
}

/// Strip hop-by-hop headers plus host/content-length, which the client
/// rewrites for the upstream connection. Everything else passes through
/// unchanged, so backends never silently lose a header they depend on.
pub(crate) fn sanitize_headers(headers: &HeaderMap) -> HeaderMap {
    let mut sanitized = HeaderMap::new();

    for (name, value) in headers.iter() {
        let name_lower = name.as_str().to_ascii_lowercase();
        if HOP_BY_HOP.contains(&name_lower.as_str()) {
            continue;
        }
        if name_lower == "host" || name_lower == "content-length" {
            continue;
        }
        sanitized.append(name.clone(), value.clone());
    }

    sanitized
}
