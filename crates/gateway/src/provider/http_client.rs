use std::time::Duration;

use http::{HeaderMap, HeaderValue};
use reqwest::Client;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

fn base_builder(mut headers: HeaderMap, timeout_secs: Option<u64>) -> reqwest::ClientBuilder {
    headers.insert(http::header::CONNECTION, HeaderValue::from_static("keep-alive"));

    Client::builder()
        .timeout(timeout_secs.map(Duration::from_secs).unwrap_or(DEFAULT_TIMEOUT))
        // Hyper's pool exposes no TTL on connections, only an idle timeout.
        // A short idle timeout is what actually picks up DNS changes in
        // practice, so keep it low even though it looks too aggressive.
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .default_headers(headers)
}

/// Synchronous client: connection pool capped at the configured
/// per-provider concurrency.
pub(crate) fn sync_client(headers: HeaderMap, max_concurrency: Option<usize>, timeout_secs: Option<u64>) -> Client {
    let mut builder = base_builder(headers, timeout_secs);

    if let Some(max) = max_concurrency {
        builder = builder.pool_max_idle_per_host(max);
    }

    builder.build().unwrap_or_else(|e| {
        log::error!("Failed to build HTTP client, falling back to defaults: {e}");
        Client::new()
    })
}

/// Streaming client: same timeout, but connections are never reused across
/// streams mid-flight.
pub(crate) fn streaming_client(headers: HeaderMap, timeout_secs: Option<u64>) -> Client {
    base_builder(headers, timeout_secs)
        .pool_max_idle_per_host(0)
        .build()
        .unwrap_or_else(|e| {
            log::error!("Failed to build streaming HTTP client, falling back to defaults: {e}");
            Client::new()
        })
}
