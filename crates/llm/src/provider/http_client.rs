use std::time::Duration;

use reqwest::Client;
use reqwest::header::{CONNECTION, HeaderMap, HeaderValue};

/// Builds a client with a short idle timeout, which picks up DNS changes
/// under a long-lived process without forcing a new connection on every
/// request.
pub(crate) fn default_http_client_builder(mut headers: HeaderMap) -> reqwest::ClientBuilder {
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

    Client::builder()
        .timeout(Duration::from_secs(60))
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .default_headers(headers)
}

/// Process-wide client for adapters that don't need custom default headers.
pub(crate) fn http_client() -> Client {
    use std::sync::OnceLock;
    static CLIENT: OnceLock<Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            default_http_client_builder(HeaderMap::new())
                .build()
                .expect("failed to build default HTTP client")
        })
        .clone()
}
