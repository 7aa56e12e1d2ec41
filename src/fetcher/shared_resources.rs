//! Shared HTTP client for provider sources
//!
//! One pooled client per process. Every request is bounded by explicit
//! connect and overall timeouts so no fetch can hang the export loop.

use once_cell::sync::Lazy;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// HTTP connect timeout (seconds)
pub const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
/// HTTP request timeout (seconds) - overall time for the entire request
pub const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Global HTTP client shared by all sources
///
/// Configured with explicit timeouts:
/// - Connect timeout: 10 seconds
/// - Request timeout: 30 seconds
pub static GLOBAL_HTTP_CLIENT: Lazy<Arc<Client>> = Lazy::new(|| {
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
        .user_agent(concat!("pocket-exporter/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            panic!("FATAL: Failed to build HTTP client: {e}. Check system TLS configuration.");
        });
    Arc::new(client)
});

/// Get the global HTTP client
pub fn global_http_client() -> Arc<Client> {
    GLOBAL_HTTP_CLIENT.clone()
}
