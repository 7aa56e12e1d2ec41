//! Pocket HTTP source
//!
//! Issues exactly one `POST /v3/get` per page and classifies the outcome:
//! - 401, or 403 with quota left: authentication failure
//! - 429, or 403 with the user/key quota at zero: rate limit
//! - 5xx, 408, timeouts, connection failures: transient network error
//! - malformed body: format error
//! - everything else: fatal
//!
//! Retrying is not done here; see [`crate::export::retry`].

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::credential::Credential;
use crate::fetcher::pocket_parser::PocketParser;
use crate::fetcher::shared_resources::global_http_client;
use crate::fetcher::{ArticleSource, Batch, FetchError, FetcherResult, PageRequest};
use crate::metrics::{record_user_quota, RequestMetrics};

/// Production retrieve endpoint
pub const POCKET_GET_URL: &str = "https://getpocket.com/v3/get";

/// Longest error body kept in messages
const MAX_ERROR_BODY: usize = 200;

/// Provider rate limit headers, all optional
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// `X-Limit-User-Limit`
    pub user_limit: Option<u32>,
    /// `X-Limit-User-Remaining`
    pub user_remaining: Option<u32>,
    /// `X-Limit-User-Reset` (seconds)
    pub user_reset: Option<u64>,
    /// `X-Limit-Key-Limit`
    pub key_limit: Option<u32>,
    /// `X-Limit-Key-Remaining`
    pub key_remaining: Option<u32>,
    /// `X-Limit-Key-Reset` (seconds)
    pub key_reset: Option<u64>,
    /// `Retry-After` (seconds)
    pub retry_after: Option<u64>,
}

impl RateLimitHeaders {
    /// Extract rate limit headers; unparseable values are ignored
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            user_limit: header_num(headers, "X-Limit-User-Limit"),
            user_remaining: header_num(headers, "X-Limit-User-Remaining"),
            user_reset: header_num(headers, "X-Limit-User-Reset"),
            key_limit: header_num(headers, "X-Limit-Key-Limit"),
            key_remaining: header_num(headers, "X-Limit-Key-Remaining"),
            key_reset: header_num(headers, "X-Limit-Key-Reset"),
            retry_after: header_num(headers, "Retry-After"),
        }
    }

    /// Whether the provider reports a spent quota
    pub fn quota_exhausted(&self) -> bool {
        self.user_remaining == Some(0) || self.key_remaining == Some(0)
    }

    /// Best wait hint available
    pub fn wait_hint(&self) -> Option<Duration> {
        self.retry_after
            .or(self.user_reset.filter(|_| self.user_remaining == Some(0)))
            .or(self.key_reset.filter(|_| self.key_remaining == Some(0)))
            .map(Duration::from_secs)
    }
}

fn header_num<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    let raw = headers.get(name)?.to_str().ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(header = name, value = raw, "Ignoring unparseable header");
            None
        }
    }
}

/// Classify a non-success HTTP status.
///
/// `message` is the provider's `X-Error` header or a body excerpt.
pub fn classify_status(status: StatusCode, limits: &RateLimitHeaders, message: String) -> FetchError {
    match status.as_u16() {
        401 => FetchError::Auth {
            status: 401,
            message,
        },
        403 if limits.quota_exhausted() => FetchError::RateLimited {
            retry_after: limits.wait_hint(),
            message,
        },
        403 => FetchError::Auth {
            status: 403,
            message,
        },
        429 => FetchError::RateLimited {
            retry_after: limits.wait_hint(),
            message,
        },
        408 => FetchError::TransientNetwork(format!("request timeout (408): {message}")),
        code if status.is_server_error() => {
            FetchError::TransientNetwork(format!("server error ({code}): {message}"))
        }
        code => FetchError::Fatal(format!("unexpected status {code}: {message}")),
    }
}

/// Classify a transport-level failure
pub fn classify_transport(err: &reqwest::Error) -> FetchError {
    if err.is_builder() {
        return FetchError::Fatal(format!("invalid request: {err}"));
    }
    if err.is_timeout() {
        return FetchError::TransientNetwork(format!("request timed out: {err}"));
    }
    if err.is_connect() {
        return FetchError::TransientNetwork(format!("connection failed: {err}"));
    }
    if err.is_request() || err.is_body() || err.is_decode() {
        return FetchError::TransientNetwork(format!("request interrupted: {err}"));
    }
    FetchError::Fatal(err.to_string())
}

/// HTTP source for the Pocket retrieve API
#[derive(Debug, Clone)]
pub struct PocketHttpSource {
    client: Arc<Client>,
    url: String,
}

impl Default for PocketHttpSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PocketHttpSource {
    /// Source using the shared client and the production endpoint
    pub fn new() -> Self {
        Self::with_client(global_http_client(), POCKET_GET_URL)
    }

    /// Source with an explicit client and endpoint URL
    pub fn with_client(client: Arc<Client>, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    fn request_body(request: &PageRequest, credential: &Credential) -> serde_json::Value {
        serde_json::json!({
            "consumer_key": credential.consumer_key(),
            "access_token": credential.access_token(),
            "detailType": request.detail.as_str(),
            "state": request.state.as_str(),
            "sort": "oldest",
            "count": request.count,
            "offset": request.offset,
        })
    }

    fn log_limits(limits: &RateLimitHeaders) {
        if let Some(remaining) = limits.user_remaining {
            record_user_quota(remaining, limits.user_limit);
        }
        debug!(
            user_limit = ?limits.user_limit,
            user_remaining = ?limits.user_remaining,
            user_reset = ?limits.user_reset,
            key_remaining = ?limits.key_remaining,
            "Provider rate limit headers"
        );
    }
}

#[async_trait]
impl ArticleSource for PocketHttpSource {
    async fn fetch_page(
        &self,
        request: &PageRequest,
        credential: &Credential,
    ) -> FetcherResult<Batch> {
        let metrics = RequestMetrics::start(&self.url);

        debug!(
            correlation_id = metrics.correlation_id(),
            offset = request.offset,
            count = request.count,
            "Requesting page"
        );

        let response = self
            .client
            .post(&self.url)
            .header("X-Accept", "application/json")
            .json(&Self::request_body(request, credential))
            .send()
            .await
            .map_err(|e| {
                metrics.record_network_error();
                classify_transport(&e)
            })?;

        let status = response.status();
        metrics.record_complete(status.as_u16());

        let limits = RateLimitHeaders::from_headers(response.headers());
        Self::log_limits(&limits);

        if !status.is_success() {
            let error_header = response
                .headers()
                .get("X-Error")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let message = match error_header {
                Some(message) => message,
                None => {
                    let mut body = response.text().await.unwrap_or_default();
                    if body.len() > MAX_ERROR_BODY {
                        let cut = (0..=MAX_ERROR_BODY)
                            .rev()
                            .find(|i| body.is_char_boundary(*i))
                            .unwrap_or(0);
                        body.truncate(cut);
                    }
                    body
                }
            };
            let err = classify_status(status, &limits, message);
            warn!(
                status = status.as_u16(),
                class = err.class().as_str(),
                offset = request.offset,
                "Page request failed"
            );
            return Err(err);
        }

        let body = response.text().await.map_err(|e| classify_transport(&e))?;
        let page = PocketParser::parse_body(&body)?;

        // complete=1 arrives on every page and short pages occur mid-listing;
        // only an empty page ends it
        let complete = page.articles.is_empty();

        debug!(
            articles = page.articles.len(),
            provider_complete = page.complete,
            complete = complete,
            "Page received"
        );

        Ok(Batch::new(request, page.articles, complete))
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}
