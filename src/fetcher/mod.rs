//! Paginated article sources
//!
//! A source answers exactly one page request at a time. It validates the
//! response shape and classifies every failure, but it never persists
//! anything or touches shared state.

use crate::credential::Credential;
use crate::{DetailLevel, RawArticle, StateFilter};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub mod pocket_http;
pub mod pocket_parser;
pub mod retry_formatter;
pub mod shared_resources;

/// Largest page the provider accepts
pub const PAGE_SIZE_MAX: u32 = 272;

/// Fetch errors, classified for the retry policy and the rate controller
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    /// Credential rejected; terminal
    #[error("authentication failed (HTTP {status}): {message}")]
    Auth {
        /// HTTP status that signalled the failure
        status: u16,
        /// Provider message, if any
        message: String,
    },

    /// Provider throttled the request; retryable and escalates pacing
    #[error("rate limit exceeded: {message}")]
    RateLimited {
        /// Server-suggested wait before the next attempt
        retry_after: Option<Duration>,
        /// Provider message, if any
        message: String,
    },

    /// Timeout, connection reset, 5xx; retryable
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Unexpected payload shape; retryable a bounded number of times
    #[error("unexpected response format: {0}")]
    Format(String),

    /// Anything unclassified; terminal
    #[error("fatal fetch error: {0}")]
    Fatal(String),
}

impl FetchError {
    /// Error class of this failure
    pub fn class(&self) -> FetchErrorClass {
        match self {
            Self::Auth { .. } => FetchErrorClass::Auth,
            Self::RateLimited { .. } => FetchErrorClass::RateLimit,
            Self::TransientNetwork(_) => FetchErrorClass::TransientNetwork,
            Self::Format(_) => FetchErrorClass::Format,
            Self::Fatal(_) => FetchErrorClass::Fatal,
        }
    }

    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::TransientNetwork(_) | Self::Format(_)
        )
    }

    /// Server-provided wait hint, only for rate limits
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Coarse classification of a [`FetchError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorClass {
    /// Authentication
    Auth,
    /// Rate limit
    RateLimit,
    /// Transient network
    TransientNetwork,
    /// Response format
    Format,
    /// Unclassified
    Fatal,
}

impl FetchErrorClass {
    /// Stable label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::TransientNetwork => "transient_network",
            Self::Format => "format",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for FetchErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type for fetch operations
pub type FetcherResult<T> = Result<T, FetchError>;

/// One page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Number of articles to skip
    pub offset: u64,
    /// Page size, at most [`PAGE_SIZE_MAX`]
    pub count: u32,
    /// Which articles to list
    pub state: StateFilter,
    /// Payload detail
    pub detail: DetailLevel,
}

impl PageRequest {
    /// Build a request, clamping `count` into `1..=PAGE_SIZE_MAX`.
    pub fn new(offset: u64, count: u32, state: StateFilter, detail: DetailLevel) -> Self {
        Self {
            offset,
            count: count.clamp(1, PAGE_SIZE_MAX),
            state,
            detail,
        }
    }
}

/// Result of one page fetch.
///
/// Consumed straight into persistent storage and dropped.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Offset that was requested
    pub requested_offset: u64,
    /// Count that was requested
    pub requested_count: u32,
    /// Articles in provider order
    pub articles: Vec<RawArticle>,
    /// No further pages exist
    pub complete: bool,
    /// When the page arrived
    pub fetched_at: DateTime<Utc>,
}

impl Batch {
    /// Build a batch for `request`
    pub fn new(request: &PageRequest, articles: Vec<RawArticle>, complete: bool) -> Self {
        Self {
            requested_offset: request.offset,
            requested_count: request.count,
            articles,
            complete,
            fetched_at: Utc::now(),
        }
    }

    /// Number of articles in the page
    pub fn len(&self) -> usize {
        self.articles.len()
    }

    /// Whether the page is empty
    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }
}

/// A paginated article source
#[async_trait]
pub trait ArticleSource: Send + Sync {
    /// Fetch one page
    ///
    /// # Errors
    /// Returns a classified [`FetchError`]; the caller decides whether to retry.
    async fn fetch_page(&self, request: &PageRequest, credential: &Credential)
        -> FetcherResult<Batch>;

    /// Endpoint or name used in logs
    fn endpoint(&self) -> &str;
}

#[async_trait]
impl<T: ArticleSource + ?Sized> ArticleSource for Arc<T> {
    async fn fetch_page(
        &self,
        request: &PageRequest,
        credential: &Credential,
    ) -> FetcherResult<Batch> {
        (**self).fetch_page(request, credential).await
    }

    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }
}
