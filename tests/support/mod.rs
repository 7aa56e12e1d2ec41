//! Scripted in-memory article source shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use pocket_exporter::credential::Credential;
use pocket_exporter::export::{ExportConfig, PacingConfig, RetryConfig};
use pocket_exporter::fetcher::{ArticleSource, Batch, FetchError, FetcherResult, PageRequest};
use pocket_exporter::shutdown::SharedShutdown;
use pocket_exporter::RawArticle;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Serves `total` articles with ids `item-0`, `item-1`, ... in order.
///
/// Scripted failures are consumed one per call before any page is served:
/// `Some(err)` fails that call, `None` lets it through. Page caps shorten
/// the next served pages without ending the listing.
pub struct ScriptedSource {
    total: u64,
    script: Mutex<VecDeque<Option<FetchError>>>,
    page_caps: Mutex<VecDeque<u32>>,
    before_page: Option<(u32, Box<dyn Fn() + Send + Sync>)>,
    requests: Mutex<Vec<PageRequest>>,
    calls: AtomicU32,
    served: AtomicU32,
    interrupt: Option<(u32, SharedShutdown)>,
}

impl ScriptedSource {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            script: Mutex::new(VecDeque::new()),
            page_caps: Mutex::new(VecDeque::new()),
            before_page: None,
            requests: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
            served: AtomicU32::new(0),
            interrupt: None,
        }
    }

    /// Queue the outcome of the next unscripted calls
    pub fn with_script(self, steps: Vec<Option<FetchError>>) -> Self {
        self.script.lock().unwrap().extend(steps);
        self
    }

    /// Serve at most `caps[i]` articles on the i-th served page
    pub fn with_page_caps(self, caps: Vec<u32>) -> Self {
        self.page_caps.lock().unwrap().extend(caps);
        self
    }

    /// Run `hook` just before serving the `page`-th page
    pub fn before_page(mut self, page: u32, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.before_page = Some((page, Box::new(hook)));
        self
    }

    /// Fail every call with `error`
    pub fn always_failing(error: FetchError, calls: usize) -> Self {
        Self::new(0).with_script(vec![Some(error); calls])
    }

    /// Request shutdown right after serving the `pages`-th page
    pub fn interrupt_after(mut self, pages: u32, shutdown: SharedShutdown) -> Self {
        self.interrupt = Some((pages, shutdown));
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }
}

pub fn article(index: u64) -> RawArticle {
    let id = format!("item-{index}");
    let fields = serde_json::json!({
        "item_id": id,
        "resolved_url": format!("https://example.com/{index}"),
        "resolved_title": format!("Article {index}"),
        "status": "0",
        "time_added": "1700000000",
        "word_count": "321",
        "tags": { "rust": { "tag": "rust" } }
    });
    RawArticle::new(id, fields.as_object().cloned().unwrap())
}

#[async_trait]
impl ArticleSource for ScriptedSource {
    async fn fetch_page(
        &self,
        request: &PageRequest,
        _credential: &Credential,
    ) -> FetcherResult<Batch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(*request);

        if let Some(Some(err)) = self.script.lock().unwrap().pop_front() {
            return Err(err);
        }

        let served = self.served.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((page, hook)) = &self.before_page {
            if served == *page {
                hook();
            }
        }

        let count = match self.page_caps.lock().unwrap().pop_front() {
            Some(cap) => cap.min(request.count),
            None => request.count,
        };
        let end = (request.offset + count as u64).min(self.total);
        let articles = (request.offset.min(end)..end).map(article).collect();
        if let Some((after, shutdown)) = &self.interrupt {
            if served == *after {
                shutdown.request_shutdown();
            }
        }
        Ok(Batch::new(request, articles, end >= self.total))
    }

    fn endpoint(&self) -> &str {
        "scripted"
    }
}

pub fn credential() -> Credential {
    Credential::new("1234-abcd1234abcd1234abcd1234", "5678defa-5678-defa-5678-defa56").unwrap()
}

/// Config with no pacing delays and millisecond backoff
pub fn fast_config(dir: &Path, page_size: u32) -> ExportConfig {
    ExportConfig::new(dir)
        .with_page_size(page_size)
        .with_pacing(PacingConfig::immediate())
        .with_retry(fast_retry())
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        ..RetryConfig::default()
    }
}

pub fn transient() -> FetchError {
    FetchError::TransientNetwork("connection reset by peer".to_string())
}

pub fn rate_limited() -> FetchError {
    FetchError::RateLimited {
        retry_after: None,
        message: "slow down".to_string(),
    }
}
