//! HTTP source behaviour against a mock provider

use crate::support::{credential, fast_config};
use pocket_exporter::export::ExportDriver;
use pocket_exporter::fetcher::pocket_http::PocketHttpSource;
use pocket_exporter::fetcher::{ArticleSource, FetchError, PageRequest};
use pocket_exporter::storage::jsonl::read_records;
use pocket_exporter::storage::ExportPaths;
use pocket_exporter::{DetailLevel, StateFilter};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn source(server: &MockServer) -> PocketHttpSource {
    PocketHttpSource::with_client(
        Arc::new(reqwest::Client::new()),
        format!("{}/v3/get", server.uri()),
    )
}

fn request(offset: u64, count: u32) -> PageRequest {
    PageRequest::new(offset, count, StateFilter::All, DetailLevel::Complete)
}

fn page(ids: &[u64]) -> Value {
    let list: serde_json::Map<String, Value> = ids
        .iter()
        .map(|id| {
            (
                id.to_string(),
                json!({
                    "item_id": id.to_string(),
                    "resolved_title": format!("Title {id}"),
                    "time_added": "1625097600"
                }),
            )
        })
        .collect();
    json!({ "status": 1, "complete": 1, "list": list, "since": 1625097600 })
}

async fn fetch_error(template: ResponseTemplate) -> FetchError {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/get"))
        .respond_with(template)
        .mount(&server)
        .await;

    source(&server)
        .fetch_page(&request(0, 10), &credential())
        .await
        .unwrap_err()
}

#[tokio::test]
async fn test_page_request_body_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/get"))
        .and(header("X-Accept", "application/json"))
        .and(body_partial_json(json!({
            "offset": 30,
            "count": 2,
            "state": "unread",
            "detailType": "simple",
            "sort": "oldest"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&[11, 12])))
        .expect(1)
        .mount(&server)
        .await;

    let req = PageRequest::new(30, 2, StateFilter::Unread, DetailLevel::Simple);
    let batch = source(&server).fetch_page(&req, &credential()).await.unwrap();

    assert_eq!(batch.len(), 2);
    assert_eq!(batch.articles[0].item_id(), "11");
    assert_eq!(batch.articles[1].item_id(), "12");
    // a full page does not end the listing even though complete=1
    assert!(!batch.complete);
}

#[tokio::test]
async fn test_short_page_does_not_end_listing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&[1, 2, 3])))
        .mount(&server)
        .await;

    let batch = source(&server)
        .fetch_page(&request(0, 10), &credential())
        .await
        .unwrap();
    assert_eq!(batch.len(), 3);
    assert!(!batch.complete);
}

#[tokio::test]
async fn test_empty_list_array_ends_listing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": 2, "complete": 1, "list": []})),
        )
        .mount(&server)
        .await;

    let batch = source(&server)
        .fetch_page(&request(500, 10), &credential())
        .await
        .unwrap();
    assert!(batch.is_empty());
    assert!(batch.complete);
}

#[tokio::test]
async fn test_401_is_auth() {
    let err = fetch_error(ResponseTemplate::new(401).insert_header("X-Error", "Invalid access token")).await;
    assert!(matches!(err, FetchError::Auth { status: 401, ref message } if message == "Invalid access token"));
}

#[tokio::test]
async fn test_403_with_spent_quota_is_rate_limit() {
    let err = fetch_error(
        ResponseTemplate::new(403)
            .insert_header("X-Limit-User-Remaining", "0")
            .insert_header("X-Limit-User-Reset", "42"),
    )
    .await;
    assert_eq!(err.retry_after(), Some(Duration::from_secs(42)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_403_with_quota_left_is_auth() {
    let err = fetch_error(ResponseTemplate::new(403).insert_header("X-Limit-User-Remaining", "120")).await;
    assert!(matches!(err, FetchError::Auth { status: 403, .. }));
}

#[tokio::test]
async fn test_429_honours_retry_after() {
    let err = fetch_error(ResponseTemplate::new(429).insert_header("Retry-After", "7")).await;
    assert!(matches!(err, FetchError::RateLimited { .. }));
    assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
}

#[tokio::test]
async fn test_5xx_is_transient() {
    let err = fetch_error(ResponseTemplate::new(503).set_body_string("upstream unavailable")).await;
    assert!(matches!(err, FetchError::TransientNetwork(ref msg) if msg.contains("503")));
}

#[tokio::test]
async fn test_missing_complete_is_format_error() {
    let err = fetch_error(ResponseTemplate::new(200).set_body_json(json!({"status": 1, "list": {}}))).await;
    assert!(matches!(err, FetchError::Format(_)));
}

#[tokio::test]
async fn test_non_json_body_is_format_error() {
    let err = fetch_error(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>")).await;
    assert!(matches!(err, FetchError::Format(_)));
}

#[tokio::test]
async fn test_unreachable_provider_is_transient() {
    let server = MockServer::start().await;
    let url = format!("{}/v3/get", server.uri());
    drop(server);

    let source = PocketHttpSource::with_client(Arc::new(reqwest::Client::new()), url);
    let err = source
        .fetch_page(&request(0, 10), &credential())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::TransientNetwork(_)));
}

#[tokio::test]
async fn test_export_over_http_recovers_from_throttling() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"offset": 0})))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&[1, 2])))
        .mount(&server)
        .await;
    // first request at offset 2 is throttled, the retry gets a short page
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"offset": 2})))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"offset": 2})))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&[3])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"offset": 3})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": 2, "complete": 1, "list": []})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut driver = ExportDriver::new(source(&server), credential(), fast_config(dir.path(), 2));
    let report = driver.run().await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.rate_limit_events, 1);
    assert_eq!(report.state.offset, 3);
    assert!(report.state.is_complete());

    let records = read_records(&ExportPaths::under(dir.path()).normalized).unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.item_id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
    assert_eq!(records[0].time_added.as_deref(), Some("2021-07-01T00:00:00Z"));
}
