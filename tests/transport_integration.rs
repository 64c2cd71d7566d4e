//! Integration tests for TransmissionClient.
//!
//! Uses wiremock as the ingestion API. Tests cover compression, headers,
//! status classification, retry behaviour, timeouts and confirmation.

use std::io::Read;
use std::time::Duration;

use flate2::read::GzDecoder;
use testwire::config::ReporterConfig;
use testwire::model::{ExecutionRecord, RunMetadata, TestOutcome};
use testwire::transport::{
    COMPRESSION_THRESHOLD, SendOptions, TransmissionClient, TransmitErrorKind,
};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn config(server: &MockServer) -> ReporterConfig {
    ReporterConfig {
        api_key: "test-key".to_string(),
        endpoint: format!("{}/api/v1/reports", server.uri()),
        timeout_ms: 2_000,
        max_retries: 2,
        retry_base_delay_ms: 10,
        retry_max_delay_ms: 50,
        ..ReporterConfig::default()
    }
}

fn client(server: &MockServer) -> TransmissionClient {
    TransmissionClient::new(&config(server)).expect("failed to create client")
}

fn record(id: usize, error_len: usize) -> ExecutionRecord {
    ExecutionRecord {
        id: format!("t{}", id),
        file: "tests/checkout.spec.ts".to_string(),
        suite_path: vec!["checkout".to_string()],
        name: format!("case {}", id),
        tags: Vec::new(),
        project: None,
        outcome: TestOutcome::Failed,
        duration: Duration::from_millis(120),
        retry: 0,
        error: Some("e".repeat(error_len)),
        steps: Vec::new(),
        stdout: Vec::new(),
        stderr: Vec::new(),
        artifacts: Vec::new(),
    }
}

/// Decodes a captured request body, gunzipping if needed.
fn body_of(request: &Request) -> serde_json::Value {
    let gzip = request
        .headers
        .get("content-encoding")
        .map(|v| v == "gzip")
        .unwrap_or(false);

    if gzip {
        let mut text = String::new();
        GzDecoder::new(request.body.as_slice())
            .read_to_string(&mut text)
            .expect("body is not gzip");
        serde_json::from_str(&text).expect("body is not JSON")
    } else {
        serde_json::from_slice(&request.body).expect("body is not JSON")
    }
}

async fn mount_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v1/reports"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "message": "accepted",
            "summary": {"total": 1, "failed": 1}
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_small_batch_is_sent_uncompressed_with_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/reports"))
        .and(header("authorization", "Bearer test-key"))
        .and(header("content-type", "application/json"))
        .and(header("x-testwire-sdk-version", env!("CARGO_PKG_VERSION")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let result = client(&server)
        .send_batch(&RunMetadata::new("test"), &[record(1, 10)])
        .await;

    assert!(result.success, "{:?}", result.error);
    assert!(!result.compressed);
    assert!(result.bytes_uncompressed <= COMPRESSION_THRESHOLD);

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    assert!(request.headers.get("content-encoding").is_none());
    assert!(request.headers.get("x-request-id").is_some());
    let user_agent = request.headers.get("user-agent").unwrap().to_str().unwrap();
    assert!(user_agent.starts_with("testwire/"));
}

#[tokio::test]
async fn test_large_batch_is_gzipped() {
    let server = MockServer::start().await;
    mount_ok(&server).await;

    let records: Vec<_> = (0..4).map(|i| record(i, 600)).collect();
    let result = client(&server)
        .send_batch(&RunMetadata::new("test"), &records)
        .await;

    assert!(result.success);
    assert!(result.compressed);
    assert!(result.bytes_uncompressed > COMPRESSION_THRESHOLD);
    assert!(result.bytes_sent < result.bytes_uncompressed);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(
        requests[0].headers.get("content-encoding").unwrap(),
        "gzip"
    );
    let body = body_of(&requests[0]);
    assert_eq!(body["results"].as_array().unwrap().len(), 4);
    assert_eq!(body["results"][3]["id"], "t3");
    assert_eq!(body["metadata"]["source"], "test");
}

#[tokio::test]
async fn test_retries_server_errors_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/reports"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_ok(&server).await;

    let result = client(&server)
        .send_batch(&RunMetadata::new("test"), &[record(1, 10)])
        .await;

    assert!(result.success);
    assert_eq!(result.retry_count, 2);
    assert_eq!(result.response.unwrap().message.as_deref(), Some("accepted"));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);

    let ids: Vec<_> = requests
        .iter()
        .map(|r| r.headers.get("x-request-id").unwrap().to_str().unwrap().to_string())
        .collect();
    assert!(ids.iter().all(|id| *id == result.correlation_id));
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/reports"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad metadata"))
        .expect(1)
        .mount(&server)
        .await;

    let result = client(&server)
        .send_batch(&RunMetadata::new("test"), &[record(1, 10), record(2, 10)])
        .await;

    assert!(!result.success);
    assert_eq!(result.retry_count, 0);

    let error = result.error.unwrap();
    assert_eq!(error.kind, TransmitErrorKind::Api { status: 400 });
    assert_eq!(error.failed_records, 2);
    assert_eq!(error.correlation_id, result.correlation_id);
    assert!(error.message.contains("bad metadata"));
}

#[tokio::test]
async fn test_exhausted_retries_return_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/reports"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let result = client(&server)
        .send_batch(&RunMetadata::new("test"), &[record(1, 10)])
        .await;

    assert!(!result.success);
    assert_eq!(result.retry_count, 2);
    assert_eq!(
        result.error.unwrap().kind,
        TransmitErrorKind::Api { status: 502 }
    );
    assert!(result.bytes_sent > 0);
}

#[tokio::test]
async fn test_send_options_override_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/reports"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let result = client(&server)
        .send_batch_with(
            &RunMetadata::new("test"),
            &[record(1, 10)],
            SendOptions::no_retry(),
        )
        .await;

    assert!(!result.success);
    assert_eq!(result.retry_count, 0);
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/reports"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let mut cfg = config(&server);
    cfg.timeout_ms = 50;
    cfg.max_retries = 1;
    let client = TransmissionClient::new(&cfg).unwrap();

    let result = client
        .send_batch(&RunMetadata::new("test"), &[record(1, 10)])
        .await;

    assert!(!result.success);
    assert_eq!(result.retry_count, 1);
    assert_eq!(result.error.unwrap().kind, TransmitErrorKind::Timeout);
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() {
    let server = MockServer::start().await;
    let mut cfg = config(&server);
    cfg.endpoint = "http://127.0.0.1:9/reports".to_string();
    cfg.max_retries = 0;
    let client = TransmissionClient::new(&cfg).unwrap();

    let result = client
        .send_batch(&RunMetadata::new("test"), &[record(1, 10)])
        .await;

    assert!(!result.success);
    assert_eq!(result.error.unwrap().kind, TransmitErrorKind::Network);
}

#[tokio::test]
async fn test_unparseable_success_body_is_still_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/reports"))
        .respond_with(ResponseTemplate::new(202).set_body_string("<html>ok</html>"))
        .mount(&server)
        .await;

    let result = client(&server)
        .send_batch(&RunMetadata::new("test"), &[record(1, 10)])
        .await;

    assert!(result.success);
    assert!(result.response.is_none());
    assert!(result.upload_urls().is_empty());
}

#[tokio::test]
async fn test_upload_urls_are_returned() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/reports"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "uploadUrls": {"a1": "https://bucket.example/a1?sig=x"}
        })))
        .mount(&server)
        .await;

    let result = client(&server)
        .send_batch(&RunMetadata::new("test"), &[record(1, 10)])
        .await;

    assert_eq!(
        result.upload_urls().get("a1").map(String::as_str),
        Some("https://bucket.example/a1?sig=x")
    );
}

#[tokio::test]
async fn test_confirm_uploads_posts_ids() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/reports/confirm-uploads"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_json(serde_json::json!({"artifactIds": ["a1", "a2"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "confirmed": 2
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client(&server)
        .confirm_uploads(&["a1".to_string(), "a2".to_string()])
        .await
        .expect("confirm failed");

    assert!(response.success);
    assert_eq!(response.confirmed, 2);
}

#[tokio::test]
async fn test_confirm_uploads_is_single_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/reports/confirm-uploads"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let error = client(&server)
        .confirm_uploads(&["a1".to_string()])
        .await
        .unwrap_err();

    assert_eq!(error.kind, TransmitErrorKind::Api { status: 503 });
}
