//! Delivery of record batches to the ingestion API.
//!
//! [`TransmissionClient`] sends one batch (run metadata plus sanitized
//! records) per call and always answers with a [`SendResult`]; it never
//! returns `Err` and never panics on a delivery failure.
//!
//! # Request lifecycle
//!
//! ```text
//! send_batch(metadata, records)
//!   │
//!   ├── empty? ──────────────────────────────► success, nothing sent
//!   ├── encode JSON, gzip if > 1024 bytes ──► failure: validation
//!   │
//!   └── attempt 1..=max_retries+1 ──► POST endpoint (X-Request-Id: <batch id>)
//!         ├── 2xx ─────────────────────────────► success
//!         ├── 4xx ─────────────────────────────► failure, no retry
//!         └── 5xx / network / timeout
//!               ├── attempts left ──► sleep(backoff ± 25%) ──► next attempt
//!               └── exhausted ─────────────────► failure (last error)
//! ```
//!
//! Each attempt has its own deadline; a timeout cancels that request only.

pub mod backoff;
pub mod error;

pub use error::{TransmitError, TransmitErrorKind};

use std::collections::HashMap;
use std::io::Write;
use std::time::{Duration, Instant};

use flate2::Compression;
use flate2::write::GzEncoder;
use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ReporterConfig;
use crate::model::{ExecutionRecord, RunMetadata, WireRecord};
use crate::sanitize::truncate_length;

/// Payloads larger than this many bytes are gzip-compressed.
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// Version reported in `User-Agent` and the SDK version header.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";
pub const SDK_VERSION_HEADER: &str = "X-Testwire-Sdk-Version";

/// Longest server error body quoted in an error message.
const MAX_ERROR_BODY: usize = 200;

/// Per-send overrides.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions {
    /// Replaces the configured retry budget for this send.
    pub max_retries: Option<u32>,
}

impl SendOptions {
    /// A single attempt with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: Some(0),
        }
    }
}

/// Per-outcome counts echoed back by the ingestion API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestSummary {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub timed_out: u64,
    pub interrupted: u64,
}

/// Body of a successful ingestion response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestResponse {
    pub success: bool,
    pub message: Option<String>,
    pub summary: Option<IngestSummary>,

    /// Presigned upload targets keyed by artifact id.
    pub upload_urls: HashMap<String, String>,
}

/// Body of an upload confirmation response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfirmResponse {
    pub success: bool,
    pub confirmed: u64,
}

/// Outcome and metrics of one batch send.
///
/// Metrics are populated whether or not the send succeeded.
#[derive(Debug, Clone)]
pub struct SendResult {
    pub success: bool,

    /// Wall time across every attempt, backoff sleeps included.
    pub latency: Duration,

    /// Bytes on the wire per attempt (after compression).
    pub bytes_sent: usize,

    /// Size of the JSON payload before compression.
    pub bytes_uncompressed: usize,

    pub compressed: bool,

    /// Attempts made after the first.
    pub retry_count: u32,

    /// Sent as `X-Request-Id` on every attempt of this batch.
    pub correlation_id: String,

    /// Set when `success` is false.
    pub error: Option<TransmitError>,

    /// Parsed response body, absent if the server's body didn't parse.
    pub response: Option<IngestResponse>,
}

impl SendResult {
    /// Upload targets offered by the server, empty on failure.
    pub fn upload_urls(&self) -> HashMap<String, String> {
        self.response
            .as_ref()
            .map(|r| r.upload_urls.clone())
            .unwrap_or_default()
    }
}

#[derive(Serialize)]
struct BatchPayload<'a> {
    metadata: &'a RunMetadata,
    results: Vec<WireRecord<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmPayload<'a> {
    artifact_ids: &'a [String],
}

/// An encoded request body.
#[derive(Debug)]
struct EncodedBatch {
    body: Vec<u8>,
    uncompressed_len: usize,
    gzip: bool,
}

/// Encodes a batch as JSON, compressing it past [`COMPRESSION_THRESHOLD`].
fn encode_batch(
    metadata: &RunMetadata,
    records: &[ExecutionRecord],
) -> Result<EncodedBatch, TransmitError> {
    let payload = BatchPayload {
        metadata,
        results: records.iter().map(ExecutionRecord::to_wire).collect(),
    };
    let json = serde_json::to_vec(&payload)
        .map_err(|e| TransmitError::validation(format!("failed to serialize batch: {}", e)))?;
    let uncompressed_len = json.len();

    if uncompressed_len <= COMPRESSION_THRESHOLD {
        return Ok(EncodedBatch {
            body: json,
            uncompressed_len,
            gzip: false,
        });
    }

    let body = gzip(&json)
        .map_err(|e| TransmitError::validation(format!("failed to compress batch: {}", e)))?;
    Ok(EncodedBatch {
        body,
        uncompressed_len,
        gzip: true,
    })
}

/// Gzips `data` in memory.
pub fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// HTTP client for the ingestion API.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct TransmissionClient {
    http: reqwest::Client,
    endpoint: String,
    confirm_endpoint: String,
    api_key: String,
    timeout: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
}

impl TransmissionClient {
    /// Builds a client from reporter settings.
    ///
    /// # Errors
    ///
    /// Returns a `Validation` error for an empty API key, an endpoint that
    /// isn't an http(s) URL, or if the HTTP client can't be initialised.
    pub fn new(config: &ReporterConfig) -> Result<Self, TransmitError> {
        if config.api_key.trim().is_empty() {
            return Err(TransmitError::validation("API key is empty"));
        }

        let url = reqwest::Url::parse(&config.endpoint).map_err(|e| {
            TransmitError::validation(format!("invalid endpoint {:?}: {}", config.endpoint, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(TransmitError::validation(format!(
                "unsupported endpoint scheme {}",
                url.scheme()
            )));
        }

        let http = reqwest::Client::builder()
            .user_agent(format!("testwire/{}", SDK_VERSION))
            .build()
            .map_err(|e| TransmitError::validation(format!("failed to build HTTP client: {}", e)))?;

        let endpoint = config.endpoint.clone();
        let confirm_endpoint = format!("{}/confirm-uploads", endpoint.trim_end_matches('/'));

        Ok(Self {
            http,
            endpoint,
            confirm_endpoint,
            api_key: config.api_key.trim().to_string(),
            timeout: config.timeout(),
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay(),
            retry_max_delay: config.retry_max_delay(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sends a batch with the configured retry budget.
    pub async fn send_batch(
        &self,
        metadata: &RunMetadata,
        records: &[ExecutionRecord],
    ) -> SendResult {
        self.send_batch_with(metadata, records, SendOptions::default())
            .await
    }

    /// Sends a batch with per-send overrides.
    pub async fn send_batch_with(
        &self,
        metadata: &RunMetadata,
        records: &[ExecutionRecord],
        options: SendOptions,
    ) -> SendResult {
        let started = Instant::now();
        let correlation_id = uuid::Uuid::new_v4().to_string();

        let mut result = SendResult {
            success: false,
            latency: Duration::ZERO,
            bytes_sent: 0,
            bytes_uncompressed: 0,
            compressed: false,
            retry_count: 0,
            correlation_id: correlation_id.clone(),
            error: None,
            response: None,
        };

        if records.is_empty() {
            debug!("empty batch, nothing to send");
            result.success = true;
            result.latency = started.elapsed();
            return result;
        }

        let encoded = match encode_batch(metadata, records) {
            Ok(encoded) => encoded,
            Err(e) => {
                result.error = Some(
                    e.with_correlation_id(&correlation_id)
                        .with_failed_records(records.len()),
                );
                result.latency = started.elapsed();
                return result;
            }
        };
        result.bytes_sent = encoded.body.len();
        result.bytes_uncompressed = encoded.uncompressed_len;
        result.compressed = encoded.gzip;

        let max_retries = options.max_retries.unwrap_or(self.max_retries);

        loop {
            debug!(
                correlation_id = %correlation_id,
                attempt = result.retry_count + 1,
                records = records.len(),
                bytes = encoded.body.len(),
                gzip = encoded.gzip,
                "sending batch"
            );

            match self.attempt(&encoded, &correlation_id).await {
                Ok(response) => {
                    info!(
                        correlation_id = %correlation_id,
                        records = records.len(),
                        retries = result.retry_count,
                        "batch delivered"
                    );
                    result.success = true;
                    result.response = response;
                    break;
                }
                Err(e) if e.is_retryable() && result.retry_count < max_retries => {
                    result.retry_count += 1;
                    let delay = backoff::delay_for(
                        result.retry_count,
                        self.retry_base_delay,
                        self.retry_max_delay,
                    );
                    warn!(
                        correlation_id = %correlation_id,
                        error = %e,
                        retry = result.retry_count,
                        max_retries,
                        backoff_ms = delay.as_millis() as u64,
                        "retrying batch"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        correlation_id = %correlation_id,
                        error = %e,
                        retries = result.retry_count,
                        records = records.len(),
                        "batch delivery failed"
                    );
                    result.error = Some(
                        e.with_correlation_id(&correlation_id)
                            .with_failed_records(records.len()),
                    );
                    break;
                }
            }
        }

        result.latency = started.elapsed();
        result
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .timeout(self.timeout)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(SDK_VERSION_HEADER, SDK_VERSION)
    }

    /// One POST of an encoded batch.
    async fn attempt(
        &self,
        encoded: &EncodedBatch,
        correlation_id: &str,
    ) -> Result<Option<IngestResponse>, TransmitError> {
        let mut request = self
            .authorized(self.http.post(&self.endpoint))
            .header(CONTENT_TYPE, "application/json")
            .header(REQUEST_ID_HEADER, correlation_id);
        if encoded.gzip {
            request = request.header(CONTENT_ENCODING, "gzip");
        }

        let response = request.body(encoded.body.clone()).send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(api_error(response).await);
        }

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                warn!(correlation_id, error = %e, "failed to read ingestion response body");
                return Ok(None);
            }
        };
        match serde_json::from_str::<IngestResponse>(&text) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => {
                warn!(correlation_id, error = %e, "ingestion response was not valid JSON");
                Ok(None)
            }
        }
    }

    /// Confirms uploaded artifacts. Single attempt, no retries.
    ///
    /// # Errors
    ///
    /// Returns the classified error if the request fails or the server
    /// answers with a non-2xx status.
    pub async fn confirm_uploads(
        &self,
        artifact_ids: &[String],
    ) -> Result<ConfirmResponse, TransmitError> {
        if artifact_ids.is_empty() {
            return Ok(ConfirmResponse {
                success: true,
                confirmed: 0,
            });
        }

        let correlation_id = uuid::Uuid::new_v4().to_string();
        let response = self
            .authorized(self.http.post(&self.confirm_endpoint))
            .header(REQUEST_ID_HEADER, &correlation_id)
            .json(&ConfirmPayload { artifact_ids })
            .send()
            .await
            .map_err(|e| TransmitError::from(e).with_correlation_id(&correlation_id))?;

        if !response.status().is_success() {
            return Err(api_error(response)
                .await
                .with_correlation_id(&correlation_id));
        }

        match response.json::<ConfirmResponse>().await {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                warn!(correlation_id = %correlation_id, error = %e, "confirmation response was not valid JSON");
                Ok(ConfirmResponse {
                    success: true,
                    confirmed: 0,
                })
            }
        }
    }
}

/// Turns a non-2xx response into an `Api` error quoting the start of the body.
async fn api_error(response: reqwest::Response) -> TransmitError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        format!("HTTP {}", status)
    } else {
        format!("HTTP {}: {}", status, truncate_length(body.trim(), MAX_ERROR_BODY))
    };
    TransmitError::new(
        TransmitErrorKind::Api {
            status: status.as_u16(),
        },
        message,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    use flate2::read::GzDecoder;

    use crate::model::TestOutcome;

    fn record(id: usize, error: Option<String>) -> ExecutionRecord {
        ExecutionRecord {
            id: format!("t{}", id),
            file: "tests/a.spec.ts".to_string(),
            suite_path: Vec::new(),
            name: format!("case {}", id),
            tags: Vec::new(),
            project: None,
            outcome: TestOutcome::Passed,
            duration: Duration::from_millis(5),
            retry: 0,
            error,
            steps: Vec::new(),
            stdout: Vec::new(),
            stderr: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    fn config() -> ReporterConfig {
        ReporterConfig {
            api_key: "key".to_string(),
            ..ReporterConfig::default()
        }
    }

    #[test]
    fn test_small_batch_is_not_compressed() {
        let metadata = RunMetadata::new("test");
        let encoded = encode_batch(&metadata, &[record(1, None)]).unwrap();

        assert!(!encoded.gzip);
        assert!(encoded.body.len() <= COMPRESSION_THRESHOLD);
        assert_eq!(encoded.body.len(), encoded.uncompressed_len);

        let json: serde_json::Value = serde_json::from_slice(&encoded.body).unwrap();
        assert_eq!(json["results"][0]["id"], "t1");
        assert_eq!(json["metadata"]["source"], "test");
    }

    #[test]
    fn test_large_batch_is_gzipped() {
        let metadata = RunMetadata::new("test");
        let records: Vec<_> = (0..5).map(|i| record(i, Some("x".repeat(400)))).collect();
        let encoded = encode_batch(&metadata, &records).unwrap();

        assert!(encoded.gzip);
        assert!(encoded.uncompressed_len > COMPRESSION_THRESHOLD);

        let mut decoded = String::new();
        GzDecoder::new(encoded.body.as_slice())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded.len(), encoded.uncompressed_len);
        let json: serde_json::Value = serde_json::from_str(&decoded).unwrap();
        assert_eq!(json["results"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_compression_threshold_is_inclusive() {
        let metadata = RunMetadata::new("test");
        let base = encode_batch(&metadata, &[record(1, Some(String::new()))])
            .unwrap()
            .uncompressed_len;
        let padded = |len: usize| {
            let error = "x".repeat(len - base);
            encode_batch(&metadata, &[record(1, Some(error))]).unwrap()
        };

        let at_threshold = padded(COMPRESSION_THRESHOLD);
        assert_eq!(at_threshold.uncompressed_len, COMPRESSION_THRESHOLD);
        assert!(!at_threshold.gzip);
        assert_eq!(at_threshold.body.len(), COMPRESSION_THRESHOLD);

        let over = padded(COMPRESSION_THRESHOLD + 1);
        assert_eq!(over.uncompressed_len, COMPRESSION_THRESHOLD + 1);
        assert!(over.gzip);
    }

    #[test]
    fn test_new_rejects_bad_config() {
        let err = TransmissionClient::new(&ReporterConfig::default()).unwrap_err();
        assert_eq!(err.kind, TransmitErrorKind::Validation);

        let mut bad = config();
        bad.endpoint = "not a url".to_string();
        let err = TransmissionClient::new(&bad).unwrap_err();
        assert_eq!(err.kind, TransmitErrorKind::Validation);
    }

    #[test]
    fn test_confirm_endpoint_is_derived() {
        let mut cfg = config();
        cfg.endpoint = "http://localhost:8080/api/reports/".to_string();
        let client = TransmissionClient::new(&cfg).unwrap();

        assert_eq!(
            client.confirm_endpoint,
            "http://localhost:8080/api/reports/confirm-uploads"
        );
    }

    #[tokio::test]
    async fn test_empty_batch_sends_nothing() {
        let mut cfg = config();
        // Nothing listens here; an actual request would fail.
        cfg.endpoint = "http://127.0.0.1:9/reports".to_string();
        let client = TransmissionClient::new(&cfg).unwrap();

        let result = client.send_batch(&RunMetadata::new("test"), &[]).await;

        assert!(result.success);
        assert_eq!(result.bytes_sent, 0);
        assert_eq!(result.retry_count, 0);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_ingest_response_tolerates_missing_fields() {
        let parsed: IngestResponse = serde_json::from_str(
            r#"{"success": true, "uploadUrls": {"a1": "https://bucket.example/a1"}}"#,
        )
        .unwrap();

        assert!(parsed.success);
        assert!(parsed.summary.is_none());
        assert_eq!(parsed.upload_urls["a1"], "https://bucket.example/a1");
    }
}
