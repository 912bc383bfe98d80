//! Google Document AI adapter (REST `:process` endpoint) and a mock.
//!
//! The request carries the document inline as base64. That copy is held in
//! a `Zeroizing` buffer and wiped as soon as the call returns; nothing about
//! the document outlives `process` except the returned fields.
//!
//! Calls are authorized with a token from [`AccessTokenSource`]. A 401 on a
//! minted token drops it and the call is sent once more with a fresh one.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::google_auth::AccessTokenSource;
use super::types::{DocumentService, RawEntity, RawExtraction, ServiceRequest};
use super::ExtractionError;
use crate::config::DocumentAiSettings;

// ──────────────────────────────────────────────
// DocumentAiClient
// ──────────────────────────────────────────────

/// Production document-understanding client backed by Document AI.
pub struct DocumentAiClient {
    process_url: String,
    token: AccessTokenSource,
    client: reqwest::blocking::Client,
}

impl DocumentAiClient {
    pub fn new(settings: &DocumentAiSettings) -> Result<Self, ExtractionError> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| ExtractionError::ServiceUnavailable(format!("HTTP client: {e}")))?;

        let process_url = format!(
            "{}/v1/projects/{}/locations/{}/processors/{}:process",
            settings.endpoint.trim_end_matches('/'),
            settings.project_id,
            settings.location,
            settings.processor_id,
        );

        Ok(Self {
            process_url,
            token: AccessTokenSource::new(&settings.credentials)?,
            client,
        })
    }

    pub fn process_url(&self) -> &str {
        &self.process_url
    }

    fn send(
        &self,
        body: &ProcessRequest<'_>,
        timeout: Duration,
    ) -> Result<reqwest::blocking::Response, ExtractionError> {
        let bearer = self.token.bearer(&self.client, timeout)?;
        self.client
            .post(&self.process_url)
            .bearer_auth(bearer.as_str())
            .timeout(timeout)
            .json(body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    ExtractionError::ServiceUnavailable(format!(
                        "request timed out after {}s",
                        timeout.as_secs_f32()
                    ))
                } else if e.is_connect() {
                    ExtractionError::ServiceUnavailable(format!(
                        "cannot reach {}",
                        self.process_url
                    ))
                } else {
                    ExtractionError::ServiceUnavailable(e.to_string())
                }
            })
    }
}

/// Request body for `:process`
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessRequest<'a> {
    raw_document: RawDocument<'a>,
    skip_human_review: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument<'a> {
    content: &'a str,
    mime_type: &'a str,
}

/// Response body from `:process` (only the parts we read)
#[derive(Deserialize)]
struct ProcessResponse {
    document: Option<ResponseDocument>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ResponseDocument {
    text: String,
    entities: Vec<ResponseEntity>,
    pages: Vec<ResponsePage>,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct ResponseEntity {
    #[serde(rename = "type")]
    kind: String,
    mention_text: String,
    confidence: f32,
    normalized_value: Option<NormalizedValue>,
    properties: Vec<ResponseEntity>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct NormalizedValue {
    text: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ResponsePage {
    layout: Option<PageLayout>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct PageLayout {
    confidence: f32,
}

impl DocumentService for DocumentAiClient {
    fn process(&self, request: &ServiceRequest<'_>) -> Result<RawExtraction, ExtractionError> {
        let _span = tracing::info_span!(
            "document_ai_process",
            mime = %request.mime_type,
            size = request.bytes.len(),
            hint = %request.type_hint,
        )
        .entered();
        let start = std::time::Instant::now();

        let content = Zeroizing::new(
            base64::engine::general_purpose::STANDARD.encode(request.bytes),
        );
        let body = ProcessRequest {
            raw_document: RawDocument {
                content: content.as_str(),
                mime_type: request.mime_type,
            },
            skip_human_review: true,
        };

        let mut response = self.send(&body, request.timeout)?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED && self.token.can_refresh() {
            tracing::warn!("Document service rejected the access token, minting a new one");
            self.token.invalidate();
            response = self.send(&body, request.timeout)?;
        }

        let status = response.status();
        let text = Zeroizing::new(response.text().map_err(|e| {
            if e.is_timeout() {
                ExtractionError::ServiceUnavailable("response body timed out".into())
            } else {
                ExtractionError::ServiceUnavailable(format!("reading response: {e}"))
            }
        })?);

        if !status.is_success() {
            // Document AI answers 400 INVALID_ARGUMENT for formats it cannot read
            if status == reqwest::StatusCode::BAD_REQUEST
                && text.to_lowercase().contains("unsupported")
            {
                return Err(ExtractionError::UnsupportedFormat(format!(
                    "rejected by document service ({})",
                    request.mime_type
                )));
            }
            tracing::warn!(status = status.as_u16(), "Document service returned error");
            return Err(ExtractionError::ServiceUnavailable(format!(
                "document service returned status {}",
                status.as_u16()
            )));
        }

        let parsed: ProcessResponse = serde_json::from_str(&text).map_err(|e| {
            ExtractionError::ServiceUnavailable(format!("unreadable service response: {e}"))
        })?;
        let document = parsed.document.unwrap_or_default();

        let mut entities = Vec::new();
        flatten_entities(&document.entities, &mut entities);

        let raw = RawExtraction {
            entities,
            text: document.text,
            page_confidences: document
                .pages
                .iter()
                .filter_map(|p| p.layout.as_ref().map(|l| l.confidence))
                .collect(),
        };

        tracing::info!(
            elapsed_ms = %start.elapsed().as_millis(),
            entities = raw.entities.len(),
            pages = raw.page_confidences.len(),
            "Document service extraction complete"
        );

        Ok(raw)
    }

    fn name(&self) -> &str {
        "document_ai"
    }
}

/// Identity processors may nest entities under a parent; flatten them.
/// A normalized value (e.g. ISO dates) is preferred over the raw mention.
fn flatten_entities(entities: &[ResponseEntity], out: &mut Vec<RawEntity>) {
    for entity in entities {
        let value = entity
            .normalized_value
            .as_ref()
            .map(|n| n.text.as_str())
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(entity.mention_text.as_str());

        if !entity.kind.is_empty() && !value.trim().is_empty() {
            out.push(RawEntity::new(
                entity.kind.as_str(),
                value,
                entity.confidence,
            ));
        }
        flatten_entities(&entity.properties, out);
    }
}

// ──────────────────────────────────────────────
// MockDocumentService (testing)
// ──────────────────────────────────────────────

/// Mock document service returning a fixed result, counting calls and
/// remembering the timeout of the last one.
pub struct MockDocumentService {
    response: Result<RawExtraction, ExtractionError>,
    calls: AtomicUsize,
    last_timeout: Mutex<Option<Duration>>,
}

impl MockDocumentService {
    pub fn new(raw: RawExtraction) -> Self {
        Self {
            response: Ok(raw),
            calls: AtomicUsize::new(0),
            last_timeout: Mutex::new(None),
        }
    }

    /// Entities given as (type, value, confidence).
    pub fn with_entities(entities: &[(&str, &str, f32)]) -> Self {
        Self::new(RawExtraction {
            entities: entities
                .iter()
                .map(|(kind, value, conf)| RawEntity::new(*kind, *value, *conf))
                .collect(),
            text: String::new(),
            page_confidences: vec![],
        })
    }

    pub fn failing(error: ExtractionError) -> Self {
        Self {
            response: Err(error),
            calls: AtomicUsize::new(0),
            last_timeout: Mutex::new(None),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_timeout(&self) -> Option<Duration> {
        *self.last_timeout.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DocumentService for MockDocumentService {
    fn process(&self, request: &ServiceRequest<'_>) -> Result<RawExtraction, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_timeout.lock().unwrap_or_else(|e| e.into_inner()) = Some(request.timeout);
        self.response.clone()
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};

    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use axum::Form;

    use crate::config::DocumentAiCredentials;
    use crate::models::DocumentType;
    use crate::test_support::{service_account, spawn_stub};

    const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    fn settings(endpoint: &str) -> DocumentAiSettings {
        DocumentAiSettings {
            endpoint: endpoint.to_string(),
            project_id: "kyc-test".into(),
            location: "us".into(),
            processor_id: "proc42".into(),
            credentials: DocumentAiCredentials::AccessToken("test-token".into()),
        }
    }

    fn request(timeout: Duration) -> ServiceRequest<'static> {
        ServiceRequest {
            bytes: PNG,
            mime_type: "image/png",
            type_hint: DocumentType::Passport,
            timeout,
        }
    }

    const PROCESS_PATH: &str = "/v1/projects/kyc-test/locations/us/processors/proc42:process";

    #[test]
    fn process_url_is_built_from_settings() {
        let client = DocumentAiClient::new(&settings("https://us-documentai.googleapis.com/")).unwrap();
        assert_eq!(
            client.process_url(),
            "https://us-documentai.googleapis.com/v1/projects/kyc-test/locations/us/processors/proc42:process"
        );
    }

    #[test]
    fn parses_entities_pages_and_nested_properties() {
        let router = Router::new().route(
            PROCESS_PATH,
            post(|headers: HeaderMap, Json(body): Json<serde_json::Value>| async move {
                assert_eq!(
                    headers.get("authorization").unwrap().to_str().unwrap(),
                    "Bearer test-token"
                );
                assert_eq!(body["rawDocument"]["mimeType"], "image/png");
                assert!(body["rawDocument"]["content"].as_str().unwrap().len() > 0);
                Json(serde_json::json!({
                    "document": {
                        "text": "PASSPORT\nJANE ROE",
                        "entities": [
                            {"type": "Family Name", "mentionText": "ROE", "confidence": 0.97},
                            {
                                "type": "Expiration Date",
                                "mentionText": "09 APR 2031",
                                "confidence": 0.93,
                                "normalizedValue": {"text": "2031-04-09"}
                            },
                            {
                                "type": "MRZ",
                                "mentionText": "",
                                "confidence": 0.5,
                                "properties": [
                                    {"type": "Document Id", "mentionText": "X1234567", "confidence": 0.99}
                                ]
                            }
                        ],
                        "pages": [{"layout": {"confidence": 0.91}}]
                    }
                }))
            }),
        );
        let (_rt, base) = spawn_stub(router);
        let client = DocumentAiClient::new(&settings(&base)).unwrap();

        let raw = client.process(&request(Duration::from_secs(5))).unwrap();
        assert_eq!(raw.entities.len(), 3);
        assert_eq!(raw.entities[0].kind, "Family Name");
        assert_eq!(raw.entities[1].value, "2031-04-09");
        assert_eq!(raw.entities[2].kind, "Document Id");
        assert_eq!(raw.page_confidences, vec![0.91]);
        assert!(raw.text.contains("JANE ROE"));
    }

    #[test]
    fn unsupported_format_from_service() {
        let router = Router::new().route(
            PROCESS_PATH,
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    r#"{"error":{"code":400,"message":"Unsupported input file format.","status":"INVALID_ARGUMENT"}}"#,
                )
            }),
        );
        let (_rt, base) = spawn_stub(router);
        let client = DocumentAiClient::new(&settings(&base)).unwrap();

        let err = client.process(&request(Duration::from_secs(5))).unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedFormat(_)));
    }

    #[test]
    fn server_error_is_service_unavailable() {
        let router = Router::new().route(
            PROCESS_PATH,
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "overloaded") }),
        );
        let (_rt, base) = spawn_stub(router);
        let client = DocumentAiClient::new(&settings(&base)).unwrap();

        let err = client.process(&request(Duration::from_secs(5))).unwrap_err();
        assert!(matches!(err, ExtractionError::ServiceUnavailable(ref m) if m.contains("503")));
    }

    #[test]
    fn timeout_is_service_unavailable() {
        let router = Router::new().route(
            PROCESS_PATH,
            post(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                Json(serde_json::json!({"document": {}}))
            }),
        );
        let (_rt, base) = spawn_stub(router);
        let client = DocumentAiClient::new(&settings(&base)).unwrap();

        let err = client
            .process(&request(Duration::from_millis(200)))
            .unwrap_err();
        assert!(matches!(err, ExtractionError::ServiceUnavailable(_)));
    }

    #[test]
    fn unreachable_service_is_service_unavailable() {
        // Port 9 (discard) on localhost is not listening in test environments
        let client = DocumentAiClient::new(&settings("http://127.0.0.1:9")).unwrap();
        let err = client.process(&request(Duration::from_secs(2))).unwrap_err();
        assert!(matches!(err, ExtractionError::ServiceUnavailable(_)));
    }

    #[test]
    fn garbage_body_is_service_unavailable() {
        let router = Router::new().route(PROCESS_PATH, post(|| async { "<html>proxy</html>" }));
        let (_rt, base) = spawn_stub(router);
        let client = DocumentAiClient::new(&settings(&base)).unwrap();

        let err = client.process(&request(Duration::from_secs(5))).unwrap_err();
        assert!(matches!(err, ExtractionError::ServiceUnavailable(ref m) if m.contains("unreadable")));
    }

    #[test]
    fn service_account_token_is_minted_and_renewed_on_401() {
        let minted = Arc::new(AtomicUsize::new(0));
        let mint_counter = minted.clone();
        let router = Router::new()
            .route(
                "/token",
                post(move |Form(_): Form<std::collections::HashMap<String, String>>| {
                    let n = mint_counter.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        Json(serde_json::json!({
                            "access_token": format!("minted-{n}"),
                            "expires_in": 3600
                        }))
                    }
                }),
            )
            .route(
                PROCESS_PATH,
                post(|headers: HeaderMap| async move {
                    // The first minted token is treated as revoked
                    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
                        Some("Bearer minted-2") => (
                            StatusCode::OK,
                            Json(serde_json::json!({"document": {"entities": [
                                {"type": "Given Name", "mentionText": "JANE", "confidence": 0.9}
                            ]}})),
                        ),
                        _ => (
                            StatusCode::UNAUTHORIZED,
                            Json(serde_json::json!({"error": {"code": 401}})),
                        ),
                    }
                }),
            );
        let (_rt, base) = spawn_stub(router);
        let mut settings = settings(&base);
        settings.credentials = service_account(&format!("{base}/token"));
        let client = DocumentAiClient::new(&settings).unwrap();

        let raw = client.process(&request(Duration::from_secs(5))).unwrap();
        assert_eq!(raw.entities[0].value, "JANE");
        assert_eq!(minted.load(Ordering::SeqCst), 2);

        // The renewed token is cached for later calls
        client.process(&request(Duration::from_secs(5))).unwrap();
        assert_eq!(minted.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn static_token_rejection_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let router = Router::new().route(
            PROCESS_PATH,
            post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { (StatusCode::UNAUTHORIZED, "expired") }
            }),
        );
        let (_rt, base) = spawn_stub(router);
        let client = DocumentAiClient::new(&settings(&base)).unwrap();

        let err = client.process(&request(Duration::from_secs(5))).unwrap_err();
        assert!(matches!(err, ExtractionError::ServiceUnavailable(ref m) if m.contains("401")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mock_counts_calls_and_returns_configured_result() {
        let mock = MockDocumentService::with_entities(&[("Name", "Jane Roe", 0.9)]);
        assert_eq!(mock.last_timeout(), None);
        let raw = mock.process(&request(Duration::from_secs(1))).unwrap();
        assert_eq!(raw.entities.len(), 1);
        assert_eq!(mock.call_count(), 1);
        assert_eq!(mock.last_timeout(), Some(Duration::from_secs(1)));

        let failing =
            MockDocumentService::failing(ExtractionError::ServiceUnavailable("down".into()));
        assert!(failing.process(&request(Duration::from_secs(1))).is_err());
        assert_eq!(failing.call_count(), 1);
    }
}
