//! HTTP implementations of the analysis and persistence boundaries.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use physio_core::analysis::AnalysisResult;
use physio_core::executor::{
    AnalysisInput, AnalysisService, BoundaryError, ImportResult, PersistenceService,
};
use physio_core::request::ImportRequest;
use serde::Serialize;

const MAX_UPSTREAM_MESSAGE_CHARS: usize = 300;

/// Whole-request deadline for both boundaries, including the response body.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(120);

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "HTTP client builder failed, using defaults");
            reqwest::Client::new()
        })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeDocumentBody<'a> {
    file_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    mime_type: Option<&'a str>,
    content_base64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    patient_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct HttpAnalysisClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAnalysisClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: http_client(DEFAULT_UPSTREAM_TIMEOUT),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }
}

impl AnalysisService for HttpAnalysisClient {
    async fn analyze(&self, input: &AnalysisInput) -> Result<AnalysisResult, BoundaryError> {
        let body = AnalyzeDocumentBody {
            file_name: &input.document.file_name,
            mime_type: input.document.mime_type.as_deref(),
            content_base64: STANDARD.encode(&input.document.bytes),
            patient_id: input.patient_id.as_deref(),
            context: input.context.as_deref(),
        };

        let resp = self
            .client
            .post(format!("{}/v1/documents/analyze", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| BoundaryError::new(format!("analysis service unreachable: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| BoundaryError::new(format!("analysis response could not be read: {e}")))?;
        if !status.is_success() {
            return Err(BoundaryError::new(upstream_message(status, &text)));
        }
        serde_json::from_str(&text)
            .map_err(|e| BoundaryError::new(format!("analysis response could not be parsed: {e}")))
    }
}

#[derive(Debug, Clone)]
pub struct HttpBackendClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBackendClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: http_client(DEFAULT_UPSTREAM_TIMEOUT),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }
}

impl PersistenceService for HttpBackendClient {
    /// A response body that parses as an import result is a delivered
    /// result, whatever the status code. Anything else is a transport failure.
    async fn persist(&self, request: &ImportRequest) -> Result<ImportResult, BoundaryError> {
        let mut req = self
            .client
            .post(format!("{}/v1/exercise-imports", self.base_url))
            .json(request);
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| BoundaryError::new(format!("backend unreachable: {e}")))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| BoundaryError::new(format!("backend response could not be read: {e}")))?;

        match serde_json::from_str::<ImportResult>(&text) {
            Ok(result) => Ok(result),
            Err(_) if !status.is_success() => Err(BoundaryError::new(upstream_message(status, &text))),
            Err(e) => Err(BoundaryError::new(format!(
                "backend response could not be parsed: {e}"
            ))),
        }
    }
}

/// Best human-readable message from an upstream error response.
fn upstream_message(status: reqwest::StatusCode, body: &str) -> String {
    let from_json = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        });
    let detail = from_json.unwrap_or_else(|| body.trim().to_string());
    if detail.is_empty() {
        return format!("upstream returned {status}");
    }
    let detail: String = detail.chars().take(MAX_UPSTREAM_MESSAGE_CHARS).collect();
    format!("upstream returned {status}: {detail}")
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use axum::Router;
    use axum::routing::post;
    use physio_core::executor::{AnalysisInput, AnalysisService};
    use physio_core::upload::DocumentFile;

    use super::{HttpAnalysisClient, upstream_message};

    #[tokio::test]
    async fn stalled_upstream_hits_the_client_deadline() {
        let app = Router::new().route(
            "/v1/documents/analyze",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "{}"
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake upstream");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let client = HttpAnalysisClient::new(format!("http://{addr}"))
            .with_timeout(Duration::from_millis(200));
        let input = AnalysisInput {
            document: DocumentFile::new("plan.pdf", Some("application/pdf".to_string()), vec![1]),
            patient_id: None,
            context: None,
        };

        let started = Instant::now();
        let err = client.analyze(&input).await.expect_err("deadline must fire");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(err.to_string().contains("analysis service"));
    }

    #[test]
    fn upstream_message_prefers_json_message() {
        let msg = upstream_message(
            reqwest::StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message":"document is not a treatment plan"}"#,
        );
        assert_eq!(
            msg,
            "upstream returned 422 Unprocessable Entity: document is not a treatment plan"
        );
    }

    #[test]
    fn upstream_message_truncates_plain_bodies() {
        let body = "x".repeat(1_000);
        let msg = upstream_message(reqwest::StatusCode::BAD_GATEWAY, &body);
        assert!(msg.len() < 400);
        assert_eq!(
            upstream_message(reqwest::StatusCode::BAD_GATEWAY, "  "),
            "upstream returned 502 Bad Gateway"
        );
    }
}
